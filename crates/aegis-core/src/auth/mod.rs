//! Authentication module for managing the dashboard session.
//!
//! This module provides:
//! - `Session`: the immutable token + expiry value, validated on every read
//! - `SessionManager`: login, logout and restore transitions over that value
//! - `SessionStore`: persistence backends (JSON file, OS keychain, memory)
//!
//! Tokens expire after the lifetime the server grants at login
//! (30 minutes when it does not say).

pub mod error;
pub mod manager;
pub mod session;
pub mod store;

pub use error::AuthError;
pub use manager::{open_store, SessionManager};
pub use session::{PersistedSession, Session, SessionSnapshot};
pub use store::{
    FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionStore, StoreError,
};
