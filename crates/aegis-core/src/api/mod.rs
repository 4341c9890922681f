//! Typed request layer for the Aegis gateway.
//!
//! This module provides the `ApiClient`, whose `call` primitive turns every
//! HTTP outcome into a `TypedResponse` instead of an error, and the
//! `ApiError` taxonomy those responses are classified into.
//!
//! The client holds no session state. It is built from two accessors, a
//! `TokenSource` and an `UnauthorizedHandler`, supplied by whoever owns the
//! session (normally `ApiClient::for_session`).

pub mod client;
pub mod error;
pub mod response;

pub use client::{ApiClient, RequestBody, RequestOptions, TokenSource, UnauthorizedHandler};
pub use error::ApiError;
pub use response::{ResponseKind, TypedResponse};
