//! Live decision feed. A ticker spawns fetches in the background and sends
//! results back over a channel; the printer only shows decisions it has not
//! seen before.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use aegis_core::models::{Decision, DecisionFilter, DecisionsResponse};
use aegis_core::{ApiClient, ApiError, TypedResponse};
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::commands::{describe_failure, print_decision};

/// Decisions requested per poll
const POLL_LIMIT: u32 = 50;

/// Buffer size for poll results
const CHANNEL_BUFFER_SIZE: usize = 8;

/// Keys remembered before the oldest are dropped
const SEEN_CAPACITY: usize = 100;

/// Keys kept after trimming
const SEEN_RETAIN: usize = 50;

/// Remembers recently printed decisions so overlapping polls don't repeat them.
#[derive(Debug, Default)]
struct SeenDecisions {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenDecisions {
    /// Record a decision, returning true the first time it is seen.
    fn insert(&mut self, decision: &Decision) -> bool {
        let key = decision.dedup_key();
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > SEEN_CAPACITY {
            while self.order.len() > SEEN_RETAIN {
                if let Some(old) = self.order.pop_front() {
                    self.keys.remove(&old);
                }
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Decisions from one poll that pass the filter and haven't been printed,
/// oldest first.
fn fresh_decisions<'a>(
    seen: &mut SeenDecisions,
    filter: &DecisionFilter,
    decisions: &'a [Decision],
) -> Vec<&'a Decision> {
    // The gateway returns newest first
    decisions
        .iter()
        .rev()
        .filter(|decision| filter.matches(decision))
        .filter(|decision| seen.insert(decision))
        .collect()
}

async fn send_result(
    tx: &mpsc::Sender<TypedResponse<DecisionsResponse>>,
    result: TypedResponse<DecisionsResponse>,
) {
    if let Err(e) = tx.send(result).await {
        debug!(error = %e, "Decision feed closed before poll result arrived");
    }
}

/// Poll the decision log until Ctrl+C or the session is rejected.
pub async fn follow_decisions(
    api: &ApiClient,
    filter: &DecisionFilter,
    interval_secs: u64,
) -> Result<()> {
    println!("👀 Following decisions (Ctrl+C to stop)...");

    let (tx, mut rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut seen = SeenDecisions::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Stopped following decisions");
                return Ok(());
            }
            _ = ticker.tick() => {
                let api = api.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = api.fetch_recent_decisions(POLL_LIMIT).await;
                    send_result(&tx, result).await;
                });
            }
            Some(result) = rx.recv() => {
                match result.into_result() {
                    Ok(response) => {
                        for decision in fresh_decisions(&mut seen, filter, &response.decisions) {
                            print_decision(decision);
                        }
                        debug!(remembered = seen.len(), "Poll processed");
                    }
                    Err(err @ ApiError::AuthenticationRequired) => {
                        error!("Session rejected while following decisions");
                        return Err(describe_failure(err));
                    }
                    Err(err) => warn!(error = %err, status = err.status(), "Poll failed"),
                }
            }
        }
    }
}
