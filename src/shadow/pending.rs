//! Client-token bookkeeping for in-flight shadow operations
//!
//! Every update or get request carries a client token. The service echoes the
//! token on the accepted/rejected response; a token with no response before
//! its deadline becomes a timeout.

use crate::protocol::ShadowOperation;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Maximum client token length accepted by the shadow service
const MAX_CLIENT_TOKEN_LEN: usize = 64;

/// An operation awaiting its response
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub thing_name: String,
    pub operation: ShadowOperation,
    pub deadline: Instant,
}

/// Operations keyed by client token
#[derive(Debug, Default)]
pub struct PendingOperations {
    operations: HashMap<String, PendingOperation>,
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new operation until `now + timeout`
    pub fn insert(
        &mut self,
        client_token: String,
        thing_name: &str,
        operation: ShadowOperation,
        now: Instant,
        timeout: Duration,
    ) {
        self.operations.insert(
            client_token,
            PendingOperation {
                thing_name: thing_name.to_string(),
                operation,
                deadline: now + timeout,
            },
        );
    }

    /// Remove and return the operation a response belongs to
    pub fn resolve(&mut self, client_token: &str) -> Option<PendingOperation> {
        self.operations.remove(client_token)
    }

    /// Remove every operation whose deadline has passed, returning `(thing, token)` pairs
    pub fn expire(&mut self, now: Instant) -> Vec<(String, String)> {
        let expired: Vec<String> = self
            .operations
            .iter()
            .filter(|(_, op)| op.deadline <= now)
            .map(|(token, _)| token.clone())
            .collect();

        let mut timed_out: Vec<(String, String)> = expired
            .into_iter()
            .filter_map(|token| {
                self.operations
                    .remove(&token)
                    .map(|op| (op.thing_name, token))
            })
            .collect();
        timed_out.sort();
        timed_out
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Generate a client token unique to this client, bounded to the service limit
pub fn generate_client_token(client_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let max_prefix = MAX_CLIENT_TOKEN_LEN - suffix.len() - 1;
    let prefix: String = client_id.chars().take(max_prefix).collect();
    format!("{prefix}-{suffix}")
}
