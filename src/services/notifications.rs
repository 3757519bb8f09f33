//! Outcome notifications
//!
//! Every lending operation reports a human-readable outcome for the user it
//! concerns. The flash sink keeps them until the user's next page load
//! drains them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

/// Most messages kept per user before the oldest are dropped
const MAX_PENDING: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self { kind: OutcomeKind::Success, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self { kind: OutcomeKind::Info, message: message.into() }
    }

    pub fn from_error(error: &AppError) -> Self {
        Self { kind: error.outcome_kind(), message: error.user_message() }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait OutcomeSink: Send + Sync {
    fn report(&self, user_id: i32, outcome: Outcome);
}

/// Report the result of an operation to `user_id`. Retryable failures stay
/// silent here; once retries run out `Services::retry_for` reports them.
pub fn report_result<T>(
    sink: &dyn OutcomeSink,
    user_id: i32,
    result: &AppResult<T>,
    on_success: impl FnOnce(&T) -> String,
) {
    match result {
        Ok(value) => sink.report(user_id, Outcome::success(on_success(value))),
        Err(e) if e.is_retryable() => {}
        Err(e) => sink.report(user_id, Outcome::from_error(e)),
    }
}

/// Per-user queues of outcomes waiting to be shown
#[derive(Default)]
pub struct FlashOutcomeSink {
    pending: Mutex<HashMap<i32, VecDeque<Outcome>>>,
}

impl FlashOutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every message waiting for `user_id`, oldest first
    pub fn drain(&self, user_id: i32) -> Vec<Outcome> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending
            .remove(&user_id)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

impl OutcomeSink for FlashOutcomeSink {
    fn report(&self, user_id: i32, outcome: Outcome) {
        match outcome.kind {
            OutcomeKind::Error | OutcomeKind::Warning => {
                tracing::warn!(user_id, kind = ?outcome.kind, "{}", outcome.message)
            }
            _ => tracing::info!(user_id, kind = ?outcome.kind, "{}", outcome.message),
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let queue = pending.entry(user_id).or_default();
        if queue.len() == MAX_PENDING {
            queue.pop_front();
        }
        queue.push_back(outcome);
    }
}
