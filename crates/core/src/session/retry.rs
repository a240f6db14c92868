//! What to do when the server answers a command with an error status.

use std::fmt;

use crate::protocol::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resend the same command after `delay_ms`.
    Retry { delay_ms: u64 },
    /// Report the error and move on to the next queued command.
    GiveUp,
}

/// Consulted for every response with a status of 400 or above (401s that
/// can be answered with credentials excepted).
pub trait RetryPolicy: fmt::Debug + Send {
    /// `attempt` counts the retries already made for this command.
    fn on_status(&mut self, method: Method, code: u16, attempt: u32) -> RetryDecision;
}

/// Never retry; every error status is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn on_status(&mut self, _method: Method, _code: u16, _attempt: u32) -> RetryDecision {
        RetryDecision::GiveUp
    }
}

/// Retry selected status codes a bounded number of times with a fixed delay.
#[derive(Debug, Clone)]
pub struct StatusRetry {
    pub max: u32,
    pub codes: Vec<u16>,
    pub delay_ms: u64,
}

impl Default for StatusRetry {
    fn default() -> Self {
        Self {
            max: 20,
            codes: vec![503],
            delay_ms: 1000,
        }
    }
}

impl RetryPolicy for StatusRetry {
    fn on_status(&mut self, method: Method, code: u16, attempt: u32) -> RetryDecision {
        if attempt < self.max && self.codes.contains(&code) {
            tracing::debug!(%method, code, attempt, "retrying command");
            RetryDecision::Retry {
                delay_ms: self.delay_ms,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
