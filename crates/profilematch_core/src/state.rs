use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::ReconnectPolicy;

/// Server-issued session identifier correlating an upload to its analysis run.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Named phase of backend analysis work, reported for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Skills,
    Analysis,
    Similarity,
    Finalizing,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extraction,
        Stage::Skills,
        Stage::Analysis,
        Stage::Similarity,
        Stage::Finalizing,
    ];

    /// Wire name used in `analysis_update` messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Skills => "skills",
            Stage::Analysis => "analysis",
            Stage::Similarity => "similarity",
            Stage::Finalizing => "finalizing",
        }
    }

    /// Human-readable name for progress displays.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Extraction => "Text Extraction",
            Stage::Skills => "Skill Detection",
            Stage::Analysis => "Deep Analysis",
            Stage::Similarity => "Match Calculation",
            Stage::Finalizing => "Finalizing Results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown analysis stage {0:?}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Everything one progress channel knows about its job and transport.
///
/// Invariants maintained by the mutators below:
/// - `result` is only present while `progress == 100` and `last_error` is empty.
/// - `reconnect_attempt` is 0 right after every transition to `Connected`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelState {
    job_id: Option<JobId>,
    connection: ConnectionState,
    progress: u8,
    stage: Option<Stage>,
    status_message: String,
    result: Option<Value>,
    last_error: Option<String>,
    reconnect_attempt: u32,
    retry_pending: bool,
    policy: ReconnectPolicy,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// True once the retry budget is spent and the owner must reopen manually.
    pub fn retries_exhausted(&self) -> bool {
        self.job_id.is_some()
            && self.connection == ConnectionState::Disconnected
            && self.result.is_none()
            && self.reconnect_attempt >= self.policy.max_attempts
    }

    pub(crate) fn begin_job(&mut self, job_id: JobId) {
        *self = Self {
            job_id: Some(job_id),
            connection: ConnectionState::Connecting,
            policy: self.policy,
            ..Self::default()
        };
    }

    pub(crate) fn mark_connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connection = ConnectionState::Connected;
        self.last_error = None;
        self.reconnect_attempt = 0;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connection = ConnectionState::Disconnected;
    }

    pub(crate) fn record_retry(&mut self) {
        self.reconnect_attempt = (self.reconnect_attempt + 1).min(self.policy.max_attempts);
        self.retry_pending = true;
    }

    /// Consumes the pending retry, if any. Timers that fire without one are stale.
    pub(crate) fn take_pending_retry(&mut self) -> bool {
        std::mem::take(&mut self.retry_pending)
    }

    pub(crate) fn set_error(&mut self, message: String) {
        self.last_error = Some(message);
        self.result = None;
    }

    pub(crate) fn apply_update(&mut self, stage: Option<Stage>, progress: u8, message: String) {
        self.stage = stage;
        self.progress = progress.min(100);
        self.status_message = message;
        // A fresh update means a run is in flight again.
        self.result = None;
    }

    pub(crate) fn apply_complete(&mut self, message: String, result: Value) {
        self.progress = 100;
        self.status_message = message;
        self.result = Some(result);
        self.last_error = None;
    }

    pub(crate) fn apply_analysis_error(&mut self, message: String) {
        self.set_error(message);
        self.progress = 0;
    }

    pub(crate) fn close(&mut self) {
        self.job_id = None;
        self.connection = ConnectionState::Disconnected;
        self.retry_pending = false;
    }
}
