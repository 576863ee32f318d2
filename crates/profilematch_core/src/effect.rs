use std::time::Duration;

use serde_json::Value;

use crate::{ConnectionState, JobId, Stage};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a transport for the job's progress stream.
    Connect { job_id: JobId },
    /// Arm the single reconnect timer. `attempt` is the retry number (1-based).
    ScheduleRetry { delay: Duration, attempt: u32 },
    /// Disarm the reconnect timer if one is pending.
    CancelRetry,
    /// Drop the current transport if one is held.
    CloseTransport,
    /// Deliver a notice to the channel's listeners.
    Notify(Notice),
}

/// Observable change reported to the owner of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Connection(ConnectionState),
    Progress {
        stage: Option<Stage>,
        progress: u8,
        message: String,
    },
    Completed {
        message: String,
        result: Value,
    },
    Error {
        message: String,
    },
    /// No further reconnects will be attempted until the owner reopens.
    RetriesExhausted {
        attempts: u32,
    },
}
