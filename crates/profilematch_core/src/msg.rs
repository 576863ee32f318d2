use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMsg {
    /// Owner asked to (re)open the progress stream for a job.
    OpenRequested { job_id: JobId },
    /// Transport handshake finished.
    TransportOpened,
    /// Transport reported an error; the connection is gone.
    TransportFailed { reason: String },
    /// Transport closed without an error (server hung up, stream ended).
    TransportClosed,
    /// Raw text frame received from the server.
    FrameReceived(String),
    /// The pending reconnect timer elapsed.
    RetryTimerFired,
    /// Owner closed the channel.
    CloseRequested,
}
