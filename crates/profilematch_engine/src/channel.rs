use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use profilematch_core::{
    update, ChannelMsg, ChannelState, Effect, JobId, Notice, ReconnectPolicy,
};
use profilematch_logging::{pm_debug, pm_info, pm_warn};

use crate::{ChannelSettings, Connector, Transport, TransportError, WsConnector};

/// Grace period for the close handshake once a channel is torn down.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Receives channel notices. Called from the channel's driver task.
///
/// Callbacks must not call back into the same channel's `close` or `subscribe`:
/// delivery holds the lock those methods take.
pub trait ChannelListener: Send + Sync {
    fn on_notice(&self, notice: &Notice);
}

impl<F> ChannelListener for F
where
    F: Fn(&Notice) + Send + Sync,
{
    fn on_notice(&self, notice: &Notice) {
        self(notice)
    }
}

enum Command {
    Open(JobId),
    Send(Value),
}

struct Shared {
    state: Mutex<ChannelState>,
    /// `None` once the channel is closed; no notice is delivered after that.
    listeners: Mutex<Option<Vec<Arc<dyn ChannelListener>>>>,
}

impl Shared {
    fn notify(&self, notice: &Notice) {
        let listeners = lock(&self.listeners);
        if let Some(listeners) = listeners.as_ref() {
            for listener in listeners {
                listener.on_notice(notice);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reconnecting subscription to one backend job's progress stream.
///
/// All IO runs on a driver task spawned onto the current tokio runtime, so
/// construction must happen inside one. Failures never surface as errors:
/// they land in [`ChannelState::last_error`] and are reported through
/// [`Notice`]s.
pub struct ProgressChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl ProgressChannel {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ChannelState::with_policy(policy)),
            listeners: Mutex::new(Some(Vec::new())),
        });
        let cancel = CancellationToken::new();

        let driver = Driver {
            connector,
            shared: shared.clone(),
            cmd_rx,
            cancel: cancel.clone(),
            transport: None,
            retry: None,
        };
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            shared,
            cancel,
        }
    }

    /// Channel over the backend's WebSocket endpoint.
    pub fn websocket(settings: &ChannelSettings) -> Result<Self, TransportError> {
        let connector = WsConnector::new(settings)?;
        Ok(Self::new(Arc::new(connector), settings.reconnect))
    }

    pub fn subscribe(&self, listener: impl ChannelListener + 'static) {
        if let Some(listeners) = lock(&self.shared.listeners).as_mut() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Start (or restart) streaming progress for `job_id`. Also the manual
    /// retry after the reconnect budget is spent.
    pub fn open(&self, job_id: impl Into<JobId>) {
        self.command(Command::Open(job_id.into()));
    }

    /// Best-effort outbound message; dropped unless connected right now.
    pub fn send(&self, message: Value) {
        if !lock(&self.shared.state).is_connected() {
            pm_debug!("Dropping outbound message while not connected");
            return;
        }
        self.command(Command::Send(message));
    }

    /// Liveness probe; the server answers with `pong`.
    pub fn ping(&self) {
        self.send(json!({ "type": "ping" }));
    }

    pub fn snapshot(&self) -> ChannelState {
        lock(&self.shared.state).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the driver, cancels any pending reconnect and drops the transport.
    ///
    /// Once this returns no listener is invoked again. Closing is final: create
    /// a new channel to stream another job.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        // Waits for any in-flight delivery to finish before detaching.
        lock(&self.shared.listeners).take();

        let mut state = lock(&self.shared.state);
        let (next, _effects) = update(std::mem::take(&mut *state), ChannelMsg::CloseRequested);
        *state = next;
        pm_debug!("Progress channel closed");
    }

    fn command(&self, command: Command) {
        if self.is_closed() || self.cmd_tx.send(command).is_err() {
            pm_warn!("Ignoring command on a closed progress channel");
        }
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// What woke the driver loop.
enum Wake {
    Cancelled,
    Command(Option<Command>),
    RetryDue,
    Frame(Option<Result<String, TransportError>>),
}

/// Owns the transport and the reconnect timer; executes effects from `update`.
struct Driver {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    transport: Option<Box<dyn Transport>>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                command = self.cmd_rx.recv() => Wake::Command(command),
                _ = wait_retry(&mut self.retry) => Wake::RetryDue,
                frame = recv_frame(&mut self.transport) => Wake::Frame(frame),
            };

            let msg = match wake {
                Wake::Cancelled | Wake::Command(None) => break,
                Wake::Command(Some(Command::Open(job_id))) => ChannelMsg::OpenRequested { job_id },
                Wake::Command(Some(Command::Send(message))) => {
                    self.send(message).await;
                    continue;
                }
                Wake::RetryDue => {
                    self.retry = None;
                    ChannelMsg::RetryTimerFired
                }
                Wake::Frame(Some(Ok(text))) => ChannelMsg::FrameReceived(text),
                Wake::Frame(Some(Err(err))) => {
                    self.transport = None;
                    ChannelMsg::TransportFailed {
                        reason: err.to_string(),
                    }
                }
                Wake::Frame(None) => {
                    self.transport = None;
                    ChannelMsg::TransportClosed
                }
            };
            self.dispatch(msg).await;
        }

        self.retry = None;
        if let Some(mut transport) = self.transport.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
        }
        pm_debug!("Progress channel driver stopped");
    }

    /// Runs `msg` and every follow-up message its effects produce, in order.
    async fn dispatch(&mut self, msg: ChannelMsg) {
        let mut queue = VecDeque::from([msg]);
        while let Some(msg) = queue.pop_front() {
            let effects = {
                let mut state = lock(&self.shared.state);
                if self.cancel.is_cancelled() {
                    return;
                }
                let (next, effects) = update(std::mem::take(&mut *state), msg);
                *state = next;
                effects
            };
            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<ChannelMsg> {
        match effect {
            Effect::Connect { job_id } => {
                self.transport = None;
                let connected = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return None,
                    result = self.connector.connect(&job_id) => result,
                };
                Some(match connected {
                    Ok(transport) => {
                        self.transport = Some(transport);
                        ChannelMsg::TransportOpened
                    }
                    Err(err) => ChannelMsg::TransportFailed {
                        reason: err.to_string(),
                    },
                })
            }
            Effect::ScheduleRetry { delay, attempt } => {
                pm_info!("Scheduling reconnect attempt={} delay={:?}", attempt, delay);
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                None
            }
            Effect::CancelRetry => {
                self.retry = None;
                None
            }
            Effect::CloseTransport => {
                if let Some(mut transport) = self.transport.take() {
                    if tokio::time::timeout(CLOSE_GRACE, transport.close()).await.is_err() {
                        pm_debug!("Close handshake timed out; dropping transport");
                    }
                }
                None
            }
            Effect::Notify(notice) => {
                if !self.cancel.is_cancelled() {
                    self.shared.notify(&notice);
                }
                None
            }
        }
    }

    async fn send(&mut self, message: Value) {
        let connected = lock(&self.shared.state).is_connected();
        let Some(transport) = self.transport.as_mut().filter(|_| connected) else {
            pm_debug!("Dropping outbound message while not connected");
            return;
        };
        let text = message.to_string();
        if let Err(err) = transport.send(text).await {
            // The read side reports the broken connection.
            pm_warn!("Failed to send on progress stream: {}", err);
        }
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn recv_frame(
    transport: &mut Option<Box<dyn Transport>>,
) -> Option<Result<String, TransportError>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}
