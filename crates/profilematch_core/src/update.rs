use profilematch_logging::{pm_debug, pm_info, pm_warn};

use crate::{
    parse_frame, ChannelMsg, ChannelState, ConnectionState, Effect, Inbound, Notice,
};

/// Pure update function: applies a message to channel state and returns the effects
/// the driver must execute, in order.
pub fn update(mut state: ChannelState, msg: ChannelMsg) -> (ChannelState, Vec<Effect>) {
    let effects = match msg {
        ChannelMsg::OpenRequested { job_id } => {
            // Reopening replaces whatever transport or timer the previous run held.
            state.begin_job(job_id.clone());
            vec![
                Effect::CancelRetry,
                Effect::CloseTransport,
                Effect::Notify(Notice::Connection(ConnectionState::Connecting)),
                Effect::Connect { job_id },
            ]
        }
        ChannelMsg::TransportOpened => {
            if state.connection() != ConnectionState::Connecting {
                pm_debug!(
                    "Ignoring transport open while {:?}",
                    state.connection()
                );
                return (state, Vec::new());
            }
            state.mark_connected();
            pm_info!("Progress stream connected job_id={:?}", state.job_id());
            vec![Effect::Notify(Notice::Connection(ConnectionState::Connected))]
        }
        ChannelMsg::TransportFailed { reason } => on_drop(&mut state, Some(reason)),
        ChannelMsg::TransportClosed => on_drop(&mut state, None),
        ChannelMsg::FrameReceived(text) => on_frame(&mut state, &text),
        ChannelMsg::RetryTimerFired => {
            if state.connection() != ConnectionState::Disconnected || !state.take_pending_retry() {
                return (state, Vec::new());
            }
            match state.job_id().cloned() {
                Some(job_id) => {
                    state.mark_connecting();
                    pm_info!(
                        "Reconnecting job_id={} attempt={}",
                        job_id,
                        state.reconnect_attempt()
                    );
                    vec![
                        Effect::Notify(Notice::Connection(ConnectionState::Connecting)),
                        Effect::Connect { job_id },
                    ]
                }
                None => Vec::new(),
            }
        }
        ChannelMsg::CloseRequested => {
            let was_live = state.connection() != ConnectionState::Disconnected;
            state.close();
            let mut effects = vec![Effect::CancelRetry, Effect::CloseTransport];
            if was_live {
                effects.push(Effect::Notify(Notice::Connection(
                    ConnectionState::Disconnected,
                )));
            }
            effects
        }
    };

    (state, effects)
}

fn on_drop(state: &mut ChannelState, reason: Option<String>) -> Vec<Effect> {
    if state.connection() == ConnectionState::Disconnected {
        // Error and close usually arrive as a pair; the first one already handled it.
        return Vec::new();
    }
    state.mark_disconnected();
    let mut effects = vec![Effect::Notify(Notice::Connection(
        ConnectionState::Disconnected,
    ))];

    if state.is_complete() {
        pm_debug!(
            "Progress stream ended after completion job_id={:?}",
            state.job_id()
        );
        return effects;
    }

    if let Some(reason) = reason {
        pm_warn!(
            "Progress stream failed job_id={:?}: {}",
            state.job_id(),
            reason
        );
        state.set_error(reason.clone());
        effects.push(Effect::Notify(Notice::Error { message: reason }));
    }

    let policy = state.policy();
    let attempt = state.reconnect_attempt();
    if attempt < policy.max_attempts {
        let delay = policy.delay_for(attempt);
        state.record_retry();
        effects.push(Effect::ScheduleRetry {
            delay,
            attempt: attempt + 1,
        });
    } else {
        let message = format!("Connection lost; gave up after {attempt} reconnect attempts");
        pm_warn!("{} job_id={:?}", message, state.job_id());
        state.set_error(message.clone());
        effects.push(Effect::Notify(Notice::Error { message }));
        effects.push(Effect::Notify(Notice::RetriesExhausted { attempts: attempt }));
    }
    effects
}

fn on_frame(state: &mut ChannelState, text: &str) -> Vec<Effect> {
    let inbound = match parse_frame(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            pm_warn!(
                "Ignoring malformed frame job_id={:?}: {}",
                state.job_id(),
                err
            );
            return Vec::new();
        }
    };

    match inbound {
        Inbound::ConnectionEstablished { message } => {
            pm_info!("Connection established: {}", message);
            Vec::new()
        }
        Inbound::Pong => {
            pm_debug!("pong job_id={:?}", state.job_id());
            Vec::new()
        }
        Inbound::Update {
            stage,
            progress,
            message,
        } => {
            state.apply_update(stage, progress, message.clone());
            vec![Effect::Notify(Notice::Progress {
                stage,
                progress,
                message,
            })]
        }
        Inbound::Complete { message, results } => {
            state.apply_complete(message.clone(), results.clone());
            vec![Effect::Notify(Notice::Completed {
                message,
                result: results,
            })]
        }
        Inbound::Error { message, detail } => {
            if let Some(detail) = detail {
                pm_warn!("Analysis error detail job_id={:?}: {}", state.job_id(), detail);
            }
            state.apply_analysis_error(message.clone());
            vec![Effect::Notify(Notice::Error { message })]
        }
        Inbound::Unknown { kind } => {
            pm_debug!("Unknown message type: {}", kind);
            Vec::new()
        }
    }
}
