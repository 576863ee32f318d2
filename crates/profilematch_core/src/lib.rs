//! ProfileMatch core: pure progress-channel state machine.
//!
//! Nothing in this crate performs IO. The engine feeds [`ChannelMsg`]s into
//! [`update`] and executes the returned [`Effect`]s.
mod effect;
mod inbound;
mod msg;
mod policy;
mod state;
mod update;

pub use effect::{Effect, Notice};
pub use inbound::{parse_frame, FrameError, Inbound};
pub use msg::ChannelMsg;
pub use policy::ReconnectPolicy;
pub use state::{ChannelState, ConnectionState, JobId, Stage, UnknownStage};
pub use update::update;
