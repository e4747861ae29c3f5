//! Signaling side-channel: wire protocol, transport and dispatch

pub mod channel;
pub mod protocol;

pub use channel::{HandlerRegistry, SignalingChannel};
pub use protocol::{Envelope, Identity, Signal, Tag};
