//! Drone uplink: one local RTP stream relayed to one remote viewer.
//!
//! The drone connects to a signaling server over WebSocket, negotiates a
//! single peer session through an external connectivity engine, and forwards
//! RTP datagrams from a fixed local UDP listener into the session's outbound
//! video track.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  SignalingChannel (WebSocket)                           │
//! │  ├─ read loop ──→ HandlerRegistry ──→ SessionManager    │
//! │  ├─ heartbeat ──┐                         │             │
//! │  └─ writer ←────┴──── emits ←── callbacks ┘             │
//! │                                                         │
//! │  UDP ingest ──→ MediaRelay ──→ outbound track           │
//! │                 (one loop per session generation)       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one session is active at a time. A failed link tears the session
//! down and constructs a replacement; the ingest listener stays up across
//! resets and is read by exactly one relay loop at any moment.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod peer;
pub mod relay;
pub mod signaling;

pub use config::{DroneConfig, RetryPolicy};
pub use error::{Error, Result};
pub use peer::engine::{ConnectivityEngine, LinkState, OutboundTrack, PeerLink, TrackWriteError};
pub use peer::manager::{register_signal_handlers, SessionManager};
pub use peer::webrtc::WebRtcEngine;
pub use signaling::channel::{HandlerRegistry, SignalingChannel};
pub use signaling::protocol::{Envelope, Identity, Signal, Tag};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
