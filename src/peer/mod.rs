//! Peer session management: the capability surface, the production engine,
//! and the lifecycle state machine

pub mod engine;
pub mod manager;
pub mod session;
pub mod webrtc;

pub use engine::{ConnectivityEngine, LinkState, OutboundTrack, PeerLink, TrackWriteError};
pub use manager::{register_signal_handlers, SessionManager};
pub use session::Session;
pub use webrtc::WebRtcEngine;
