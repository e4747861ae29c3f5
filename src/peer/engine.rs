//! Connectivity engine capability surface.
//!
//! The peer-to-peer negotiation machinery (ICE, SDP, RTP framing) lives
//! behind these traits. The session manager only consumes capabilities:
//! create a link, publish a track, exchange descriptions and candidates,
//! observe state. Candidate and description payloads are opaque here; this
//! layer validates them syntactically at decode time and nothing more.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Connectivity state of a peer link, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Link created, negotiation not started
    New,
    /// Reachability checks in progress
    Checking,
    /// Media path established
    Connected,
    /// Media path lost, possibly recoverable
    Disconnected,
    /// Media path lost and not recoverable
    Failed,
    /// Link shut down
    Closed,
}

/// Callback fired on every engine-reported state transition
pub type LinkStateCallback = Box<dyn Fn(LinkState) + Send + Sync>;

/// Callback fired for each locally discovered connectivity candidate
pub type CandidateCallback = Box<dyn Fn(RTCIceCandidateInit) + Send + Sync>;

/// Write failures reported by an outbound track
#[derive(Debug, thiserror::Error)]
pub enum TrackWriteError {
    /// The track's transport is gone; normal end of a session
    #[error("track closed")]
    Closed,

    /// Transient write failure
    #[error("track write failed: {0}")]
    Failed(String),
}

/// Factory for peer links
#[async_trait]
pub trait ConnectivityEngine: Send + Sync {
    /// Create a fresh connection capability
    async fn create_link(&self) -> Result<Arc<dyn PeerLink>>;
}

/// One peer-to-peer connection capability.
///
/// Callbacks are invoked from the engine's own concurrency; implementors of
/// the consuming side must treat them as arbitrary concurrent callers.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Synthesize the outbound media track and register it with the link
    async fn publish_track(&self) -> Result<Arc<dyn OutboundTrack>>;

    /// Request an offer describing the local media parameters
    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription>;

    /// Commit a description as the local end of the negotiation
    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()>;

    /// Commit the remote peer's description
    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()>;

    /// Feed a remote connectivity candidate into the engine
    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Install the state-transition callback
    fn on_link_state_changed(&self, callback: LinkStateCallback);

    /// Install the local-candidate callback
    fn on_candidate_discovered(&self, callback: CandidateCallback);

    /// Release the connection capability
    async fn close(&self) -> Result<()>;
}

/// Outbound media sink fed by the relay
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    /// Forward one media transport unit, unchanged
    async fn write(&self, packet: &[u8]) -> std::result::Result<(), TrackWriteError>;
}
