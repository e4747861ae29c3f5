//! One generation of the peer session

use crate::peer::engine::PeerLink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One generation of the peer-to-peer connection: the engine link, the relay
/// loop bound to it, and the cancellation signal tying them together.
///
/// A session is never reused: a reset tears the old one down completely and
/// constructs a replacement with a new generation number.
pub struct Session {
    generation: u64,
    link: Arc<dyn PeerLink>,
    cancel: CancellationToken,
    relay: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(
        generation: u64,
        link: Arc<dyn PeerLink>,
        cancel: CancellationToken,
        relay: JoinHandle<()>,
    ) -> Self {
        Self {
            generation,
            link,
            cancel,
            relay: Some(relay),
        }
    }

    /// Generation counter distinguishing this session from its predecessors
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    /// Tear the session down: signal cancellation, wait for the relay loop
    /// bound to this session to exit, then release the engine link.
    ///
    /// The relay join is a hard barrier: the ingestion socket allows one
    /// reader at a time, so a successor must not start reading before this
    /// session's loop has fully stopped. Calling close twice is a no-op.
    pub async fn close(&mut self) {
        let Some(relay) = self.relay.take() else {
            return;
        };
        debug!(generation = self.generation, "closing peer session");
        self.cancel.cancel();
        if let Err(e) = relay.await {
            warn!(generation = self.generation, error = %e, "relay task aborted");
        }
        if let Err(e) = self.link.close().await {
            warn!(generation = self.generation, error = %e, "engine link close failed");
        }
    }
}
