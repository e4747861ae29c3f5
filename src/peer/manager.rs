//! Peer session lifecycle: create, renegotiate, reset on failure.
//!
//! The manager owns the single active [`Session`]. Every lifecycle mutation
//! happens under one lock over the session slot; engine callbacks never
//! touch shared state directly but enqueue [`LinkEvent`]s consumed by one
//! serialized event loop. Events carry the generation they were observed on,
//! so anything that raced a reset is recognized as stale and dropped.

use crate::config::{DroneConfig, RetryPolicy};
use crate::peer::engine::{ConnectivityEngine, LinkState};
use crate::peer::session::Session;
use crate::relay::MediaRelay;
use crate::signaling::channel::SignalingChannel;
use crate::signaling::protocol::{Identity, Signal, Tag};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Events delivered into the manager's serialized queue.
///
/// Engine callbacks and the relay loop produce these from arbitrary tasks;
/// the event loop consumes them one at a time.
pub(crate) enum LinkEvent {
    /// Engine-reported connectivity transition
    StateChanged { generation: u64, state: LinkState },
    /// Locally discovered connectivity candidate
    CandidateDiscovered {
        generation: u64,
        candidate: RTCIceCandidateInit,
    },
    /// The relay observed persistently failing ingest reads
    RelayStalled { generation: u64 },
}

/// Owns the single active peer session and drives its lifecycle
pub struct SessionManager {
    engine: Arc<dyn ConnectivityEngine>,
    channel: Arc<SignalingChannel>,
    ingest: Arc<UdpSocket>,
    identity: Identity,
    retry: RetryPolicy,
    slot: Mutex<Option<Session>>,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<LinkEvent>,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Open the initial session and start the event loop.
    ///
    /// Construction failures are retried per the configured policy; when the
    /// budget is exhausted the error is returned to the caller (the binary
    /// treats that as fatal at startup).
    pub async fn start(
        engine: Arc<dyn ConnectivityEngine>,
        channel: Arc<SignalingChannel>,
        ingest: Arc<UdpSocket>,
        config: &DroneConfig,
    ) -> Result<Arc<Self>> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            engine,
            channel,
            ingest,
            identity: Identity::drone(&config.drone_id),
            retry: config.session_retry.clone(),
            slot: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            events,
            shutdown: CancellationToken::new(),
        });

        {
            let mut slot = manager.slot.lock().await;
            manager.open_session(&mut slot).await?;
        }

        tokio::spawn(Arc::clone(&manager).event_loop(events_rx));
        Ok(manager)
    }

    /// Stop the event loop and close the active session without replacement
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut slot = self.slot.lock().await;
        if let Some(mut session) = slot.take() {
            session.close().await;
        }
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => break,
                },
            }
        }
        debug!("session event loop stopped");
    }

    async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged { generation, state } => {
                self.on_link_state(generation, state).await;
            }
            LinkEvent::CandidateDiscovered {
                generation,
                candidate,
            } => {
                self.on_local_candidate(generation, candidate).await;
            }
            LinkEvent::RelayStalled { generation } => {
                self.on_relay_stalled(generation).await;
            }
        }
    }

    /// Connectivity policy: a failed link always resets; a disconnected link
    /// first attempts an in-place ICE restart and resets only if that flow
    /// fails.
    async fn on_link_state(&self, generation: u64, state: LinkState) {
        let mut slot = self.slot.lock().await;
        if !is_current(&slot, generation) {
            debug!(generation, "dropping state change from a replaced session");
            return;
        }
        match state {
            LinkState::Failed => {
                warn!(generation, "peer link failed");
                self.reset_locked(&mut slot).await;
            }
            LinkState::Disconnected => {
                info!(generation, "peer link disconnected, attempting ICE restart");
                let restart = match slot.as_ref() {
                    Some(session) => self.offer_flow(session, true).await,
                    None => Ok(()),
                };
                if let Err(e) = restart {
                    warn!(generation, error = %e, "ICE restart failed");
                    self.reset_locked(&mut slot).await;
                }
            }
            state => debug!(generation, ?state, "peer link state changed"),
        }
    }

    /// Emit each locally discovered candidate immediately, without batching
    async fn on_local_candidate(&self, generation: u64, candidate: RTCIceCandidateInit) {
        {
            let slot = self.slot.lock().await;
            if !is_current(&slot, generation) {
                debug!(generation, "dropping candidate from a replaced session");
                return;
            }
        }
        let payload = match serde_json::to_string(&candidate) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize local candidate");
                return;
            }
        };
        if let Err(e) = self.channel.emit(Tag::IceCandidate, &payload).await {
            warn!(error = %e, "failed to emit local candidate");
        }
    }

    async fn on_relay_stalled(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if !is_current(&slot, generation) {
            return;
        }
        error!(generation, "media relay stalled, resetting session");
        self.reset_locked(&mut slot).await;
    }

    /// Inbound `begin`: the remote viewer wants an offer
    async fn handle_begin(&self) {
        let mut slot = self.slot.lock().await;
        let flow = match slot.as_ref() {
            Some(session) => self.offer_flow(session, false).await,
            None => {
                warn!("offer requested but no session is active");
                return;
            }
        };
        if let Err(e) = flow {
            warn!(error = %e, "offer flow failed");
            self.reset_locked(&mut slot).await;
        }
    }

    /// Inbound `description`: commit the remote description; a failed commit
    /// resets the session
    async fn handle_remote_description(&self, description: RTCSessionDescription) {
        let mut slot = self.slot.lock().await;
        let commit = match slot.as_ref() {
            Some(session) => session.link().set_remote_description(description).await,
            None => return,
        };
        if let Err(e) = commit {
            warn!(error = %e, "failed to commit remote description");
            self.reset_locked(&mut slot).await;
        }
    }

    /// Inbound `iceCandidate`: hand the candidate to the engine.
    ///
    /// Engine rejection is returned to the dispatch loop as a non-fatal
    /// handler error; it does not reset the session.
    async fn handle_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(session) => session.link().add_remote_candidate(candidate).await,
            None => Ok(()),
        }
    }

    /// Inbound `disconnect`: full reset before returning to the dispatch loop
    async fn handle_disconnect(&self) {
        info!("remote requested a session reset");
        let mut slot = self.slot.lock().await;
        self.reset_locked(&mut slot).await;
    }

    /// Run the offer sequence: create the offer, emit it on the description
    /// channel, commit it as the local description.
    ///
    /// Fail-fast: the first failing step aborts the remainder; callers
    /// decide whether that triggers a reset.
    async fn offer_flow(&self, session: &Session, ice_restart: bool) -> Result<()> {
        let offer = session.link().create_offer(ice_restart).await?;
        let payload =
            serde_json::to_string(&offer).map_err(|e| Error::Decode(format!("offer: {e}")))?;
        self.channel.emit(Tag::Description, &payload).await?;
        session.link().set_local_description(offer).await?;
        Ok(())
    }

    /// Tear down the current session and build its replacement.
    ///
    /// Callers must hold the slot lock; holding it across teardown and
    /// rebuild is what serializes resets. A second failure event arriving
    /// meanwhile is queued and later dropped as stale.
    async fn reset_locked(&self, slot: &mut Option<Session>) {
        if let Some(mut session) = slot.take() {
            info!(generation = session.generation(), "resetting peer session");
            session.close().await;
        }
        if let Err(e) = self.open_session(slot).await {
            error!(error = %e, "failed to rebuild peer session");
        }
    }

    /// Open a new session into `slot`, retrying with backoff per the
    /// configured policy, then announce the drone identity.
    async fn open_session(&self, slot: &mut Option<Session>) -> Result<()> {
        let mut attempt = 0;
        let session = loop {
            match self.try_open().await {
                Ok(session) => break session,
                Err(e) if self.retry.should_retry(attempt) => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(error = %e, attempt, "session construction failed, retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt + 1, "giving up on session construction");
                    return Err(e);
                }
            }
        };
        let generation = session.generation();
        *slot = Some(session);
        self.announce().await;
        info!(generation, "peer session active");
        Ok(())
    }

    /// One construction attempt: link, callbacks, track, relay
    async fn try_open(&self) -> Result<Session> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let link = self.engine.create_link().await?;

        let events = self.events.clone();
        link.on_link_state_changed(Box::new(move |state| {
            let _ = events.send(LinkEvent::StateChanged { generation, state });
        }));
        let events = self.events.clone();
        link.on_candidate_discovered(Box::new(move |candidate| {
            let _ = events.send(LinkEvent::CandidateDiscovered {
                generation,
                candidate,
            });
        }));

        let track = link.publish_track().await?;
        let cancel = CancellationToken::new();
        let relay = MediaRelay::new(
            Arc::clone(&self.ingest),
            track,
            cancel.clone(),
            generation,
            self.events.clone(),
        );
        let relay_task = tokio::spawn(relay.run());

        Ok(Session::new(generation, link, cancel, relay_task))
    }

    /// Announce the drone identity on the `match` channel.
    ///
    /// An emit failure is logged but does not fail session construction; the
    /// remote re-requests with `begin` once signaling recovers.
    async fn announce(&self) {
        let payload = match serde_json::to_string(&self.identity) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to serialize identity");
                return;
            }
        };
        if let Err(e) = self.channel.emit(Tag::Match, &payload).await {
            warn!(error = %e, "failed to announce identity");
        }
    }
}

fn is_current(slot: &Option<Session>, generation: u64) -> bool {
    matches!(slot, Some(session) if session.generation() == generation)
}

/// Wire the reserved signaling tags to the session manager and channel
pub async fn register_signal_handlers(
    channel: &Arc<SignalingChannel>,
    manager: &Arc<SessionManager>,
) {
    let registry = channel.registry();

    let ch = Arc::clone(channel);
    registry
        .register(Tag::Connected, move |_signal| {
            let ch = Arc::clone(&ch);
            async move { ch.emit(Tag::Connected, "Hello from drone").await }
        })
        .await;

    let mgr = Arc::clone(manager);
    registry
        .register(Tag::Begin, move |_signal| {
            let mgr = Arc::clone(&mgr);
            async move {
                mgr.handle_begin().await;
                Ok(())
            }
        })
        .await;

    registry
        .register(Tag::ClientsOnline, |_signal| async { Ok(()) })
        .await;

    registry
        .register(Tag::Message, |signal| async move {
            if let Signal::Message(text) = signal {
                info!(%text, "signaling message received");
            }
            Ok(())
        })
        .await;

    let mgr = Arc::clone(manager);
    registry
        .register(Tag::IceCandidate, move |signal| {
            let mgr = Arc::clone(&mgr);
            async move {
                match signal {
                    Signal::Candidate(candidate) => mgr.handle_remote_candidate(candidate).await,
                    _ => Ok(()),
                }
            }
        })
        .await;

    let mgr = Arc::clone(manager);
    registry
        .register(Tag::Description, move |signal| {
            let mgr = Arc::clone(&mgr);
            async move {
                if let Signal::Description(description) = signal {
                    mgr.handle_remote_description(description).await;
                }
                Ok(())
            }
        })
        .await;

    let mgr = Arc::clone(manager);
    registry
        .register(Tag::Disconnect, move |_signal| {
            let mgr = Arc::clone(&mgr);
            async move {
                mgr.handle_disconnect().await;
                Ok(())
            }
        })
        .await;
}
