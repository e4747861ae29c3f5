//! Shared harness for integration tests: an in-process WebSocket signaling
//! server and a scriptable mock connectivity engine.

#![allow(dead_code)]

use async_trait::async_trait;
use dronelink::peer::engine::{CandidateCallback, LinkStateCallback};
use dronelink::relay::bind_ingest;
use dronelink::{
    register_signal_handlers, ConnectivityEngine, DroneConfig, Envelope, Error, OutboundTrack,
    PeerLink, Result, RetryPolicy, SessionManager, SignalingChannel, TrackWriteError,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// In-process WebSocket signaling server accepting a single client
pub struct TestServer {
    pub url: String,
    frames: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl TestServer {
    pub async fn spawn() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = frames_tx.send(text);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    out = outbound_rx.recv() => match out {
                        Some(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        TestServer {
            url: format!("ws://{addr}/"),
            frames,
            outbound,
        }
    }

    /// Push a raw text frame to the connected client
    pub fn send_raw(&self, text: &str) {
        self.outbound.send(text.to_string()).unwrap();
    }

    /// Push a well-formed envelope to the connected client
    pub fn send(&self, channel: &str, data: &str) {
        let json = serde_json::to_string(&Envelope {
            channel: channel.to_string(),
            data: data.to_string(),
        })
        .unwrap();
        self.send_raw(&json);
    }

    /// Next raw text frame captured from the client
    pub async fn next_raw(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a signaling frame")
            .expect("signaling server task ended")
    }

    /// Next envelope on the given channel, skipping others (heartbeats etc.)
    pub async fn next_on(&mut self, channel: &str) -> Envelope {
        loop {
            let raw = self.next_raw().await;
            let envelope: Envelope =
                serde_json::from_str(&raw).expect("captured frame is not a valid envelope");
            if envelope.channel == channel {
                return envelope;
            }
        }
    }
}

/// Poll `condition` until it holds or a 5 second budget runs out
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Mock connectivity engine recording every link it hands out.
///
/// `barrier_violation` is set when a new link is requested while the
/// previous link's track still has a write in flight, which would mean two
/// relay loops overlapped on the shared ingest socket.
#[derive(Default)]
pub struct MockEngine {
    pub links: Mutex<Vec<Arc<MockLink>>>,
    pub failures_remaining: AtomicUsize,
    pub create_attempts: AtomicUsize,
    pub barrier_violation: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        Arc::clone(&self.links.lock().unwrap()[index])
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectivityEngine for MockEngine {
    async fn create_link(&self) -> Result<Arc<dyn PeerLink>> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Engine("mock construction failure".to_string()));
        }
        let mut links = self.links.lock().unwrap();
        if let Some(prev) = links.last() {
            if prev.track.write_in_flight.load(Ordering::SeqCst) {
                self.barrier_violation.store(true, Ordering::SeqCst);
            }
        }
        let link = Arc::new(MockLink::new(links.len() as u64));
        links.push(Arc::clone(&link));
        Ok(link)
    }
}

/// Mock peer link recording descriptions, candidates and offers
pub struct MockLink {
    pub index: u64,
    pub track: Arc<MockTrack>,
    /// ice_restart flag of every offer requested
    pub offers: Mutex<Vec<bool>>,
    pub local_descriptions: Mutex<Vec<RTCSessionDescription>>,
    pub remote_descriptions: Mutex<Vec<RTCSessionDescription>>,
    pub remote_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    pub closed: AtomicBool,
    pub fail_offers: AtomicBool,
    pub fail_remote_description: AtomicBool,
    state_callback: Mutex<Option<LinkStateCallback>>,
    candidate_callback: Mutex<Option<CandidateCallback>>,
}

impl MockLink {
    fn new(index: u64) -> Self {
        Self {
            index,
            track: Arc::new(MockTrack::default()),
            offers: Mutex::new(Vec::new()),
            local_descriptions: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_offers: AtomicBool::new(false),
            fail_remote_description: AtomicBool::new(false),
            state_callback: Mutex::new(None),
            candidate_callback: Mutex::new(None),
        }
    }

    /// Fire the engine state callback, as the real engine would from its own
    /// concurrency
    pub fn fire_state(&self, state: dronelink::LinkState) {
        if let Some(callback) = self.state_callback.lock().unwrap().as_ref() {
            callback(state);
        }
    }

    /// Fire the local-candidate callback
    pub fn fire_candidate(&self, candidate: RTCIceCandidateInit) {
        if let Some(callback) = self.candidate_callback.lock().unwrap().as_ref() {
            callback(candidate);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn publish_track(&self) -> Result<Arc<dyn OutboundTrack>> {
        Ok(Arc::clone(&self.track) as Arc<dyn OutboundTrack>)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(Error::Engine("mock offer failure".to_string()));
        }
        self.offers.lock().unwrap().push(ice_restart);
        let sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.index
        );
        let description =
            serde_json::from_value(serde_json::json!({ "type": "offer", "sdp": sdp })).unwrap();
        Ok(description)
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.local_descriptions.lock().unwrap().push(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::Engine("mock remote description failure".to_string()));
        }
        self.remote_descriptions.lock().unwrap().push(description);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.remote_candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    fn on_link_state_changed(&self, callback: LinkStateCallback) {
        *self.state_callback.lock().unwrap() = Some(callback);
    }

    fn on_candidate_discovered(&self, callback: CandidateCallback) {
        *self.candidate_callback.lock().unwrap() = Some(callback);
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.track.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock outbound track capturing every packet written into it
#[derive(Default)]
pub struct MockTrack {
    pub written: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
    pub write_in_flight: AtomicBool,
    /// Artificial write latency in milliseconds, used to hold the relay
    /// mid-write while a reset races it
    pub write_delay_ms: AtomicUsize,
}

impl MockTrack {
    pub fn written_count(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundTrack for MockTrack {
    async fn write(&self, packet: &[u8]) -> std::result::Result<(), TrackWriteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TrackWriteError::Closed);
        }
        self.write_in_flight.store(true, Ordering::SeqCst);
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.written.lock().unwrap().push(packet.to_vec());
        self.write_in_flight.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Test configuration pointed at the given signaling server
pub fn test_config(url: &str) -> DroneConfig {
    DroneConfig {
        signaling_url: url.to_string(),
        drone_id: "test-drone".to_string(),
        // keep heartbeats out of the captured frame stream
        heartbeat_secs: 600,
        session_retry: RetryPolicy {
            max_retries: 3,
            backoff_initial_ms: 10,
            backoff_max_ms: 20,
            backoff_multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// A fully wired drone: signaling server, channel, manager, mock engine
pub struct Fixture {
    pub server: TestServer,
    pub channel: Arc<SignalingChannel>,
    pub manager: Arc<SessionManager>,
    pub engine: Arc<MockEngine>,
    pub ingest_addr: SocketAddr,
}

/// Start a drone against an in-process signaling server, with the initial
/// `match` announce already consumed
pub async fn start_drone(engine: Arc<MockEngine>) -> Fixture {
    let mut server = TestServer::spawn().await;
    let config = test_config(&server.url);

    let ingest = bind_ingest(SocketAddr::from(([127, 0, 0, 1], 0)), 64 * 1024)
        .await
        .unwrap();
    let ingest_addr = ingest.local_addr().unwrap();

    let channel = Arc::new(
        SignalingChannel::connect(&config.signaling_url, config.heartbeat_interval())
            .await
            .unwrap(),
    );

    let manager = SessionManager::start(
        Arc::clone(&engine) as Arc<dyn ConnectivityEngine>,
        Arc::clone(&channel),
        Arc::new(ingest),
        &config,
    )
    .await
    .unwrap();

    register_signal_handlers(&channel, &manager).await;

    let announce = server.next_on("match").await;
    assert_eq!(announce.channel, "match");

    Fixture {
        server,
        channel,
        manager,
        engine,
        ingest_addr,
    }
}
