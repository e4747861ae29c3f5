//! Production connectivity engine over the webrtc crate

use crate::peer::engine::{
    CandidateCallback, ConnectivityEngine, LinkState, LinkStateCallback, OutboundTrack, PeerLink,
    TrackWriteError,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// Connectivity engine backed by the webrtc crate.
///
/// The API object (codecs + interceptors) is built once and reused for every
/// link the engine creates.
pub struct WebRtcEngine {
    api: API,
    rtc_config: RTCConfiguration,
}

impl WebRtcEngine {
    /// Build the engine with default codecs, default interceptors and the
    /// given STUN servers.
    pub fn new(stun_servers: &[String]) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Engine(format!("register codecs: {e}")))?;

        let interceptors = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Engine(format!("register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: stun_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        Ok(Self { api, rtc_config })
    }
}

#[async_trait]
impl ConnectivityEngine for WebRtcEngine {
    async fn create_link(&self) -> Result<Arc<dyn PeerLink>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_config.clone())
            .await
            .map_err(|e| Error::Engine(format!("create peer connection: {e}")))?;
        info!("created peer connection");
        Ok(Arc::new(WebRtcLink { pc: Arc::new(pc) }))
    }
}

/// Peer link wrapping an RTCPeerConnection
struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn publish_track(&self) -> Result<Arc<dyn OutboundTrack>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "drone".to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Engine(format!("add track: {e}")))?;

        // Drain RTCP from the sender so the interceptors keep running; the
        // loop ends when the connection closes.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(Arc::new(WebRtcTrack { track }))
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<RTCSessionDescription> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        self.pc
            .create_offer(options)
            .await
            .map_err(|e| Error::Engine(format!("create offer: {e}")))
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| Error::Engine(format!("set local description: {e}")))
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| Error::Engine(format!("set remote description: {e}")))
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::Engine(format!("add candidate: {e}")))
    }

    fn on_link_state_changed(&self, callback: LinkStateCallback) {
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                debug!(%state, "ICE connection state changed");
                callback(map_ice_state(state));
                Box::pin(async {})
            }));
    }

    fn on_candidate_discovered(&self, callback: CandidateCallback) {
        let callback = Arc::new(callback);
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => callback(init),
                        Err(e) => warn!(error = %e, "failed to serialize discovered candidate"),
                    }
                })
            }));
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::Engine(format!("close peer connection: {e}")))
    }
}

/// Outbound RTP track; relay bytes are written through unchanged
struct WebRtcTrack {
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl OutboundTrack for WebRtcTrack {
    async fn write(&self, packet: &[u8]) -> std::result::Result<(), TrackWriteError> {
        match self.track.write(packet).await {
            Ok(_) => Ok(()),
            Err(webrtc::Error::ErrClosedPipe) => Err(TrackWriteError::Closed),
            Err(e) => Err(TrackWriteError::Failed(e.to_string())),
        }
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> LinkState {
    match state {
        RTCIceConnectionState::Checking => LinkState::Checking,
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => LinkState::Connected,
        RTCIceConnectionState::Disconnected => LinkState::Disconnected,
        RTCIceConnectionState::Failed => LinkState::Failed,
        RTCIceConnectionState::Closed => LinkState::Closed,
        _ => LinkState::New,
    }
}
