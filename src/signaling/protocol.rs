//! Signaling wire protocol: envelopes, tags and typed payloads

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// The tagged message unit carried over the signaling channel.
///
/// `data` is opaque at this layer; most tags carry further-encoded JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag; never empty on the wire
    pub channel: String,

    /// Tag-specific payload; may be empty
    pub data: String,
}

impl Envelope {
    /// Build an envelope for a known tag
    pub fn new(tag: Tag, data: &str) -> Self {
        Self {
            channel: tag.as_str().to_string(),
            data: data.to_string(),
        }
    }
}

/// Closed set of signaling tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Identity announcement
    Match,
    /// Session description exchange
    Description,
    /// Connectivity candidate exchange
    IceCandidate,
    /// Liveness heartbeat
    ClientsOnline,
    /// Remote requests an offer
    Begin,
    /// Handshake acknowledgment
    Connected,
    /// Free-form diagnostic text
    Message,
    /// Remote requests a full session reset
    Disconnect,
}

impl Tag {
    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Match => "match",
            Tag::Description => "description",
            Tag::IceCandidate => "iceCandidate",
            Tag::ClientsOnline => "clientsOnline",
            Tag::Begin => "begin",
            Tag::Connected => "connected",
            Tag::Message => "message",
            Tag::Disconnect => "disconnect",
        }
    }

    /// Parse a wire tag. `msg` is accepted as an alias for `message`.
    pub fn parse(s: &str) -> Option<Tag> {
        Some(match s {
            "match" => Tag::Match,
            "description" => Tag::Description,
            "iceCandidate" => Tag::IceCandidate,
            "clientsOnline" => Tag::ClientsOnline,
            "begin" => Tag::Begin,
            "connected" => Tag::Connected,
            "message" | "msg" => Tag::Message,
            "disconnect" => Tag::Disconnect,
            _ => return None,
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity announced on the `match` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Peer role; this process always announces `drone`
    #[serde(rename = "type")]
    pub kind: String,

    /// Peer id
    pub id: String,
}

impl Identity {
    /// Drone identity with the given id
    pub fn drone(id: &str) -> Self {
        Self {
            kind: "drone".to_string(),
            id: id.to_string(),
        }
    }
}

/// A decoded inbound signal: each tag paired with its payload type.
///
/// Decoding validates payloads syntactically only; their semantics belong
/// to the connectivity engine.
#[derive(Debug, Clone)]
pub enum Signal {
    /// Handshake acknowledgment with free-form text
    Connected(String),
    /// The remote viewer wants an offer
    Begin,
    /// Liveness echo
    ClientsOnline,
    /// Diagnostic text
    Message(String),
    /// Peer identity announcement
    Match(Identity),
    /// Remote connectivity candidate
    Candidate(RTCIceCandidateInit),
    /// Remote session description
    Description(RTCSessionDescription),
    /// Full session reset request
    Disconnect,
}

impl Signal {
    /// The tag this signal travels under
    pub fn tag(&self) -> Tag {
        match self {
            Signal::Connected(_) => Tag::Connected,
            Signal::Begin => Tag::Begin,
            Signal::ClientsOnline => Tag::ClientsOnline,
            Signal::Message(_) => Tag::Message,
            Signal::Match(_) => Tag::Match,
            Signal::Candidate(_) => Tag::IceCandidate,
            Signal::Description(_) => Tag::Description,
            Signal::Disconnect => Tag::Disconnect,
        }
    }

    /// Decode an envelope into its typed signal.
    ///
    /// Unknown tags and undecodable payloads fail here, before any handler
    /// sees the frame.
    pub fn decode(envelope: &Envelope) -> Result<Signal> {
        let tag = Tag::parse(&envelope.channel)
            .ok_or_else(|| Error::Decode(format!("unknown channel '{}'", envelope.channel)))?;
        Ok(match tag {
            Tag::Connected => Signal::Connected(envelope.data.clone()),
            Tag::Begin => Signal::Begin,
            Tag::ClientsOnline => Signal::ClientsOnline,
            Tag::Message => Signal::Message(envelope.data.clone()),
            Tag::Match => Signal::Match(
                serde_json::from_str(&envelope.data)
                    .map_err(|e| Error::Decode(format!("identity: {e}")))?,
            ),
            Tag::IceCandidate => Signal::Candidate(
                serde_json::from_str(&envelope.data)
                    .map_err(|e| Error::Decode(format!("candidate: {e}")))?,
            ),
            Tag::Description => Signal::Description(
                serde_json::from_str(&envelope.data)
                    .map_err(|e| Error::Decode(format!("description: {e}")))?,
            ),
            Tag::Disconnect => Signal::Disconnect,
        })
    }
}
