//! Media relay: local RTP ingestion into the active session's track

use crate::peer::engine::{OutboundTrack, TrackWriteError};
use crate::peer::manager::LinkEvent;
use crate::Result;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for one RTP-over-UDP transport unit
pub const MAX_DATAGRAM: usize = 1600;

/// Consecutive ingest read failures tolerated before the session is reset
const STALL_THRESHOLD: u32 = 10;

/// Bind the process-lifetime ingestion socket.
///
/// The receive buffer is raised well above platform defaults so short RTP
/// bursts are not dropped. The socket is bound once at startup and outlives
/// every session reset.
pub async fn bind_ingest(addr: SocketAddr, recv_buffer: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(recv_buffer)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let socket = UdpSocket::from_std(socket.into())?;
    info!(%addr, recv_buffer, "RTP ingest listener bound");
    Ok(socket)
}

/// Forwards ingest datagrams unchanged into one session's outbound track.
///
/// One relay runs per session generation. The ingestion socket allows a
/// single reader, so [`Session::close`](crate::peer::session::Session::close)
/// joins the running loop before a successor may start.
pub(crate) struct MediaRelay {
    socket: Arc<UdpSocket>,
    track: Arc<dyn OutboundTrack>,
    cancel: CancellationToken,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl MediaRelay {
    pub(crate) fn new(
        socket: Arc<UdpSocket>,
        track: Arc<dyn OutboundTrack>,
        cancel: CancellationToken,
        generation: u64,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            socket,
            track,
            cancel,
            generation,
            events,
        }
    }

    /// Run until cancelled, the track closes, or ingest reads fail
    /// persistently.
    ///
    /// A closed track is the normal end of a session. Transient read and
    /// write errors are logged and the loop continues; reads failing
    /// [`STALL_THRESHOLD`] times in a row are escalated to the session
    /// manager instead of spinning forever.
    pub(crate) async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut failed_reads = 0u32;
        debug!(generation = self.generation, "media relay started");
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(generation = self.generation, "media relay cancelled");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };
            match received {
                Ok((len, _)) => {
                    failed_reads = 0;
                    match self.track.write(&buf[..len]).await {
                        Ok(()) => {}
                        Err(TrackWriteError::Closed) => {
                            info!(
                                generation = self.generation,
                                "outbound track closed, media relay done"
                            );
                            break;
                        }
                        Err(TrackWriteError::Failed(e)) => {
                            warn!(generation = self.generation, error = %e, "track write failed");
                        }
                    }
                }
                Err(e) => {
                    failed_reads += 1;
                    warn!(generation = self.generation, error = %e, "ingest read failed");
                    if failed_reads >= STALL_THRESHOLD {
                        error!(
                            generation = self.generation,
                            "ingest reads failing persistently, escalating to session manager"
                        );
                        let _ = self.events.send(LinkEvent::RelayStalled {
                            generation: self.generation,
                        });
                        break;
                    }
                }
            }
        }
    }
}
