//! WebSocket signaling channel and dispatch registry

use crate::signaling::protocol::{Envelope, Signal, Tag};
use crate::{Error, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Boxed future returned by a signal handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Handler invoked with the decoded signal for its tag
pub type SignalHandler = Arc<dyn Fn(Signal) -> HandlerFuture + Send + Sync>;

/// Maps each signaling tag to at most one handler.
///
/// Registration replaces any prior handler for the tag; dispatching a tag
/// with no handler is a silent no-op.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<Tag, SignalHandler>>>,
}

impl HandlerRegistry {
    /// Register a handler for `tag`, replacing any existing one
    pub async fn register<F, Fut>(&self, tag: Tag, handler: F)
    where
        F: Fn(Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: SignalHandler = Arc::new(move |signal| Box::pin(handler(signal)));
        self.handlers.write().await.insert(tag, handler);
    }

    /// Invoke the handler registered for the signal's tag.
    ///
    /// Returns the handler's result; an unregistered tag yields `Ok(())`.
    pub async fn dispatch(&self, signal: Signal) -> Result<()> {
        let handler = self.handlers.read().await.get(&signal.tag()).cloned();
        match handler {
            Some(handler) => handler(signal).await,
            None => Ok(()),
        }
    }
}

/// Persistent bidirectional signaling transport.
///
/// Owns three background tasks: a writer that funnels every outbound frame
/// through one sink, a read loop that decodes and dispatches inbound frames
/// in arrival order, and a heartbeat timer.
pub struct SignalingChannel {
    tx: mpsc::UnboundedSender<Message>,
    registry: HandlerRegistry,
    shutdown: CancellationToken,
    writer_stop: CancellationToken,
    tasks: Mutex<Option<ChannelTasks>>,
}

struct ChannelTasks {
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SignalingChannel {
    /// Connect to the signaling server and start the channel's tasks.
    ///
    /// Fails with [`Error::Transport`] when the remote is unreachable or the
    /// WebSocket handshake fails.
    pub async fn connect(url: &str, heartbeat_interval: Duration) -> Result<Self> {
        info!(%url, "connecting to signaling server");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("dial {url}: {e}")))?;
        info!("signaling connection established");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = HandlerRegistry::default();
        let shutdown = CancellationToken::new();
        let writer_stop = CancellationToken::new();

        let writer = tokio::spawn(Self::write_loop(sink, rx, writer_stop.clone()));
        let reader = tokio::spawn(Self::read_loop(stream, registry.clone(), shutdown.clone()));
        let heartbeat = tokio::spawn(Self::heartbeat_loop(
            tx.clone(),
            heartbeat_interval,
            shutdown.clone(),
        ));

        Ok(Self {
            tx,
            registry,
            shutdown,
            writer_stop,
            tasks: Mutex::new(Some(ChannelTasks {
                reader,
                heartbeat,
                writer,
            })),
        })
    }

    /// Handler registry for inbound signals
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Encode an envelope and queue it for the writer.
    ///
    /// Every producer goes through the same queue and single writer task, so
    /// frames never interleave on the wire. Fails with [`Error::Transport`]
    /// once the channel is closed.
    pub async fn emit(&self, tag: Tag, payload: &str) -> Result<()> {
        let json = serde_json::to_string(&Envelope::new(tag, payload))
            .map_err(|e| Error::Decode(format!("envelope: {e}")))?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::Transport("signaling channel closed".to_string()))
    }

    /// Shut the channel down: stop the read loop and heartbeat, wait for
    /// both, then let the writer close the transport.
    ///
    /// No handler runs after this returns. Calling close twice is a no-op.
    pub async fn close(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };
        self.shutdown.cancel();
        let _ = tasks.reader.await;
        let _ = tasks.heartbeat.await;
        self.writer_stop.cancel();
        let _ = tasks.writer.await;
        info!("signaling channel closed");
    }

    async fn write_loop(
        mut sink: SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            error!(error = %e, "signaling write failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
        debug!("signaling writer stopped");
    }

    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        registry: HandlerRegistry,
        stop: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = stop.cancelled() => break,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => Self::handle_frame(&text, &registry).await,
                Some(Ok(Message::Close(_))) => {
                    info!("signaling server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "signaling read failed");
                    break;
                }
                None => {
                    info!("signaling stream ended");
                    break;
                }
            }
        }
        debug!("signaling read loop stopped");
    }

    /// Decode one inbound frame and hand it to the registry.
    ///
    /// Malformed input and handler failures are logged; neither stops the
    /// loop. The handler is awaited inline, so frames are processed strictly
    /// in arrival order.
    async fn handle_frame(text: &str, registry: &HandlerRegistry) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "discarding malformed signaling frame");
                return;
            }
        };
        let signal = match Signal::decode(&envelope) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(channel = %envelope.channel, error = %e, "discarding undecodable payload");
                return;
            }
        };
        if let Err(e) = registry.dispatch(signal).await {
            warn!(error = %e, "signal handler failed");
        }
    }

    async fn heartbeat_loop(
        tx: mpsc::UnboundedSender<Message>,
        interval: Duration,
        stop: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let Ok(json) = serde_json::to_string(&Envelope::new(Tag::ClientsOnline, "")) else {
                        continue;
                    };
                    if tx.send(Message::Text(json)).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("heartbeat stopped");
    }
}
