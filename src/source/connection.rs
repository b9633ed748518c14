//! Persistent WebSocket connection to the Gotify stream

use crate::config::SourceConfig;
use crate::error::{RelayError, Result};
use crate::source::{Event, SourceClient};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A session with no inbound frame (data or ping) for this long is dropped
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Session {
    state: ConnectionState,
    sink: Option<SplitSink<WsStream, Message>>,
}

/// Owns the single stream connection: dial, read, reconnect, close
///
/// Decoded events go to a bounded channel so a slow consumer applies
/// backpressure to the read loop without stalling keepalive handling.
pub struct ConnectionManager {
    endpoint: Url,
    has_token: bool,
    handshake_timeout: Duration,
    retry_delay: Duration,
    read_deadline: Duration,
    session: Mutex<Session>,
    cancel: CancellationToken,
    events: mpsc::Sender<Event>,
    errors: mpsc::Sender<RelayError>,
    dial_attempts: AtomicU64,
}

impl ConnectionManager {
    /// Build a manager for `client`'s stream whose lifetime is bounded by `parent`
    pub fn new(
        client: &SourceClient,
        config: &SourceConfig,
        parent: &CancellationToken,
        events: mpsc::Sender<Event>,
        errors: mpsc::Sender<RelayError>,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: client.stream_url()?,
            has_token: !client.token().is_empty(),
            handshake_timeout: config.handshake_timeout(),
            retry_delay: config.retry_delay(),
            read_deadline: READ_DEADLINE,
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                sink: None,
            }),
            cancel: parent.child_token(),
            events,
            errors,
            dial_attempts: AtomicU64::new(0),
        })
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    /// Completed dial attempts, successful or not
    pub fn dial_attempts(&self) -> u64 {
        self.dial_attempts.load(Ordering::SeqCst)
    }

    /// Maintain the connection until cancelled
    ///
    /// Dial failures sleep `retry_delay` before the next attempt; a session
    /// that ends after connecting is redialled straight away.
    pub async fn run(&self) {
        tracing::debug!(host = ?self.endpoint.host_str(), "Starting Gotify stream client");

        while !self.cancel.is_cancelled() {
            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::error!(
                        error = %e,
                        retry_in_secs = self.retry_delay.as_secs_f32(),
                        "Failed to connect to Gotify server"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => continue,
                    }
                }
            };

            if let Err(e) = self.read_messages(stream).await {
                tracing::error!(error = %e, "Error reading messages from Gotify stream");
            }

            let mut session = self.session.lock().await;
            session.state = ConnectionState::Disconnected;
            // On cancellation the sink stays for close() to send the close frame
            if !self.cancel.is_cancelled() {
                session.sink = None;
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        tracing::info!("Context cancelled, Gotify stream client shut down");
    }

    /// Send a normal-closure frame and stop the manager; safe to call twice
    ///
    /// Cancelling first unblocks a dial that holds the session lock; `run`
    /// leaves the sink in place once cancelled, so the frame is still sent.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();

        let mut session = self.session.lock().await;
        session.state = ConnectionState::Disconnected;
        if let Some(mut sink) = session.sink.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                tracing::warn!(error = %e, "Error sending close message");
            }
            sink.close()
                .await
                .map_err(|e| RelayError::Connection(format!("error closing connection: {}", e)))?;
            tracing::debug!("WebSocket connection closed");
        }
        Ok(())
    }

    async fn set_state(&self, state: ConnectionState) {
        self.session.lock().await.state = state;
    }

    async fn connect(&self) -> Result<SplitStream<WsStream>> {
        let mut session = self.session.lock().await;
        session.state = ConnectionState::Connecting;

        let ws = match self.dial().await {
            Ok(ws) => ws,
            Err(e) => {
                session.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let (sink, stream) = ws.split();
        session.sink = Some(sink);
        session.state = ConnectionState::Connected;

        tracing::info!(
            protocol = %self.endpoint.scheme(),
            host = ?self.endpoint.host_str(),
            "Connected to Gotify server"
        );
        Ok(stream)
    }

    async fn dial(&self) -> Result<WsStream> {
        if !self.has_token {
            return Err(RelayError::Connection(
                "gotify client token is not set".to_string(),
            ));
        }

        let dial = tokio::time::timeout(self.handshake_timeout, connect_async(self.endpoint.as_str()));
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(RelayError::Connection("dial cancelled".to_string()));
            }
            result = dial => result,
        };
        self.dial_attempts.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(RelayError::Connection(format!("failed to connect: {}", e))),
            Err(_) => Err(RelayError::Connection(format!(
                "handshake timed out after {}s",
                self.handshake_timeout.as_secs()
            ))),
        }
    }

    async fn read_messages(&self, mut stream: SplitStream<WsStream>) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = tokio::time::timeout(self.read_deadline, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    return Err(RelayError::Connection(format!(
                        "no frame received within {}s",
                        self.read_deadline.as_secs()
                    )));
                }
                Ok(None) => {
                    return Err(RelayError::Connection("stream ended unexpectedly".to_string()));
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    if let Err(e) = self.forward(text.as_str()).await {
                        if self.cancel.is_cancelled() {
                            return Ok(());
                        }
                        tracing::error!(error = %e, "Failed to process stream frame");
                        self.report(e);
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {
                    tracing::trace!("Keepalive frame received, read deadline reset");
                }
                Message::Close(frame) => {
                    return match frame {
                        Some(f) if f.code != CloseCode::Normal && f.code != CloseCode::Away => {
                            Err(RelayError::Connection(format!(
                                "unexpected close (code {}): {}",
                                u16::from(f.code),
                                f.reason.as_str()
                            )))
                        }
                        _ => {
                            tracing::info!("Gotify server closed the stream");
                            Ok(())
                        }
                    };
                }
                Message::Binary(_) | Message::Frame(_) => {
                    tracing::debug!("Ignoring non-text stream frame");
                }
            }
        }
    }

    async fn forward(&self, text: &str) -> Result<()> {
        let event: Event = serde_json::from_str(text)?;
        tracing::debug!(id = event.id, app_id = event.app_id, "Event received from Gotify");

        tokio::select! {
            _ = self.cancel.cancelled() => Err(RelayError::Internal("cancelled".to_string())),
            sent = self.events.send(event) => {
                sent.map_err(|_| RelayError::Internal("event channel closed".to_string()))
            }
        }
    }

    fn report(&self, error: RelayError) {
        if let Err(e) = self.errors.try_send(error) {
            tracing::warn!(error = %e, "Error channel unavailable, dropping stream error");
        }
    }
}
