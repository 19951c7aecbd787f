//! Transport seam and the tokio-tungstenite implementation.
//!
//! A transport turns an endpoint into a `TransportHandle` and reports what
//! happens on the socket through an `EventSink`. Events for one handle are
//! emitted in order: `Open`, any number of `Frame`s, optionally `Error`,
//! then exactly one `Close`.

use crate::connection::Shared;
use crate::error::{WsError, WsResult};
use crate::handle::{
    ReadyState, TransportHandle, TransportLink, WsOutbound, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Weak;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tracing::{debug, warn};

/// How long to wait for the peer to acknowledge our close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifier of one transport handle within a connector.
pub type HandleId = u64;

/// Something that happened on a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed; the socket is open.
    Open,
    /// Text frame received.
    Frame(String),
    /// Transport-level failure. A `Close` follows.
    Error(WsError),
    /// Socket closed, by either side.
    Close { code: u16, reason: String },
}

/// Delivers transport events to the connector that opened the handle.
///
/// Holds only a weak reference: events emitted after the connector is
/// dropped are discarded.
#[derive(Clone)]
pub struct EventSink {
    handle_id: HandleId,
    target: Weak<Shared>,
}

impl EventSink {
    pub(crate) fn new(handle_id: HandleId, target: Weak<Shared>) -> Self {
        Self { handle_id, target }
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Report an event. Must not be called from inside `Transport::open`.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(shared) = self.target.upgrade() {
            shared.handle_event(self.handle_id, event);
        }
    }

    /// Check if the owning connector still exists.
    pub fn is_attached(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("handle_id", &self.handle_id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Opens transport handles.
///
/// `open` runs while the connector's state is locked. It must return
/// promptly and deliver every event asynchronously through `sink`.
/// Returning `Err` is a synchronous construction failure.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    fn open(&self, endpoint: &str, sink: EventSink) -> WsResult<TransportHandle>;
}

/// Check that an endpoint is a well-formed `ws://` or `wss://` address.
pub fn validate_endpoint(endpoint: &str) -> WsResult<()> {
    let request = endpoint
        .into_client_request()
        .map_err(|e| WsError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => Ok(()),
        other => Err(WsError::InvalidEndpoint(format!(
            "{endpoint}: unsupported scheme {}",
            other.unwrap_or("<none>")
        ))),
    }
}

/// WebSocket transport over tokio-tungstenite.
///
/// Each handle is driven by its own task on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    disable_nagle: bool,
}

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self {
            // TCP_NODELAY: broadcast events are small and latency-sensitive
            disable_nagle: true,
        }
    }
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, endpoint: &str, sink: EventSink) -> WsResult<TransportHandle> {
        let request = endpoint.into_client_request()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WsError::NoRuntime)?;

        let (handle, link) = TransportHandle::channel();
        runtime.spawn(run_transport(request, link, sink, self.disable_nagle));
        Ok(handle)
    }
}

async fn run_transport(request: Request, mut link: TransportLink, sink: EventSink, nodelay: bool) {
    let handle_id = sink.handle_id();

    let connected = tokio::select! {
        result = connect_async_tls_with_config(request, None, nodelay, None) => result,
        command = link.recv() => {
            // Closed (or handle dropped) before the handshake finished
            let (code, reason) = match command {
                Some(WsOutbound::Close { code, reason }) => (code, reason),
                _ => (NORMAL_CLOSURE, "handle dropped".to_string()),
            };
            debug!(handle_id, code, %reason, "Transport closed while connecting");
            link.set_ready(ReadyState::Closed);
            sink.emit(TransportEvent::Close { code, reason });
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            link.set_ready(ReadyState::Closed);
            sink.emit(TransportEvent::Error(e.into()));
            sink.emit(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: "connection failed".to_string(),
            });
            return;
        }
    };

    link.set_ready(ReadyState::Open);
    sink.emit(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    let (code, reason) = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        sink.emit(TransportEvent::Frame(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        sink.emit(TransportEvent::Frame(String::from_utf8_lossy(&data).into_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((NORMAL_CLOSURE, String::new()));
                        link.set_ready(ReadyState::Closing);
                        // Flush the close reply queued by tungstenite
                        let _ = write.close().await;
                        break (code, reason);
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        sink.emit(TransportEvent::Error(e.into()));
                        break (ABNORMAL_CLOSURE, "read error".to_string());
                    }
                    None => {
                        break (ABNORMAL_CLOSURE, "stream ended".to_string());
                    }
                }
            }

            command = link.recv() => {
                match command {
                    Some(WsOutbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            sink.emit(TransportEvent::Error(e.into()));
                            break (ABNORMAL_CLOSURE, "write error".to_string());
                        }
                    }
                    Some(WsOutbound::Close { code, reason }) => {
                        link.set_ready(ReadyState::Closing);
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!(handle_id, ?e, "Failed to send close frame");
                        } else {
                            wait_for_close_ack(&mut read).await;
                        }
                        break (code, reason);
                    }
                    None => {
                        // Handle dropped without an explicit close
                        link.set_ready(ReadyState::Closing);
                        if let Err(e) = write.send(Message::Close(None)).await {
                            warn!(handle_id, ?e, "Failed to send close frame for dropped handle");
                        }
                        break (NORMAL_CLOSURE, "handle dropped".to_string());
                    }
                }
            }
        }
    };

    link.set_ready(ReadyState::Closed);
    sink.emit(TransportEvent::Close { code, reason });
}

/// Drain the read half until the peer echoes our close, bounded in time.
async fn wait_for_close_ack<S>(read: &mut S)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let drained = tokio::time::timeout(CLOSE_ACK_TIMEOUT, async {
        while let Some(Ok(msg)) = read.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("Peer did not acknowledge close in time");
    }
}
