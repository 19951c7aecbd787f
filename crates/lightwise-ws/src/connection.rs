//! Stream connector: connection lifecycle, message ingest and outbound send.
//!
//! The connector keeps one persistent WebSocket connection to a broadcast
//! endpoint and recovers from transport failures on its own. Reconnection
//! uses a fixed delay, not exponential backoff, and retries indefinitely
//! until `disconnect()` is called or the endpoint is unset.
//!
//! All state changes are serialized through one mutex: public calls,
//! transport events and reconnect timer firings each take the lock for one
//! discrete reaction, so they never interleave.

use crate::error::{WsError, WsResult};
use crate::handle::{TransportHandle, NORMAL_CLOSURE};
use crate::message::{InboundMessage, MessageHistory, DEFAULT_MAX_MESSAGES};
use crate::transport::{
    validate_endpoint, EventSink, HandleId, Transport, TransportEvent, TungsteniteTransport,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Close reason sent on a caller-initiated disconnect.
const CLIENT_DISCONNECT_REASON: &str = "client disconnect";

/// Capacity of the connector event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connector options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOptions {
    /// Reconnect automatically after the transport closes.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Fixed delay before each reconnect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Message history cap.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Verbose per-event diagnostic logging. No behavioral effect.
    #[serde(default)]
    pub debug: bool,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1500
}

fn default_max_messages() -> usize {
    DEFAULT_MAX_MESSAGES
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_messages: default_max_messages(),
            debug: false,
        }
    }
}

impl ConnectorOptions {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No endpoint configured.
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification published to connector subscribers.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A frame was received and normalized.
    Message(InboundMessage),
}

/// Mutable connector state, guarded by `Shared::inner`.
struct ConnectorState {
    endpoint: Option<String>,
    state: ConnectionState,
    /// Current transport handle. At most one exists at a time.
    handle: Option<TransportHandle>,
    /// Id of the most recently issued handle. Events from older handles are stale.
    latest_handle_id: HandleId,
    next_handle_id: HandleId,
    /// Set by `disconnect()`, cleared at the start of every connect attempt.
    manual_close: bool,
    last_error: Option<Arc<WsError>>,
    latest: Option<InboundMessage>,
    history: MessageHistory,
    next_seq: u64,
    reconnect_timer: Option<CancellationToken>,
    /// Attempts started by the reconnect timer.
    reconnect_attempts: u64,
}

/// State shared between the connector, its transport tasks and its timer.
pub(crate) struct Shared {
    options: ConnectorOptions,
    transport: Arc<dyn Transport>,
    inner: Mutex<ConnectorState>,
    events: broadcast::Sender<ConnectorEvent>,
}

impl Shared {
    fn set_state(&self, inner: &mut ConnectorState, state: ConnectionState) {
        if inner.state == state {
            return;
        }
        debug!(from = %inner.state, to = %state, "Connection state changed");
        inner.state = state;
        // No subscribers is fine
        let _ = self.events.send(ConnectorEvent::StateChanged(state));
    }

    fn connect_locked(self: &Arc<Self>, inner: &mut ConnectorState) {
        let Some(endpoint) = inner.endpoint.clone() else {
            self.set_state(inner, ConnectionState::Idle);
            return;
        };

        // Already open or opening: nothing to do
        if inner.handle.as_ref().is_some_and(TransportHandle::is_live) {
            if self.options.debug {
                debug!(handle_id = inner.latest_handle_id, "connect() ignored, handle is live");
            }
            return;
        }

        inner.manual_close = false;
        Self::clear_reconnect_timer(inner);
        inner.last_error = None;
        self.set_state(inner, ConnectionState::Connecting);

        // A handle that errored but has not reported close yet is replaced, not orphaned
        if let Some(stale) = inner.handle.take() {
            stale.close(NORMAL_CLOSURE, "superseded");
        }

        let handle_id = inner.next_handle_id;
        inner.next_handle_id += 1;
        inner.latest_handle_id = handle_id;

        let sink = EventSink::new(handle_id, Arc::downgrade(self));
        let opened = validate_endpoint(&endpoint).and_then(|()| self.transport.open(&endpoint, sink));

        match opened {
            Ok(handle) => {
                info!(url = %endpoint, handle_id, "Connecting to stream endpoint");
                inner.handle = Some(handle);
            }
            Err(e) => {
                warn!(url = %endpoint, error = %e, "Failed to create transport");
                inner.last_error = Some(Arc::new(e));
                self.set_state(inner, ConnectionState::Error);
            }
        }
    }

    fn disconnect_locked(&self, inner: &mut ConnectorState) {
        inner.manual_close = true;
        Self::clear_reconnect_timer(inner);

        if let Some(handle) = inner.handle.take() {
            info!(handle_id = inner.latest_handle_id, "Closing stream connection");
            handle.close(NORMAL_CLOSURE, CLIENT_DISCONNECT_REASON);
        }

        let state = if inner.endpoint.is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Idle
        };
        self.set_state(inner, state);
    }

    fn clear_reconnect_timer(inner: &mut ConnectorState) {
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.cancel();
        }
    }

    fn arm_reconnect_timer(self: &Arc<Self>, inner: &mut ConnectorState) {
        Self::clear_reconnect_timer(inner);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime available, reconnect not scheduled");
                return;
            }
        };

        let token = CancellationToken::new();
        let timer = token.clone();
        let delay = self.options.reconnect_delay();
        let target = Arc::downgrade(self);

        runtime.spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(shared) = target.upgrade() {
                        shared.on_reconnect_timer(&timer);
                    }
                }
            }
        });

        info!(delay_ms = self.options.reconnect_delay_ms, "Reconnect scheduled");
        inner.reconnect_timer = Some(token);
    }

    fn on_reconnect_timer(self: &Arc<Self>, timer: &CancellationToken) {
        let mut inner = self.inner.lock();
        // Cancelled between expiry and acquiring the lock
        if timer.is_cancelled() {
            return;
        }
        inner.reconnect_timer = None;
        inner.reconnect_attempts += 1;
        self.connect_locked(&mut inner);
    }

    /// Apply one transport event.
    pub(crate) fn handle_event(self: &Arc<Self>, handle_id: HandleId, event: TransportEvent) {
        let mut inner = self.inner.lock();
        // Open, frame and error events only count while the handle is current
        let current = inner.handle.is_some() && inner.latest_handle_id == handle_id;

        match event {
            TransportEvent::Close { code, reason } => {
                self.on_close(&mut inner, handle_id, code, reason);
            }
            _ if !current => {
                if self.options.debug {
                    debug!(handle_id, "Ignoring event from inactive handle");
                }
            }
            TransportEvent::Open => {
                if self.options.debug {
                    debug!(handle_id, "connected");
                }
                inner.last_error = None;
                self.set_state(&mut inner, ConnectionState::Connected);
            }
            TransportEvent::Frame(text) => self.on_frame(&mut inner, &text),
            TransportEvent::Error(e) => {
                if self.options.debug {
                    debug!(handle_id, error = %e, "error");
                }
                inner.last_error = Some(Arc::new(e));
                self.set_state(&mut inner, ConnectionState::Error);
            }
        }
    }

    fn on_frame(&self, inner: &mut ConnectorState, text: &str) {
        let message = InboundMessage::from_frame(inner.next_seq, text);
        inner.next_seq += 1;

        if self.options.debug {
            debug!(seq = message.seq, raw = message.payload.is_raw(), "Frame received");
        }

        inner.history.push(message.clone());
        inner.latest = Some(message.clone());
        let _ = self.events.send(ConnectorEvent::Message(message));
    }

    fn on_close(
        self: &Arc<Self>,
        inner: &mut ConnectorState,
        handle_id: HandleId,
        code: u16,
        reason: String,
    ) {
        // A newer handle has been issued since; leave it alone
        if handle_id != inner.latest_handle_id {
            if self.options.debug {
                debug!(handle_id, code, %reason, "Ignoring close from superseded handle");
            }
            return;
        }

        if self.options.debug {
            debug!(handle_id, code, %reason, "closed");
        }
        // Released by disconnect(), which already settled the state
        if inner.handle.take().is_none() || inner.manual_close {
            return;
        }

        warn!(code, %reason, "Stream connection closed");
        self.set_state(inner, ConnectionState::Disconnected);

        if self.options.auto_reconnect {
            self.arm_reconnect_timer(inner);
        }
    }

    fn send_text_locked(&self, inner: &mut ConnectorState, text: String) -> bool {
        let Some(handle) = inner.handle.as_ref().filter(|h| h.is_open()) else {
            return false;
        };

        match handle.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send frame");
                inner.last_error = Some(Arc::new(e));
                false
            }
        }
    }
}

/// Resilient WebSocket stream connector.
///
/// Creating a connector with an endpoint starts connecting immediately;
/// this requires a tokio runtime, otherwise the connector starts in the
/// `Error` state. Dropping the connector disconnects it.
///
/// ```ignore
/// let connector = StreamConnector::new(Some(url), ConnectorOptions::default());
/// let mut events = connector.subscribe();
/// while let Ok(event) = events.recv().await {
///     if let ConnectorEvent::Message(msg) = event {
///         println!("{}", msg.payload.to_value());
///     }
/// }
/// ```
pub struct StreamConnector {
    shared: Arc<Shared>,
}

impl StreamConnector {
    /// Create a connector using the WebSocket transport.
    pub fn new(endpoint: Option<String>, options: ConnectorOptions) -> Self {
        Self::with_transport(endpoint, options, Arc::new(TungsteniteTransport::new()))
    }

    /// Create a connector with a custom transport.
    pub fn with_transport(
        endpoint: Option<String>,
        options: ConnectorOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let endpoint = normalize_endpoint(endpoint);
        let state = if endpoint.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Idle
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            inner: Mutex::new(ConnectorState {
                endpoint,
                state,
                handle: None,
                latest_handle_id: 0,
                next_handle_id: 1,
                manual_close: false,
                last_error: None,
                latest: None,
                history: MessageHistory::new(options.max_messages),
                next_seq: 0,
                reconnect_timer: None,
                reconnect_attempts: 0,
            }),
            options,
            transport,
            events,
        });

        let connector = Self { shared };
        connector.connect();
        connector
    }

    /// Open the connection if it is not already open or opening.
    ///
    /// Clears the manual-close flag and any remembered error. Construction
    /// failures are recorded as the `Error` state, never returned.
    pub fn connect(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.connect_locked(&mut inner);
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.disconnect_locked(&mut inner);
    }

    /// Switch to a different endpoint, or unset it.
    ///
    /// Tears down the current connection first. With `None` the connector
    /// becomes `Idle`; otherwise it connects to the new endpoint.
    pub fn set_endpoint(&self, endpoint: Option<String>) {
        let endpoint = normalize_endpoint(endpoint);
        let mut inner = self.shared.inner.lock();
        if inner.endpoint == endpoint {
            return;
        }

        self.shared.disconnect_locked(&mut inner);
        inner.endpoint = endpoint;

        if inner.endpoint.is_some() {
            self.shared.connect_locked(&mut inner);
        } else {
            self.shared.set_state(&mut inner, ConnectionState::Idle);
        }
    }

    /// Serialize `payload` as JSON and send it.
    ///
    /// Returns `false` without side effects when the connection is not
    /// open. Serialization and hand-off failures are recorded as the last
    /// error and also return `false`; the connection state is unchanged.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let mut inner = self.shared.inner.lock();
        if !inner.handle.as_ref().is_some_and(TransportHandle::is_open) {
            return false;
        }

        match serde_json::to_string(payload) {
            Ok(text) => self.shared.send_text_locked(&mut inner, text),
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound payload");
                inner.last_error = Some(Arc::new(WsError::Json(e)));
                false
            }
        }
    }

    /// Send pre-encoded text with the same gating as `send`.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let mut inner = self.shared.inner.lock();
        self.shared.send_text_locked(&mut inner, text.into())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Check if frames can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Most recent failure, cleared on every connect attempt and on open.
    pub fn last_error(&self) -> Option<Arc<WsError>> {
        self.shared.inner.lock().last_error.clone()
    }

    /// Most recently received message.
    pub fn last_message(&self) -> Option<InboundMessage> {
        self.shared.inner.lock().latest.clone()
    }

    /// Message history, newest first.
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.shared.inner.lock().history.to_vec()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.shared.inner.lock().endpoint.clone()
    }

    /// Check if a reconnect attempt is pending.
    pub fn reconnect_pending(&self) -> bool {
        self.shared.inner.lock().reconnect_timer.is_some()
    }

    /// Number of attempts started by the reconnect timer. Caller-initiated
    /// connects are not counted.
    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.inner.lock().reconnect_attempts
    }

    /// Subscribe to state changes and received messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the connector reaches `target`, or the channel closes.
    pub async fn wait_for_state(&self, target: ConnectionState) -> WsResult<()> {
        let mut events = self.subscribe();
        if self.state() == target {
            return Ok(());
        }
        loop {
            match events.recv().await {
                Ok(ConnectorEvent::StateChanged(state)) if state == target => return Ok(()),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.state() == target {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(WsError::ConnectionFailed(
                        "connector event channel closed".to_string(),
                    ))
                }
            }
        }
    }
}

impl Drop for StreamConnector {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("StreamConnector")
            .field("endpoint", &inner.endpoint)
            .field("state", &inner.state)
            .field("messages", &inner.history.len())
            .finish()
    }
}

/// Blank endpoints count as unset.
fn normalize_endpoint(endpoint: Option<String>) -> Option<String> {
    endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ReadyState, TransportLink, WsOutbound};
    use crate::transport::MockTransport;
    use serde_json::json;

    const URL: &str = "ws://127.0.0.1:9001/prod";

    /// Transport that records every open and lets the test drive events.
    #[derive(Default)]
    struct FakeTransport {
        opened: Mutex<Vec<(EventSink, TransportLink)>>,
    }

    impl Transport for FakeTransport {
        fn open(&self, _endpoint: &str, sink: EventSink) -> WsResult<TransportHandle> {
            let (handle, link) = TransportHandle::channel();
            self.opened.lock().push((sink, link));
            Ok(handle)
        }
    }

    impl FakeTransport {
        fn open_count(&self) -> usize {
            self.opened.lock().len()
        }

        fn sink(&self, index: usize) -> EventSink {
            self.opened.lock()[index].0.clone()
        }

        fn latest_sink(&self) -> EventSink {
            let opened = self.opened.lock();
            opened.last().expect("no handle opened").0.clone()
        }

        fn set_ready(&self, index: usize, state: ReadyState) {
            self.opened.lock()[index].1.set_ready(state);
        }

        fn live_count(&self) -> usize {
            self.opened
                .lock()
                .iter()
                .filter(|(_, link)| {
                    matches!(link.ready_state(), ReadyState::Connecting | ReadyState::Open)
                })
                .count()
        }

        /// Complete the handshake of the most recent handle.
        fn accept(&self) {
            let index = self.open_count() - 1;
            self.set_ready(index, ReadyState::Open);
            self.sink(index).emit(TransportEvent::Open);
        }

        /// Server-side close of the most recent handle.
        fn drop_connection(&self) {
            let index = self.open_count() - 1;
            self.set_ready(index, ReadyState::Closed);
            self.sink(index).emit(TransportEvent::Close {
                code: 1006,
                reason: "stream ended".to_string(),
            });
        }

        fn frame(&self, text: &str) {
            self.latest_sink()
                .emit(TransportEvent::Frame(text.to_string()));
        }

        fn outbound(&self, index: usize) -> Vec<WsOutbound> {
            let mut opened = self.opened.lock();
            let link = &mut opened[index].1;
            std::iter::from_fn(|| link.try_recv()).collect()
        }
    }

    fn options() -> ConnectorOptions {
        ConnectorOptions::default()
    }

    fn connector_with(options: ConnectorOptions) -> (StreamConnector, Arc<FakeTransport>) {
        let transport = Arc::new(FakeTransport::default());
        let connector =
            StreamConnector::with_transport(Some(URL.to_string()), options, transport.clone());
        (connector, transport)
    }

    fn connected(options: ConnectorOptions) -> (StreamConnector, Arc<FakeTransport>) {
        let (connector, transport) = connector_with(options);
        transport.accept();
        assert_eq!(connector.state(), ConnectionState::Connected);
        (connector, transport)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn drain_states(rx: &mut broadcast::Receiver<ConnectorEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ConnectorEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        states
    }

    #[test]
    fn test_default_options() {
        let options = ConnectorOptions::default();
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_delay_ms, 1500);
        assert_eq!(options.max_messages, 50);
        assert!(!options.debug);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ConnectorOptions = serde_json::from_value(json!({"max_messages": 5})).unwrap();
        assert_eq!(options.max_messages, 5);
        assert!(options.auto_reconnect);
        assert_eq!(options.reconnect_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(
            serde_json::to_value(ConnectionState::Connected).unwrap(),
            json!("connected")
        );
    }

    #[test]
    fn test_unset_endpoint_is_idle() {
        let mut transport = MockTransport::new();
        transport.expect_open().never();

        let connector = StreamConnector::with_transport(None, options(), Arc::new(transport));
        assert_eq!(connector.state(), ConnectionState::Idle);
        assert!(!connector.send(&json!({"action": "broadcast"})));

        connector.connect();
        connector.disconnect();
        assert_eq!(connector.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_blank_endpoint_counts_as_unset() {
        let mut transport = MockTransport::new();
        transport.expect_open().never();

        let connector =
            StreamConnector::with_transport(Some("   ".to_string()), options(), Arc::new(transport));
        assert_eq!(connector.state(), ConnectionState::Idle);
        assert_eq!(connector.endpoint(), None);
    }

    #[test]
    fn test_construction_failure_sets_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .times(1)
            .returning(|_, _| Err(WsError::NoRuntime));

        let connector =
            StreamConnector::with_transport(Some(URL.to_string()), options(), Arc::new(transport));
        assert_eq!(connector.state(), ConnectionState::Error);
        assert!(matches!(
            connector.last_error().as_deref(),
            Some(WsError::NoRuntime)
        ));
        assert!(!connector.reconnect_pending());
    }

    #[test]
    fn test_malformed_endpoint_never_reaches_transport() {
        let mut transport = MockTransport::new();
        transport.expect_open().never();

        let connector = StreamConnector::with_transport(
            Some("http://example.com".to_string()),
            options(),
            Arc::new(transport),
        );
        assert_eq!(connector.state(), ConnectionState::Error);
        assert!(matches!(
            connector.last_error().as_deref(),
            Some(WsError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_open_transitions_connecting_to_connected() {
        let (connector, transport) = connector_with(options());
        let mut events = connector.subscribe();
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert_eq!(transport.open_count(), 1);

        transport.accept();
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert!(connector.last_error().is_none());
        assert_eq!(drain_states(&mut events), vec![ConnectionState::Connected]);
    }

    #[test]
    fn test_connect_is_idempotent_while_live() {
        let (connector, transport) = connector_with(options());
        connector.connect();
        connector.connect();
        assert_eq!(transport.open_count(), 1);

        transport.accept();
        connector.connect();
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.live_count(), 1);
    }

    #[test]
    fn test_error_event_does_not_close_handle() {
        let (connector, transport) = connected(options());
        transport
            .latest_sink()
            .emit(TransportEvent::Error(WsError::ConnectionFailed("boom".into())));

        assert_eq!(connector.state(), ConnectionState::Error);
        assert!(connector.last_error().is_some());
        // Still open at the transport level: sending is allowed
        assert!(connector.send_text("ping"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsolicited_close_reconnects_after_fixed_delay() {
        let (connector, transport) = connected(options());
        let mut events = connector.subscribe();

        transport.drop_connection();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(connector.reconnect_pending());

        tokio::time::sleep(Duration::from_millis(1499)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert_eq!(connector.reconnect_attempts(), 1);
        assert_eq!(
            drain_states(&mut events),
            vec![ConnectionState::Disconnected, ConnectionState::Connecting]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_uses_same_delay_every_time() {
        let options = ConnectorOptions {
            reconnect_delay_ms: 200,
            ..ConnectorOptions::default()
        };
        let (connector, transport) = connector_with(options);

        for attempt in 1..=4 {
            transport.drop_connection();
            assert_eq!(connector.state(), ConnectionState::Disconnected);
            tokio::time::sleep(Duration::from_millis(201)).await;
            settle().await;
            assert_eq!(transport.open_count(), attempt + 1);
            assert_eq!(connector.reconnect_attempts(), attempt as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_close_cycle() {
        let (connector, transport) = connector_with(options());
        let mut events = connector.subscribe();

        let sink = transport.latest_sink();
        sink.emit(TransportEvent::Error(WsError::ConnectionFailed("refused".into())));
        transport.drop_connection();

        tokio::time::sleep(Duration::from_millis(1501)).await;
        settle().await;

        assert_eq!(
            drain_states(&mut events),
            vec![
                ConnectionState::Error,
                ConnectionState::Disconnected,
                ConnectionState::Connecting
            ]
        );
        // Error is cleared by the new attempt
        assert!(connector.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_when_disabled() {
        let options = ConnectorOptions {
            auto_reconnect: false,
            ..ConnectorOptions::default()
        };
        let (connector, transport) = connected(options);

        transport.drop_connection();
        assert!(!connector.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_then_close_does_not_reconnect() {
        let (connector, transport) = connected(options());

        connector.disconnect();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(
            transport.outbound(0),
            vec![WsOutbound::Close {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string()
            }]
        );

        // The transport reports the close afterwards
        transport.drop_connection();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert!(!connector.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_timer() {
        let (connector, transport) = connected(options());
        transport.drop_connection();
        assert!(connector.reconnect_pending());

        connector.disconnect();
        assert!(!connector.reconnect_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (connector, transport) = connected(options());
        connector.disconnect();
        connector.disconnect();
        connector.disconnect();
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        // Only one close frame was queued
        assert_eq!(transport.outbound(0).len(), 1);
    }

    #[test]
    fn test_connect_after_disconnect_opens_new_handle() {
        let (connector, transport) = connected(options());
        connector.disconnect();

        connector.connect();
        assert_eq!(transport.open_count(), 2);
        assert_eq!(connector.state(), ConnectionState::Connecting);
        // Caller-initiated, not a reconnect
        assert_eq!(connector.reconnect_attempts(), 0);

        // Late close of the first handle must not disturb the new one
        transport.set_ready(0, ReadyState::Closed);
        transport.sink(0).emit(TransportEvent::Close {
            code: NORMAL_CLOSURE,
            reason: "client disconnect".to_string(),
        });
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert!(!connector.reconnect_pending());

        transport.accept();
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_stale_handle_events_are_ignored() {
        let (connector, transport) = connected(options());
        connector.disconnect();
        connector.connect();

        let old = transport.sink(0);
        old.emit(TransportEvent::Frame("late".to_string()));
        old.emit(TransportEvent::Open);
        old.emit(TransportEvent::Error(WsError::SendFailed("late".into())));

        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert!(connector.messages().is_empty());
        assert!(connector.last_error().is_none());
    }

    #[test]
    fn test_connect_after_error_replaces_handle() {
        let (connector, transport) = connected(options());
        transport
            .latest_sink()
            .emit(TransportEvent::Error(WsError::ConnectionFailed("reset".into())));
        // Transport no longer live, close notification not yet delivered
        transport.set_ready(0, ReadyState::Closing);

        connector.connect();
        assert_eq!(transport.open_count(), 2);
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert!(connector.last_error().is_none());

        // The old handle was asked to close rather than orphaned
        assert!(matches!(
            transport.outbound(0).as_slice(),
            [WsOutbound::Close { .. }]
        ));
    }

    #[test]
    fn test_at_most_one_live_handle() {
        let (connector, transport) = connector_with(options());
        for _ in 0..5 {
            transport.accept();
            connector.connect();
            assert!(transport.live_count() <= 1);
            connector.disconnect();
            transport.drop_connection();
            connector.connect();
            assert!(transport.live_count() <= 1);
        }
    }

    #[test]
    fn test_frames_update_latest_and_history() {
        let options = ConnectorOptions {
            max_messages: 2,
            ..ConnectorOptions::default()
        };
        let (connector, transport) = connected(options);

        for text in ["\"A\"", "\"B\"", "\"C\""] {
            transport.frame(text);
        }

        let history: Vec<_> = connector
            .messages()
            .into_iter()
            .map(|m| m.payload.to_value())
            .collect();
        assert_eq!(history, vec![json!("C"), json!("B")]);
        assert_eq!(
            connector.last_message().map(|m| m.payload.to_value()),
            Some(json!("C"))
        );
    }

    #[test]
    fn test_unparseable_frame_is_wrapped_and_kept() {
        let (connector, transport) = connected(options());
        let mut events = connector.subscribe();

        transport.frame("{not json");

        let latest = connector.last_message().unwrap();
        assert!(latest.payload.is_raw());
        assert_eq!(latest.payload.to_value(), json!({"raw": "{not json"}));
        assert_eq!(connector.messages().len(), 1);
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert!(matches!(events.try_recv(), Ok(ConnectorEvent::Message(_))));
    }

    #[test]
    fn test_send_serializes_payload() {
        let (connector, transport) = connected(options());
        let payload = json!({"action": "broadcast", "type": "motion"});

        assert!(connector.send(&payload));
        assert_eq!(
            transport.outbound(0),
            vec![WsOutbound::Text(payload.to_string())]
        );
    }

    #[test]
    fn test_send_rejected_when_not_connected() {
        let (connector, transport) = connector_with(options());
        // Still connecting
        assert!(!connector.send(&json!({"a": 1})));
        assert!(connector.last_error().is_none());

        transport.accept();
        connector.disconnect();
        assert!(!connector.send(&json!({"a": 1})));
        assert!(!connector.send_text("raw"));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_serialization_failure_is_recorded() {
        use std::collections::HashMap;

        let (connector, _transport) = connected(options());
        // Non-string map keys cannot be encoded as JSON
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        assert!(!connector.send(&bad));
        assert!(matches!(
            connector.last_error().as_deref(),
            Some(WsError::Json(_))
        ));
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_failure_when_transport_gone() {
        let transport = Arc::new(FakeTransport::default());
        let connector =
            StreamConnector::with_transport(Some(URL.to_string()), options(), transport.clone());
        transport.accept();

        // Transport task exits without reporting close
        let link = transport.opened.lock().remove(0).1;
        drop(link);

        assert!(!connector.send_text("hello"));
        assert!(matches!(
            connector.last_error().as_deref(),
            Some(WsError::SendFailed(_))
        ));
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_set_endpoint_none_goes_idle() {
        let (connector, transport) = connected(options());
        connector.set_endpoint(None);

        assert_eq!(connector.state(), ConnectionState::Idle);
        assert_eq!(transport.outbound(0).len(), 1);

        transport.drop_connection();
        assert_eq!(connector.state(), ConnectionState::Idle);
        assert!(!connector.reconnect_pending());
    }

    #[test]
    fn test_set_endpoint_switches_connection() {
        let (connector, transport) = connected(options());
        connector.set_endpoint(Some("ws://127.0.0.1:9002/other".to_string()));

        assert_eq!(transport.open_count(), 2);
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert_eq!(
            connector.endpoint().as_deref(),
            Some("ws://127.0.0.1:9002/other")
        );

        // Same endpoint again is a no-op
        connector.set_endpoint(Some("ws://127.0.0.1:9002/other".to_string()));
        assert_eq!(transport.open_count(), 2);
    }

    #[test]
    fn test_drop_closes_transport() {
        let (connector, transport) = connected(options());
        drop(connector);

        assert!(matches!(
            transport.outbound(0).as_slice(),
            [WsOutbound::Close { .. }]
        ));
        // Events after drop are discarded
        assert!(!transport.sink(0).is_attached());
        transport.drop_connection();
    }

    #[tokio::test]
    async fn test_wait_for_state() {
        let (connector, transport) = connector_with(options());
        let waiter = async { connector.wait_for_state(ConnectionState::Connected).await };
        let driver = async {
            tokio::task::yield_now().await;
            transport.accept();
        };
        let (result, ()) = tokio::join!(waiter, driver);
        assert!(result.is_ok());
    }
}
