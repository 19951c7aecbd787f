//! WebSocket stream connector for the LightWise broadcast endpoint.
//!
//! Provides one persistent, self-healing connection with:
//! - Fixed-delay automatic reconnection after unsolicited closes
//! - Lenient JSON decoding of inbound frames into a bounded history
//! - Gated, non-blocking outbound sends
//! - Broadcast notifications for state changes and messages

pub mod connection;
pub mod error;
pub mod handle;
pub mod message;
pub mod transport;

pub use connection::{ConnectionState, ConnectorEvent, ConnectorOptions, StreamConnector};
pub use error::{WsError, WsResult};
pub use handle::{ReadyState, TransportHandle, TransportLink, WsOutbound};
pub use message::{InboundMessage, MessageHistory, MessagePayload, DEFAULT_MAX_MESSAGES};
pub use transport::{
    validate_endpoint, EventSink, HandleId, Transport, TransportEvent, TungsteniteTransport,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
