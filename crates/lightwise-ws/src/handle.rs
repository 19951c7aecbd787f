//! Transport handle: the connector's side of one live connection attempt.
//!
//! A handle and its `TransportLink` are created as a pair. The connector
//! keeps the handle and uses it to hand outbound frames to the transport;
//! the transport task keeps the link, drains the outbound queue and
//! publishes the socket's ready state through it.

use crate::error::{WsError, WsResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Normal closure status code.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Abnormal closure status code (no close frame was exchanged).
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Socket ready state, as maintained by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Outbound command queued for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Text frame.
    Text(String),
    /// Close the connection with the given status.
    Close { code: u16, reason: String },
}

/// Connector-owned handle to one transport.
///
/// Sending never blocks: frames go onto an unbounded queue drained by the
/// transport task.
#[derive(Debug)]
pub struct TransportHandle {
    ready: Arc<RwLock<ReadyState>>,
    outbound_tx: mpsc::UnboundedSender<WsOutbound>,
}

/// Transport-owned end of a handle.
#[derive(Debug)]
pub struct TransportLink {
    ready: Arc<RwLock<ReadyState>>,
    outbound_rx: mpsc::UnboundedReceiver<WsOutbound>,
}

impl TransportHandle {
    /// Create a handle/link pair in the `Connecting` state.
    pub fn channel() -> (TransportHandle, TransportLink) {
        let ready = Arc::new(RwLock::new(ReadyState::Connecting));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            TransportHandle {
                ready: ready.clone(),
                outbound_tx,
            },
            TransportLink { ready, outbound_rx },
        )
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.ready.read()
    }

    /// Check if frames can be sent.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Check if the connection is open or still opening.
    pub fn is_live(&self) -> bool {
        matches!(
            self.ready_state(),
            ReadyState::Connecting | ReadyState::Open
        )
    }

    /// Hand a text frame to the transport.
    pub fn send_text(&self, text: String) -> WsResult<()> {
        self.outbound_tx
            .send(WsOutbound::Text(text))
            .map_err(|_| WsError::SendFailed("transport task has exited".to_string()))
    }

    /// Ask the transport to close. Safe to call more than once.
    pub fn close(&self, code: u16, reason: &str) {
        {
            let mut ready = self.ready.write();
            if *ready == ReadyState::Closed {
                return;
            }
            *ready = ReadyState::Closing;
        }
        let _ = self.outbound_tx.send(WsOutbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

impl TransportLink {
    pub fn set_ready(&self, state: ReadyState) {
        *self.ready.write() = state;
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.ready.read()
    }

    /// Next outbound command. `None` once the handle has been dropped.
    pub async fn recv(&mut self) -> Option<WsOutbound> {
        self.outbound_rx.recv().await
    }

    /// Next outbound command without waiting.
    pub fn try_recv(&mut self) -> Option<WsOutbound> {
        self.outbound_rx.try_recv().ok()
    }
}
