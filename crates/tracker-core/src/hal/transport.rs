//! Configuration interface transport
//!
//! Backends complete sends and receives asynchronously. Completions are
//! reported as [`TransportEvent`]s over a channel owned by the session
//! controller, which drains it once per tick on the control thread.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport not initialised")]
    NotInitialised,

    #[error("Transport busy")]
    Busy,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Backend init failed: {0}")]
    InitFailed(String),
}

/// Active backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    None,
    Usb,
    Ble,
    FsScript,
}

/// Backend to bring up on `init`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelector {
    Usb,
    Ble,
    /// Replay a stored command script
    FsScript(Bytes),
}

impl BackendSelector {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Usb => Backend::Usb,
            Self::Ble => Backend::Ble,
            Self::FsScript(_) => Backend::FsScript,
        }
    }
}

/// Completion and link events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SendComplete { size: usize },
    ReceiveComplete { data: Bytes },
    Connected { backend: Backend },
    Disconnected { backend: Backend },
}

/// Sender half handed to a backend on `init`
pub type EventSender = UnboundedSender<TransportEvent>;

/// Byte-oriented, packet-limited link to the host
pub trait Transport: Send {
    /// Bring up a backend; events are delivered on `events`
    fn init(&mut self, backend: BackendSelector, events: EventSender) -> Result<(), TransportError>;

    /// Tear down the active backend
    fn terminate(&mut self) -> Result<(), TransportError>;

    fn current_backend(&self) -> Backend;

    /// Queue a packet for sending; completes with `SendComplete`
    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Queue a receive of at most `max_len` bytes
    fn receive(&mut self, max_len: usize) -> Result<(), TransportError>;

    /// Queue a receive for the next chunk of a stream of `exact_len` bytes
    fn receive_stream(&mut self, exact_len: usize) -> Result<(), TransportError>;

    /// Give the backend a chance to make progress
    fn tick(&mut self);
}
