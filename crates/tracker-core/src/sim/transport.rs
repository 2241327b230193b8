//! Mock configuration transport
//!
//! Packets pushed through the handle play the host side. Sends complete on
//! the next `tick`; a queued receive is satisfied by the next pushed packet.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::hal::{Backend, BackendSelector, EventSender, Transport, TransportError, TransportEvent};
use crate::protocol::Request;

/// Split a scripted-command file into its `u16 LE` length-prefixed packets
pub fn parse_script(mut data: &[u8]) -> Vec<Bytes> {
    let mut packets = Vec::new();
    while data.remaining() >= 2 {
        let len = data.get_u16_le() as usize;
        if data.remaining() < len {
            warn!(len, left = data.remaining(), "Truncated command script entry");
            break;
        }
        packets.push(Bytes::copy_from_slice(&data[..len]));
        data.advance(len);
    }
    packets
}

/// Build a scripted-command file from request packets
pub fn encode_script<P: AsRef<[u8]>>(packets: &[P]) -> Vec<u8> {
    let mut buf = Vec::new();
    for packet in packets {
        let packet = packet.as_ref();
        buf.put_u16_le(packet.len() as u16);
        buf.put_slice(packet);
    }
    buf
}

#[derive(Debug, Clone, Copy)]
struct PendingReceive {
    max_len: usize,
    stream: bool,
}

#[derive(Debug, Default)]
struct TransportState {
    backend: Backend,
    events: Option<EventSender>,
    connected: bool,
    scripted: bool,
    fail_init: bool,
    fail_send: bool,
    inbound: VecDeque<Bytes>,
    outbound: Vec<Bytes>,
    pending_send: Option<usize>,
    pending_receive: Option<PendingReceive>,
    inits: u32,
}

impl TransportState {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event) {
                debug!(event = ?e.0, "Transport event dropped, controller gone");
            }
        }
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.emit(TransportEvent::Disconnected {
                backend: self.backend,
            });
        }
    }
}

/// Transport backed by in-memory queues
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
        }
    }

    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn init(
        &mut self,
        backend: BackendSelector,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_init {
            return Err(TransportError::InitFailed("mock init failure".into()));
        }

        state.backend = backend.backend();
        state.events = Some(events);
        state.connected = false;
        state.pending_send = None;
        state.pending_receive = None;
        state.inits += 1;

        if let BackendSelector::FsScript(script) = backend {
            let packets = parse_script(&script);
            debug!(packets = packets.len(), "Replaying command script");
            state.inbound = packets.into();
            state.scripted = true;
            state.connected = true;
            state.emit(TransportEvent::Connected {
                backend: Backend::FsScript,
            });
        } else {
            state.scripted = false;
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.backend == Backend::None {
            return Err(TransportError::NotInitialised);
        }

        state.disconnect();
        state.backend = Backend::None;
        state.scripted = false;
        state.pending_send = None;
        state.pending_receive = None;
        Ok(())
    }

    fn current_backend(&self) -> Backend {
        self.state.lock().backend
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.backend == Backend::None {
            return Err(TransportError::NotInitialised);
        }
        if state.pending_send.is_some() {
            return Err(TransportError::Busy);
        }
        if state.fail_send {
            return Err(TransportError::SendFailed("mock send failure".into()));
        }

        debug!(
            bytes = %hex::encode(&data[..data.len().min(16)]),
            len = data.len(),
            "Mock transport: sent packet"
        );
        state.outbound.push(Bytes::copy_from_slice(data));
        state.pending_send = Some(data.len());
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<(), TransportError> {
        self.queue_receive(PendingReceive {
            max_len,
            stream: false,
        })
    }

    fn receive_stream(&mut self, exact_len: usize) -> Result<(), TransportError> {
        self.queue_receive(PendingReceive {
            max_len: exact_len,
            stream: true,
        })
    }

    fn tick(&mut self) {
        let mut state = self.state.lock();

        if let Some(size) = state.pending_send.take() {
            state.emit(TransportEvent::SendComplete { size });
        }

        if let Some(pending) = state.pending_receive {
            if let Some(mut packet) = state.inbound.pop_front() {
                state.pending_receive = None;
                // Streams hand over whatever the host sent so the session sees
                // oversize chunks
                if !pending.stream && packet.len() > pending.max_len {
                    packet.truncate(pending.max_len);
                }
                state.emit(TransportEvent::ReceiveComplete { data: packet });
            } else if state.scripted && state.connected && state.pending_send.is_none() {
                debug!("Command script exhausted");
                state.disconnect();
            }
        }
    }
}

impl MockTransport {
    fn queue_receive(&mut self, pending: PendingReceive) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.backend == Backend::None {
            return Err(TransportError::NotInitialised);
        }
        if state.pending_receive.is_some() {
            return Err(TransportError::Busy);
        }
        state.pending_receive = Some(pending);
        Ok(())
    }
}

/// Host-side view of a [`MockTransport`]
#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransportHandle {
    /// Simulate a host connecting on `backend`
    pub fn connect(&self, backend: Backend) {
        let mut state = self.state.lock();
        if state.events.is_none() {
            warn!(?backend, "Connect ignored, transport never initialised");
            return;
        }
        state.backend = backend;
        state.connected = true;
        state.emit(TransportEvent::Connected { backend });
    }

    pub fn disconnect(&self) {
        self.state.lock().disconnect();
    }

    /// Queue a raw packet from the host
    pub fn push(&self, packet: impl Into<Bytes>) {
        self.state.lock().inbound.push_back(packet.into());
    }

    pub fn push_request(&self, request: &Request) {
        self.push(request.encode());
    }

    /// Packets the device sent since the last call
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    pub fn backend(&self) -> Backend {
        self.state.lock().backend
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Packets pushed but not yet delivered
    pub fn inbound_len(&self) -> usize {
        self.state.lock().inbound.len()
    }

    pub fn receive_pending(&self) -> bool {
        self.state.lock().pending_receive.is_some()
    }

    /// Number of successful `init` calls
    pub fn init_count(&self) -> u32 {
        self.state.lock().inits
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }
}
