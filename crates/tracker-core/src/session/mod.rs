//! Message session state machine
//!
//! Turns the packet-limited transport into request/response exchanges and
//! resumable multi-packet transfers.
//!
//! ```text
//!            ┌──────────────────────────── tick ────────────────────────────┐
//!            │ 1. timed out in a non-idle state? ──► abort + cleanup        │
//!            │ 2. send still pending?            ──► wait                   │
//!            │ 3. Idle:  pop command ─► decode ─► handler                   │
//!            │    *Next: one packet in or out, then re-queue or finish      │
//!            │ 4. catch: Ignore / Reported / SessionBreaking                │
//!            └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport completions arrive as events on an unbounded channel and are
//! applied in [`SessionController::poll`], on the same thread that resets the
//! pools, so a reset never races a completion.

mod bridge;
mod config;
mod system;
mod transfer;

use bytes::Bytes;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPool, WriteSlot};
use crate::context::{SessionState, TransferContext};
use crate::error::{Disposition, SessionError};
use crate::hal::config_store::{flag_enabled, tag};
use crate::hal::{file_id, Backend, Board, EventSender, TransportEvent};
use crate::logging::record_id;
use crate::protocol::{DecodeError, ErrorCode, Request, Response};
use crate::settings::CoreSettings;
use crate::shared::SharedState;

/// Owner of the session state, the transport staging pools and bridging flags
#[derive(Debug)]
pub struct SessionController {
    settings: CoreSettings,
    context: TransferContext,
    send_pool: BufferPool,
    receive_pool: BufferPool,
    /// Receive slot handed to the transport for the outstanding receive
    rx_slot: Option<WriteSlot>,
    tx_pending: bool,
    rx_queued: bool,
    connected: bool,
    gps_bridging: bool,
    cellular_bridging: bool,
    last_activity_ms: u64,
    events_tx: EventSender,
    events_rx: UnboundedReceiver<TransportEvent>,
}

impl SessionController {
    pub fn new(settings: &CoreSettings) -> Self {
        let (events_tx, events_rx) = unbounded_channel();

        Self {
            settings: settings.clone(),
            context: TransferContext::Idle,
            send_pool: BufferPool::fixed(2, settings.packet_size),
            receive_pool: BufferPool::fixed(1, settings.packet_size),
            rx_slot: None,
            tx_pending: false,
            rx_queued: false,
            connected: false,
            gps_bridging: false,
            cellular_bridging: false,
            last_activity_ms: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.context.state()
    }

    pub fn context(&self) -> &TransferContext {
        &self.context
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn tx_pending(&self) -> bool {
        self.tx_pending
    }

    pub fn gps_bridging(&self) -> bool {
        self.gps_bridging
    }

    pub fn cellular_bridging(&self) -> bool {
        self.cellular_bridging
    }

    /// Sender to hand to the transport on `init`
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// No packet staged or waiting in either transport pool
    pub fn pools_idle(&self) -> bool {
        self.send_pool.is_empty() && self.receive_pool.is_empty() && !self.tx_pending
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    /// Tick the transport and apply every completion it produced
    pub fn poll(&mut self, board: &mut Board, shared: &mut SharedState) {
        board.transport.tick();

        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, board, shared);
        }
    }

    fn handle_event(&mut self, event: TransportEvent, board: &mut Board, shared: &mut SharedState) {
        match event {
            TransportEvent::SendComplete { size } => {
                if let Err(e) = self.send_pool.release_read(size) {
                    debug!(error = %e, "Send completion after reset");
                }
                self.tx_pending = false;
            }
            TransportEvent::ReceiveComplete { data } => {
                self.rx_queued = false;
                self.complete_receive(&data);
            }
            TransportEvent::Connected { backend } => {
                info!(?backend, "Configuration interface connected");
                if backend == Backend::Ble {
                    log_ble_event(record_id::BLE_CONNECTED, board, shared);
                }
                self.abort(board, shared);
                self.last_activity_ms = board.now_ms();
                self.connected = true;
            }
            TransportEvent::Disconnected { backend } => {
                info!(?backend, "Configuration interface disconnected");
                match backend {
                    Backend::Ble => log_ble_event(record_id::BLE_DISCONNECTED, board, shared),
                    Backend::FsScript => {
                        if let Err(e) = board.fs.delete(file_id::CONF_COMMANDS) {
                            warn!(error = %e, "Failed to delete command script");
                        }
                    }
                    Backend::None | Backend::Usb => {}
                }
                self.abort(board, shared);
                self.connected = false;
                self.gps_bridging = false;
                self.cellular_bridging = false;
            }
        }
    }

    fn complete_receive(&mut self, data: &Bytes) {
        // A receive queued before a cleanup stays outstanding on the transport
        let slot = match self.rx_slot.take() {
            Some(slot) => slot,
            None => match self.receive_pool.acquire_write() {
                Some(slot) => {
                    debug!(bytes = data.len(), "Receive queued before cleanup completed");
                    slot
                }
                None => {
                    warn!(bytes = data.len(), "Receive completion dropped, no free slot");
                    return;
                }
            },
        };

        let committed = self.receive_pool.slot_mut(&slot).map(|buf| {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            len
        });
        match committed.and_then(|len| self.receive_pool.commit(&slot, len)) {
            Ok(()) => {}
            Err(e) => debug!(error = %e, "Receive completion after reset dropped"),
        }
    }

    // =========================================================================
    // Driving loop
    // =========================================================================

    /// Run one step of the session machine
    pub fn tick(&mut self, board: &mut Board, shared: &mut SharedState) {
        let now = board.now_ms();

        if !self.context.is_idle()
            && now.saturating_sub(self.last_activity_ms) > self.settings.session_timeout_ms
        {
            warn!(state = ?self.state(), "Message session timed out");
            self.abort(board, shared);
        }

        if self.tx_pending {
            return;
        }

        let state = self.state();
        let result = match state {
            SessionState::Idle => {
                let result = self.idle(board, shared);
                self.last_activity_ms = now;
                result
            }
            SessionState::CfgReadNext => self.cfg_read_next(board),
            SessionState::CfgWriteNext => self.cfg_write_next(board),
            SessionState::CfgWriteError => self.cfg_write_error(board),
            SessionState::GpsWriteNext => self.gps_write_next(board),
            SessionState::GpsReadNext => self.gps_read_next(board),
            SessionState::LogReadNext => self.log_read_next(board, shared),
            SessionState::FwSendImageNext => self.fw_send_image_next(board, shared),
            SessionState::CellularWriteNext => self.cellular_write_next(board),
            SessionState::CellularReadNext => self.cellular_read_next(board),
            SessionState::FlashDownloadNext => self.flash_download_next(board),
        };

        if let Err(err) = result {
            self.catch(err, state, board, shared);
        }
    }

    fn catch(
        &mut self,
        err: SessionError,
        state: SessionState,
        board: &mut Board,
        shared: &mut SharedState,
    ) {
        match err.disposition() {
            Disposition::Ignore => {
                debug!(?state, error = %err, "Session step deferred");
            }
            Disposition::Reported => {
                warn!(?state, error = %err, "Request rejected");
                let report = Response::generic(ErrorCode::InvalidParameter);
                if let Err(e) = self.respond(board, &report) {
                    debug!(error = %e, "Could not report rejected request");
                }
            }
            Disposition::SessionBreaking => {
                error!(?state, error = %err, "Message session aborted");
                // The error report still has to go out
                if self.state() == SessionState::CfgWriteError {
                    return;
                }
                self.abort(board, shared);
            }
        }
    }

    fn idle(&mut self, board: &mut Board, shared: &mut SharedState) -> Result<(), SessionError> {
        let Some(frame) = self.receive_pool.acquire_read().map(Bytes::copy_from_slice) else {
            return self.queue_receive(board);
        };
        self.receive_pool.release_read(frame.len())?;

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(DecodeError::WrongSize {
                command,
                expected,
                actual,
            }) => {
                return Err(SessionError::RequestWrongSize {
                    command,
                    expected,
                    actual,
                })
            }
            Err(e) => {
                warn!(
                    error = %e,
                    bytes = %hex::encode(&frame[..frame.len().min(8)]),
                    "Dropping packet"
                );
                return Ok(());
            }
        };

        debug!(?request, "Dispatching request");
        self.dispatch(request, board, shared)
    }

    fn dispatch(
        &mut self,
        request: Request,
        board: &mut Board,
        shared: &mut SharedState,
    ) -> Result<(), SessionError> {
        match request {
            Request::CfgRead { tag } => self.cfg_read(tag, board),
            Request::CfgWrite { length } => self.cfg_write(length, board),
            Request::CfgSave => self.cfg_save(board),
            Request::CfgRestore => self.cfg_restore(board),
            Request::CfgErase { tag } => self.cfg_erase(tag, board),
            Request::CfgProtect => self.cfg_protect(board),
            Request::CfgUnprotect => self.cfg_unprotect(board),
            Request::GpsWrite { length } => self.gps_write(length, board),
            Request::GpsRead { length } => self.gps_read(length, board),
            Request::GpsConfig { enable } => self.gps_config(enable, board),
            Request::Status => self.status(board),
            Request::FwSendImage {
                image_type,
                length,
                crc32,
            } => self.fw_send_image(image_type, length, crc32, board, shared),
            Request::FwApplyImage { image_type } => self.fw_apply_image(image_type, board),
            Request::Reset { reset_type } => self.reset(reset_type, board, shared),
            Request::BatteryStatus => self.battery_status(board),
            Request::LogCreate { mode, sync_enable } => {
                self.log_create(mode, sync_enable, board, shared)
            }
            Request::LogErase => self.log_erase(board, shared),
            Request::LogRead {
                start_offset,
                length,
            } => self.log_read(start_offset, length, board, shared),
            Request::CellularConfig { enable } => self.cellular_config(enable, board),
            Request::CellularWrite { length } => self.cellular_write(length, board),
            Request::CellularRead { length } => self.cellular_read(length, board),
            Request::Test { device_flags } => self.test(device_flags, board, shared),
            Request::FlashDownload => self.flash_download(board),
        }
    }

    // =========================================================================
    // State changes and cleanup
    // =========================================================================

    /// Enter a continuation state, restarting the inactivity clock
    fn enter(&mut self, context: TransferContext, board: &Board) {
        debug!(state = ?context.state(), "Message session state change");
        self.context = context;
        self.last_activity_ms = board.now_ms();
    }

    fn go_idle(&mut self) {
        if !self.context.is_idle() {
            debug!(from = ?self.state(), "Message session back to idle");
        }
        self.context = TransferContext::Idle;
    }

    fn touch(&mut self, board: &Board) {
        self.last_activity_ms = board.now_ms();
    }

    /// Force the session back to idle, release partial artifacts and clean up
    pub fn abort(&mut self, board: &mut Board, shared: &mut SharedState) {
        if let TransferContext::FwSendImage { .. } = self.context {
            self.discard_image(board, shared);
        }
        self.context = TransferContext::Idle;
        self.cleanup(board, shared);
    }

    /// Reset both transport pools, clear flow-control flags, close the file
    pub fn cleanup(&mut self, board: &mut Board, shared: &mut SharedState) {
        self.send_pool.reset();
        self.receive_pool.reset();
        self.rx_slot = None;
        self.tx_pending = false;
        self.rx_queued = false;

        if let Some(handle) = shared.file.take() {
            if let Err(e) = board.fs.close(handle) {
                debug!(error = %e, "Close during session cleanup failed");
            }
        }
    }

    /// Drop bridging and return to idle, used when leaving provisioning
    pub fn shutdown(&mut self, board: &mut Board, shared: &mut SharedState) {
        self.abort(board, shared);
        self.cellular_bridging = false;
    }

    // =========================================================================
    // Buffer flow
    // =========================================================================

    /// Copy a packet into the send pool without sending it
    fn stage(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let slot = self.send_pool.acquire_write().ok_or(SessionError::TxBufferFull)?;
        let buf = self.send_pool.slot_mut(&slot)?;
        if data.len() > buf.len() {
            self.send_pool.abandon(&slot);
            return Err(SessionError::TxBufferFull);
        }
        buf[..data.len()].copy_from_slice(data);
        self.send_pool.commit(&slot, data.len())?;
        Ok(())
    }

    /// Hand the oldest staged packet to the transport
    fn send_pending(&mut self, board: &mut Board) -> Result<(), SessionError> {
        if self.tx_pending {
            return Err(SessionError::TxBusy);
        }
        let data = self.send_pool.acquire_read().ok_or(SessionError::TxBufferFull)?;
        self.tx_pending = true;
        if let Err(e) = board.transport.send(data) {
            self.tx_pending = false;
            return Err(e.into());
        }
        Ok(())
    }

    fn respond(&mut self, board: &mut Board, response: &Response) -> Result<(), SessionError> {
        debug!(?response, "Sending response");
        self.stage(&response.encode())?;
        self.send_pending(board)
    }

    fn queue_receive(&mut self, board: &mut Board) -> Result<(), SessionError> {
        let max_len = self.settings.packet_size;
        self.queue_receive_with(board, |transport| transport.receive(max_len))
    }

    fn queue_receive_stream(
        &mut self,
        board: &mut Board,
        remaining: u32,
    ) -> Result<(), SessionError> {
        self.queue_receive_with(board, |transport| transport.receive_stream(remaining as usize))
    }

    fn queue_receive_with<F>(&mut self, board: &mut Board, start: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut dyn crate::hal::Transport) -> Result<(), crate::hal::TransportError>,
    {
        if self.rx_queued {
            return Ok(());
        }

        let slot = self.receive_pool.acquire_write().ok_or(SessionError::RxBufferFull)?;
        self.rx_slot = Some(slot);
        self.rx_queued = true;

        if let Err(e) = start(board.transport.as_mut()) {
            debug!(error = %e, "Receive not queued");
            self.rx_queued = false;
            self.rx_slot = None;
            self.receive_pool.abandon(&slot);
        }
        Ok(())
    }

    /// Pop the packet waiting in the receive pool
    fn take_received(&mut self) -> Result<Option<Bytes>, SessionError> {
        let Some(packet) = self.receive_pool.acquire_read().map(Bytes::copy_from_slice) else {
            return Ok(None);
        };
        self.receive_pool.release_read(packet.len())?;
        Ok(Some(packet))
    }

    /// Lease a send slot, let `fill` write up to `max` bytes into it, then
    /// commit and send. Returns the number of bytes sent.
    fn send_filled<F>(
        &mut self,
        board: &mut Board,
        max: usize,
        fill: F,
    ) -> Result<usize, SessionError>
    where
        F: FnOnce(&mut Board, &mut [u8]) -> Result<usize, SessionError>,
    {
        let slot = self.send_pool.acquire_write().ok_or(SessionError::TxBufferFull)?;
        let buf = self.send_pool.slot_mut(&slot)?;
        let want = max.min(buf.len());

        let filled = match fill(board, &mut buf[..want]) {
            Ok(n) => n.min(want),
            Err(e) => {
                self.send_pool.abandon(&slot);
                return Err(e);
            }
        };
        if filled == 0 {
            self.send_pool.abandon(&slot);
            return Ok(0);
        }

        self.send_pool.commit(&slot, filled)?;
        self.send_pending(board)?;
        Ok(filled)
    }
}

fn log_ble_event(id: u8, board: &mut Board, shared: &mut SharedState) {
    if flag_enabled(board.config.as_ref(), tag::BLUETOOTH_LOG_ENABLE) {
        let now = board.peripherals.date_time();
        shared.log_queue.push(&[id], board.config.as_ref(), now);
    }
}
