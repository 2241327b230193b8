//! Device-mode state machine
//!
//! One cooperative step per [`DeviceController::tick`]:
//!
//! ```text
//!   first step in mode? ── yes ──► on_enter(mode)
//!            │
//!            ▼
//!      on_tick(mode) ──► requests next mode (last request wins)
//!            │
//!            ▼
//!   next != current? ── yes ──► on_exit(current), switch
//! ```
//!
//! A reboot requested by the session is carried out after the step: the
//! reply is drained to the host, then the controller re-enters `Boot`.

mod modes;
mod state;

pub use state::{DeviceState, ModeHandle};

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::hal::config_store::{flag_enabled, tag, value_u8};
use crate::hal::{file_id, Board, EventSender, FsError, FsMode, TagCursor};
use crate::logging::{date_time_record, record_id, startup_record, LogTime, DATE_TIME_SIZE};
use crate::session::SessionController;
use crate::settings::CoreSettings;
use crate::shared::{RebootRequest, SharedState};

/// Transport ticks allowed for the reset reply to drain before rebooting
const REBOOT_DRAIN_TICKS: usize = 16;

/// Owner of the board, the session machine and the shared state
pub struct DeviceController {
    settings: CoreSettings,
    board: Board,
    session: SessionController,
    shared: SharedState,
    mode: ModeHandle,
    startup_log_required: bool,
    battery_watermark: u8,
    flush_deadline_ms: Option<u64>,
    usb_enum_started_ms: Option<u64>,
    cellular_test_deadline_ms: Option<u64>,
    gps_awake: bool,
    sensor_logging: bool,
    missing_tags: BTreeSet<u16>,
    visits: BTreeMap<DeviceState, u32>,
    reboots: u32,
}

impl DeviceController {
    pub fn new(settings: CoreSettings, board: Board) -> Self {
        Self {
            session: SessionController::new(&settings),
            shared: SharedState::new(&settings),
            settings,
            board,
            mode: ModeHandle::new(DeviceState::Boot),
            startup_log_required: true,
            battery_watermark: u8::MAX,
            flush_deadline_ms: None,
            usb_enum_started_ms: None,
            cellular_test_deadline_ms: None,
            gps_awake: false,
            sensor_logging: false,
            missing_tags: BTreeSet::new(),
            visits: BTreeMap::new(),
            reboots: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.mode.current()
    }

    pub fn mode(&self) -> &ModeHandle {
        &self.mode
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    /// Entries into each mode since construction
    pub fn visits(&self) -> &BTreeMap<DeviceState, u32> {
        &self.visits
    }

    pub fn reboots(&self) -> u32 {
        self.reboots
    }

    pub fn sensor_logging(&self) -> bool {
        self.sensor_logging
    }

    /// Sender for transport backends brought up outside the controller
    pub fn event_sender(&self) -> EventSender {
        self.session.event_sender()
    }

    /// Run one step of the current mode
    pub fn tick(&mut self) {
        let current = self.mode.current();

        if self.mode.entering() {
            debug!(state = ?current, "Entering device state");
            *self.visits.entry(current).or_default() += 1;
            self.on_enter(current);
            self.mode.mark_ticked();
        }

        self.on_tick(current);

        if let Some(reboot) = self.shared.reboot.take() {
            self.reboot(reboot);
            return;
        }

        if let Some(left) = self.mode.advance() {
            self.on_exit(left);
            info!(from = ?left, to = ?self.mode.current(), "Device state change");
        }
    }

    /// Drain the reset reply, reset the hardware and start over from `Boot`
    fn reboot(&mut self, request: RebootRequest) {
        for _ in 0..REBOOT_DRAIN_TICKS {
            if !self.session.tx_pending() {
                break;
            }
            self.session.poll(&mut self.board, &mut self.shared);
        }

        if request == RebootRequest::Dfu {
            self.board.peripherals.request_dfu();
        }
        info!(?request, "Rebooting");

        self.on_exit(self.mode.current());
        self.board.peripherals.reset();
        self.reboots += 1;
        self.mode.force(DeviceState::Boot);
    }

    /// Return every controller field to its power-on value
    fn reset_state(&mut self) {
        self.session = SessionController::new(&self.settings);
        self.shared = SharedState::new(&self.settings);
        self.startup_log_required = true;
        self.battery_watermark = u8::MAX;
        self.flush_deadline_ms = None;
        self.usb_enum_started_ms = None;
        self.cellular_test_deadline_ms = None;
        self.gps_awake = false;
        self.sensor_logging = false;
        self.missing_tags.clear();
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// Every required tag set and a log file present
    fn is_ready(&mut self) -> bool {
        let config = self.board.config.as_ref();
        let mut cursor = TagCursor::new();
        let mut complete = true;

        while let Some(tag) = config.iterate(&mut cursor) {
            let required = config.is_required(tag).unwrap_or(false);
            let set = config.is_set(tag).unwrap_or(false);
            if required && !set {
                complete = false;
                if self.missing_tags.insert(tag) {
                    warn!(tag = format!("0x{:04X}", tag), "Required configuration tag not set");
                }
            } else {
                self.missing_tags.remove(&tag);
            }
        }

        complete && self.shared.log_file_created
    }

    fn is_battery_low(&mut self) -> bool {
        let Ok(level) = self.board.peripherals.battery_level() else {
            return false;
        };
        match value_u8(self.board.config.as_ref(), tag::BATTERY_LOW_THRESHOLD) {
            Some(threshold) => level <= threshold,
            None => false,
        }
    }

    fn usb_plugged(&self) -> bool {
        self.board.peripherals.usb_plugged()
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    fn gps_on(&mut self) {
        self.board.peripherals.gps_wake();
        self.gps_awake = true;
        self.log_gps_event(record_id::GPS_ON);
    }

    fn gps_off(&mut self, log: bool) {
        self.board.peripherals.gps_shutdown();
        if self.gps_awake && log {
            self.log_gps_event(record_id::GPS_OFF);
        }
        self.gps_awake = false;
    }

    fn log_gps_event(&mut self, id: u8) {
        if flag_enabled(self.board.config.as_ref(), tag::GPS_DEBUG_LOGGING_ENABLE) {
            self.push_log(&[id]);
        }
    }

    fn push_log(&mut self, record: &[u8]) {
        let now = self.board.peripherals.date_time();
        self.shared.log_queue.push(record, self.board.config.as_ref(), now);
    }

    /// Queue the startup record once per boot
    fn queue_startup_event(&mut self) {
        if !self.startup_log_required {
            return;
        }
        self.startup_log_required = false;
        let cause = self.board.peripherals.startup_cause();
        self.push_log(&startup_record(cause));
    }

    /// Write a still-owed startup record straight to the open log file
    fn write_startup_event(&mut self) -> Result<(), FsError> {
        if !self.startup_log_required {
            return Ok(());
        }
        let Some(handle) = self.shared.file else {
            return Ok(());
        };
        self.startup_log_required = false;

        let mut record = Vec::with_capacity(DATE_TIME_SIZE + 5);
        if flag_enabled(self.board.config.as_ref(), tag::LOGGING_DATE_TIME_STAMP_ENABLE) {
            let now = LogTime::from(self.board.peripherals.date_time());
            record.extend_from_slice(&date_time_record(now));
        }
        record.extend_from_slice(&startup_record(self.board.peripherals.startup_cause()));

        self.board.fs.write(handle, &record)?;
        self.board.fs.flush(handle)?;
        debug!(bytes = record.len(), "Startup record written");
        Ok(())
    }

    /// Append queued records to the log file, opening it just for the write
    fn write_queued_records(&mut self) -> Result<(), FsError> {
        let handle = self.board.fs.open(file_id::LOG, FsMode::WriteOnly)?;
        let written = self.shared.log_queue.drain_to(self.board.fs.as_mut(), handle);
        self.board.fs.close(handle)?;
        let written = written?;
        debug!(bytes = written, "Log records written");
        Ok(())
    }

    fn close_file(&mut self) {
        if let Some(handle) = self.shared.file.take() {
            if let Err(e) = self.board.fs.close(handle) {
                warn!(error = %e, "Failed to close file");
            }
        }
    }

    fn terminate_transport(&mut self) {
        if let Err(e) = self.board.transport.terminate() {
            debug!(error = %e, "Transport terminate");
        }
    }
}

#[cfg(test)]
mod tests;
