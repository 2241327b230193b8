//! Simulated board peripherals

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::{Mutex, MutexGuard};

use crate::hal::peripherals::{Cellular, DeviceInfo, Flash, Gps, Indicator, Power, Rtc};
use crate::hal::{LedPattern, PeripheralError, Peripherals};

/// Everything the simulated hardware exposes, freely editable through the
/// handle
#[derive(Debug, Clone)]
pub struct PeripheralState {
    pub usb_plugged: bool,
    /// `None` makes the read fail
    pub battery_level: Option<u8>,
    pub battery_millivolts: Option<u16>,
    pub startup_cause: u32,

    pub gps_present: bool,
    pub gps_awake: bool,
    pub gps_fail_send: bool,
    pub gps_rx: VecDeque<u8>,
    pub gps_tx: Vec<u8>,

    pub cellular_present: bool,
    pub cellular_powered: bool,
    pub cellular_responds: bool,
    pub cellular_rx: VecDeque<u8>,
    pub cellular_tx: Vec<u8>,
    pub sim_imsi: Option<[u8; 16]>,

    pub flash: Vec<u8>,
    pub led: LedPattern,
    pub date_time: NaiveDateTime,
    pub device_uid: u64,
    pub ble_firmware_version: u32,

    pub fail_init: bool,
    pub resets: u32,
    pub dfu_requested: bool,
    pub sleeps: u32,
}

impl Default for PeripheralState {
    fn default() -> Self {
        Self {
            usb_plugged: false,
            battery_level: Some(100),
            battery_millivolts: Some(4100),
            startup_cause: 0,
            gps_present: true,
            gps_awake: false,
            gps_fail_send: false,
            gps_rx: VecDeque::new(),
            gps_tx: Vec::new(),
            cellular_present: true,
            cellular_powered: false,
            cellular_responds: true,
            cellular_rx: VecDeque::new(),
            cellular_tx: Vec::new(),
            sim_imsi: None,
            flash: Vec::new(),
            led: LedPattern::Off,
            date_time: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            device_uid: 0,
            ble_firmware_version: 0,
            fail_init: false,
            resets: 0,
            dfu_requested: false,
            sleeps: 0,
        }
    }
}

pub struct SimPeripherals {
    state: Arc<Mutex<PeripheralState>>,
}

impl SimPeripherals {
    pub fn new() -> Self {
        Self::with_state(PeripheralState::default())
    }

    pub fn with_state(state: PeripheralState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn handle(&self) -> SimPeripheralsHandle {
        SimPeripheralsHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimPeripherals {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared view of a [`SimPeripherals`]
#[derive(Clone)]
pub struct SimPeripheralsHandle {
    state: Arc<Mutex<PeripheralState>>,
}

impl SimPeripheralsHandle {
    pub fn state(&self) -> MutexGuard<'_, PeripheralState> {
        self.state.lock()
    }

    pub fn set_usb_plugged(&self, plugged: bool) {
        self.state.lock().usb_plugged = plugged;
    }

    pub fn set_battery_level(&self, level: Option<u8>) {
        self.state.lock().battery_level = level;
    }

    pub fn led(&self) -> LedPattern {
        self.state.lock().led
    }

    pub fn push_gps_rx(&self, data: &[u8]) {
        self.state.lock().gps_rx.extend(data);
    }

    pub fn push_cellular_rx(&self, data: &[u8]) {
        self.state.lock().cellular_rx.extend(data);
    }
}

fn drain_into(source: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(source.len());
    for (slot, byte) in buf.iter_mut().zip(source.drain(..n)) {
        *slot = byte;
    }
    n
}

impl Power for SimPeripherals {
    fn usb_plugged(&self) -> bool {
        self.state.lock().usb_plugged
    }

    fn battery_level(&mut self) -> Result<u8, PeripheralError> {
        self.state
            .lock()
            .battery_level
            .ok_or_else(|| PeripheralError::Comms("fuel gauge".into()))
    }

    fn battery_millivolts(&mut self) -> Result<u16, PeripheralError> {
        self.state
            .lock()
            .battery_millivolts
            .ok_or_else(|| PeripheralError::Comms("fuel gauge".into()))
    }

    fn startup_cause(&self) -> u32 {
        self.state.lock().startup_cause
    }

    fn reset(&mut self) {
        self.state.lock().resets += 1;
    }

    fn request_dfu(&mut self) {
        self.state.lock().dfu_requested = true;
    }

    fn sleep(&mut self) {
        self.state.lock().sleeps += 1;
    }
}

impl Gps for SimPeripherals {
    fn gps_detected(&self) -> bool {
        self.state.lock().gps_present
    }

    fn gps_wake(&mut self) {
        self.state.lock().gps_awake = true;
    }

    fn gps_shutdown(&mut self) {
        self.state.lock().gps_awake = false;
    }

    fn gps_flush_rx(&mut self) {
        self.state.lock().gps_rx.clear();
    }

    fn gps_available(&self) -> usize {
        self.state.lock().gps_rx.len()
    }

    fn gps_receive_raw(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        let mut state = self.state.lock();
        if !state.gps_present {
            return Err(PeripheralError::NotPresent);
        }
        Ok(drain_into(&mut state.gps_rx, buf))
    }

    fn gps_send_raw(&mut self, data: &[u8]) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        if !state.gps_present {
            return Err(PeripheralError::NotPresent);
        }
        if state.gps_fail_send {
            return Err(PeripheralError::Comms("GPS UART".into()));
        }
        state.gps_tx.extend_from_slice(data);
        Ok(())
    }
}

impl Cellular for SimPeripherals {
    fn cellular_detected(&self) -> bool {
        self.state.lock().cellular_present
    }

    fn cellular_power_on(&mut self) {
        let mut state = self.state.lock();
        state.cellular_powered = state.cellular_present;
    }

    fn cellular_power_off(&mut self) {
        self.state.lock().cellular_powered = false;
    }

    fn cellular_sync_comms(&mut self) -> Result<(), PeripheralError> {
        let state = self.state.lock();
        if !state.cellular_present {
            return Err(PeripheralError::NotPresent);
        }
        if !state.cellular_powered || !state.cellular_responds {
            return Err(PeripheralError::Comms("modem not responding".into()));
        }
        Ok(())
    }

    fn cellular_available(&self) -> usize {
        self.state.lock().cellular_rx.len()
    }

    fn cellular_receive_raw(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        let mut state = self.state.lock();
        if !state.cellular_powered {
            return Err(PeripheralError::Comms("modem powered off".into()));
        }
        Ok(drain_into(&mut state.cellular_rx, buf))
    }

    fn cellular_send_raw(&mut self, data: &[u8]) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        if !state.cellular_powered || !state.cellular_responds {
            return Err(PeripheralError::Comms("modem not responding".into()));
        }
        state.cellular_tx.extend_from_slice(data);
        Ok(())
    }

    fn sim_imsi(&mut self) -> Result<Option<[u8; 16]>, PeripheralError> {
        Ok(self.state.lock().sim_imsi)
    }
}

impl Flash for SimPeripherals {
    fn flash_size(&self) -> u32 {
        self.state.lock().flash.len() as u32
    }

    fn flash_read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), PeripheralError> {
        let state = self.state.lock();
        let start = address as usize;
        let end = start + buf.len();
        let data = state
            .flash
            .get(start..end)
            .ok_or_else(|| {
                PeripheralError::Flash(format!("read 0x{start:08X}..0x{end:08X} out of range"))
            })?;
        buf.copy_from_slice(data);
        Ok(())
    }
}

impl Indicator for SimPeripherals {
    fn set_led(&mut self, pattern: LedPattern) {
        self.state.lock().led = pattern;
    }

    fn led(&self) -> LedPattern {
        self.state.lock().led
    }
}

impl Rtc for SimPeripherals {
    fn date_time(&self) -> NaiveDateTime {
        self.state.lock().date_time
    }
}

impl DeviceInfo for SimPeripherals {
    fn device_uid(&self) -> u64 {
        self.state.lock().device_uid
    }

    fn ble_firmware_version(&self) -> u32 {
        self.state.lock().ble_firmware_version
    }
}

impl Peripherals for SimPeripherals {
    fn init(&mut self) -> Result<(), PeripheralError> {
        let mut state = self.state.lock();
        if state.fail_init {
            return Err(PeripheralError::Init("simulated driver failure".into()));
        }
        state.gps_awake = false;
        state.cellular_powered = false;
        state.led = LedPattern::Off;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_receive_drains_buffer() {
        let mut sim = SimPeripherals::new();
        sim.handle().push_gps_rx(b"$GPGGA");

        let mut buf = [0u8; 4];
        assert_eq!(sim.gps_receive_raw(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"$GPG");
        assert_eq!(sim.gps_available(), 2);
    }

    #[test]
    fn test_flash_read_out_of_range() {
        let mut sim = SimPeripherals::new();
        sim.handle().state().flash = vec![0xAA; 8];

        let mut buf = [0u8; 4];
        sim.flash_read(4, &mut buf).unwrap();
        assert!(matches!(
            sim.flash_read(6, &mut buf),
            Err(PeripheralError::Flash(_))
        ));
    }

    #[test]
    fn test_sync_needs_power() {
        let mut sim = SimPeripherals::new();
        assert!(sim.cellular_sync_comms().is_err());

        sim.cellular_power_on();
        sim.cellular_sync_comms().unwrap();
    }
}
