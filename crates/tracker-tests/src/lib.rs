//! End-to-end scenarios for the field tracker control core
//!
//! The scenarios under `tests/` drive a full [`DeviceController`] built on
//! the in-memory collaborators, playing both the host and the hardware.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tracker-tests
//! ```
//!
//! # Test Structure
//!
//! - `lifecycle_test.rs` - mode transitions from boot to operational
//! - `config_test.rs` - configuration write/read/save over the protocol
//! - `transfer_test.rs` - firmware image, log file and flash transfers
//! - `session_test.rs` - malformed requests and inactivity timeouts
//! - `simulator_test.rs` - scheduled runs through the simulator and its report

use bytes::Bytes;
use tracker_core::hal::config_store::tag;
use tracker_core::hal::{file_id, Backend, ConfigStore, ManualClock};
use tracker_core::sim::{
    default_tags, MemoryConfigStore, MemoryFsHandle, MockTransportHandle, SimBoard,
    SimPeripheralsHandle,
};
use tracker_core::{CoreSettings, DeviceController, DeviceState, Request, Response};

/// Ticks allowed for a mode change or a reply before giving up
pub const SETTLE_TICKS: usize = 32;

/// A device under test plus the handles that play host and hardware
pub struct Rig {
    pub device: DeviceController,
    pub transport: MockTransportHandle,
    pub fs: MemoryFsHandle,
    pub peripherals: SimPeripheralsHandle,
    pub clock: ManualClock,
}

impl Rig {
    pub fn new(config: MemoryConfigStore) -> Self {
        let sim = SimBoard::new(config, 64 * 1024);
        Self {
            device: DeviceController::new(CoreSettings::default(), sim.board),
            transport: sim.transport,
            fs: sim.fs,
            peripherals: sim.peripherals,
            clock: sim.clock,
        }
    }

    /// Nothing configured, no log file
    pub fn unconfigured() -> Self {
        Self::new(MemoryConfigStore::new(default_tags()))
    }

    /// Logging enabled and a log file present, so boot ends operational
    pub fn ready() -> Self {
        let mut config = MemoryConfigStore::new(default_tags());
        if let Err(e) = config.set(tag::LOGGING_ENABLE, &[1]) {
            panic!("default tag table lacks LOGGING_ENABLE: {e}");
        }
        let rig = Self::new(config);
        rig.fs.insert(file_id::LOG, Vec::new());
        rig
    }

    pub fn state(&self) -> DeviceState {
        self.device.state()
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.device.tick();
        }
    }

    /// Tick until the device reaches `state`; false if it never does
    pub fn run_until(&mut self, state: DeviceState) -> bool {
        for _ in 0..SETTLE_TICKS {
            if self.device.state() == state {
                return true;
            }
            self.device.tick();
        }
        self.device.state() == state
    }

    /// Plug in USB and connect a host, ending in provisioning
    pub fn attach_host(&mut self) -> bool {
        self.peripherals.set_usb_plugged(true);
        if !self.run_until(DeviceState::BatteryCharging) {
            return false;
        }
        // Charging entry brings up the USB backend
        self.run(1);
        self.transport.connect(Backend::Usb);
        if !self.run_until(DeviceState::Provisioning) {
            return false;
        }
        // First provisioning tick queues the receive
        self.run(1);
        true
    }

    /// Unplug and disconnect the host
    pub fn detach_host(&mut self) {
        self.peripherals.set_usb_plugged(false);
        self.transport.disconnect();
        self.run(2);
    }

    /// Send a request and collect everything sent back
    pub fn request(&mut self, request: &Request) -> Vec<Bytes> {
        self.push(&request.encode())
    }

    /// Send a raw packet and collect everything sent back
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.transport.push(data.to_vec());
        self.run(4);
        self.transport.take_sent()
    }
}

/// Decode the protocol responses among sent packets, skipping raw payload
pub fn responses(sent: &[Bytes]) -> Vec<Response> {
    sent.iter().filter_map(|p| Response::decode(p).ok()).collect()
}

/// Concatenate the packets after the leading response
pub fn payload(sent: &[Bytes]) -> Vec<u8> {
    sent.iter().skip(1).flat_map(|p| p.iter().copied()).collect()
}
