//! tracker-sim - host simulator for the tracker control core
//!
//! Builds a [`DeviceController`] on in-memory collaborators from a
//! [`SimConfig`], plays scheduled host and hardware events against it and
//! summarises the run as a JSON-friendly [`RunReport`].
//!
//! # Modules
//!
//! - [`config`] - TOML/YAML simulator configuration

pub mod config;

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use tracker_core::hal::{
    file_id, Backend, ConfigStore, ConfigStoreError, LedPattern, ManualClock,
};
use tracker_core::sim::{
    encode_script, MemoryConfigStore, MemoryFsHandle, MockTransportHandle, SimBoard,
    SimPeripheralsHandle,
};
use tracker_core::{DeviceController, DeviceState, Response};

pub use config::{ScheduledEvent, ScriptConfig, SimAction, SimConfig};

/// Errors raised while building or configuring a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid hex '{value}': {reason}")]
    Hex { value: String, reason: String },

    #[error("Configuration tag: {0}")]
    Config(#[from] ConfigStoreError),
}

/// A packet the device sent to the host
#[derive(Debug, Clone, Serialize)]
pub struct SentPacket {
    pub tick: u64,
    pub hex: String,
    /// `None` for bridged or streamed payload
    pub response: Option<Response>,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub final_state: DeviceState,
    pub visits: BTreeMap<DeviceState, u32>,
    pub reboots: u32,
    pub led: LedPattern,
    pub sent: Vec<SentPacket>,
    /// File id to size in bytes
    pub files: BTreeMap<u8, usize>,
}

/// A simulated tracker plus the handles that play host and hardware
pub struct Simulator {
    device: DeviceController,
    transport: MockTransportHandle,
    fs: MemoryFsHandle,
    peripherals: SimPeripheralsHandle,
    clock: ManualClock,
    tick_period_ms: u64,
    events: Vec<ScheduledEvent>,
    ticks: u64,
    sent: Vec<SentPacket>,
}

impl Simulator {
    pub fn new(config: &SimConfig) -> Result<Self, SimError> {
        let mut store = MemoryConfigStore::new(config.tag_defs());
        for (tag, value) in config.initial_values()? {
            store.set(tag, &value)?;
        }

        let sim = SimBoard::new(store, config.storage.fs_capacity);
        {
            let mut state = sim.peripherals.state();
            state.usb_plugged = config.battery.usb_plugged;
            state.battery_level = config.battery.level;
            state.battery_millivolts = config.battery.millivolts;
            state.flash = vec![0xFF; config.storage.flash_size];
        }

        if config.storage.log_file {
            sim.fs.insert(file_id::LOG, Vec::new());
        }
        if let Some(script) = &config.script {
            let packets = script.decode()?;
            info!(packets = packets.len(), "Command script installed");
            sim.fs.insert(file_id::CONF_COMMANDS, encode_script(&packets));
        }

        let mut events = config.events.clone();
        events.sort_by_key(|e| e.at);

        Ok(Self {
            device: DeviceController::new(config.core.clone(), sim.board),
            transport: sim.transport,
            fs: sim.fs,
            peripherals: sim.peripherals,
            clock: sim.clock,
            tick_period_ms: config.run.tick_period_ms,
            events,
            ticks: 0,
            sent: Vec::new(),
        })
    }

    pub fn device(&self) -> &DeviceController {
        &self.device
    }

    pub fn transport(&self) -> &MockTransportHandle {
        &self.transport
    }

    pub fn fs(&self) -> &MemoryFsHandle {
        &self.fs
    }

    pub fn peripherals(&self) -> &SimPeripheralsHandle {
        &self.peripherals
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Apply due events, run one device tick and collect what was sent
    pub fn step(&mut self) {
        self.apply_events();

        let before = self.device.state();
        self.device.tick();
        let after = self.device.state();
        if before != after {
            debug!(tick = self.ticks, from = ?before, to = ?after, "Mode changed");
        }

        for packet in self.transport.take_sent() {
            self.record_sent(packet);
        }

        self.clock.advance(self.tick_period_ms);
        self.ticks += 1;
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            ticks: self.ticks,
            elapsed_ms: self.ticks * self.tick_period_ms,
            final_state: self.device.state(),
            visits: self.device.visits().clone(),
            reboots: self.device.reboots(),
            led: self.peripherals.led(),
            sent: self.sent.clone(),
            files: self.fs.listing(),
        }
    }

    fn apply_events(&mut self) {
        let due = self.events.iter().take_while(|e| e.at <= self.ticks).count();
        for event in self.events.drain(..due).collect::<Vec<_>>() {
            debug!(tick = self.ticks, action = ?event.action, "Applying event");
            match event.action {
                SimAction::Usb { plugged } => self.peripherals.set_usb_plugged(plugged),
                SimAction::Battery { level } => self.peripherals.set_battery_level(level),
                SimAction::Connect => self.transport.connect(Backend::Usb),
                SimAction::Disconnect => self.transport.disconnect(),
                SimAction::Send { packet } => match config::parse_hex(&packet) {
                    Ok(bytes) => self.transport.push(bytes),
                    Err(e) => warn!(error = %e, "Dropping scheduled packet"),
                },
            }
        }
    }

    fn record_sent(&mut self, packet: Bytes) {
        let response = Response::decode(&packet).ok();
        if let Some(response) = &response {
            info!(tick = self.ticks, ?response, "Device response");
        }
        self.sent.push(SentPacket {
            tick: self.ticks,
            hex: hex::encode(&packet),
            response,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracker_core::hal::config_store::tag;
    use tracker_core::hal::LedColour;
    use tracker_core::ErrorCode;

    use crate::config::TagConfig;

    fn ready_config() -> SimConfig {
        let mut config = SimConfig::default();
        config.tags = vec![TagConfig {
            id: tag::LOGGING_ENABLE,
            size: 1,
            required: true,
            value: Some("01".into()),
        }];
        config.storage.log_file = true;
        config
    }

    #[test]
    fn test_ready_device_runs_operational() {
        let mut sim = Simulator::new(&ready_config()).unwrap();
        sim.run(5);

        let report = sim.report();
        assert_eq!(report.final_state, DeviceState::Operational);
        assert_eq!(report.ticks, 5);
        assert_eq!(report.elapsed_ms, 50);
        assert_eq!(report.files.get(&file_id::LOG), Some(&5));
    }

    #[test]
    fn test_unconfigured_device_blinks_red() {
        let mut sim = Simulator::new(&SimConfig::default()).unwrap();
        sim.run(3);

        let report = sim.report();
        assert_eq!(report.final_state, DeviceState::ProvisioningNeeded);
        assert_eq!(
            report.led,
            LedPattern::Blink {
                colour: LedColour::Red,
                period_ms: 500
            }
        );
    }

    #[test]
    fn test_scheduled_host_session() {
        let mut config = ready_config();
        config.battery.usb_plugged = true;
        config.events = vec![
            ScheduledEvent {
                at: 3,
                action: SimAction::Connect,
            },
            ScheduledEvent {
                at: 6,
                action: SimAction::Send {
                    packet: "7E14".into(),
                },
            },
        ];

        let mut sim = Simulator::new(&config).unwrap();
        sim.run(12);

        let report = sim.report();
        assert_eq!(report.final_state, DeviceState::Provisioning);
        assert_eq!(report.sent.len(), 1);
        assert!(matches!(
            report.sent[0].response,
            Some(Response::BatteryStatus {
                error_code: ErrorCode::NoError,
                charging: true,
                ..
            })
        ));
    }

    #[test]
    fn test_report_serialises_to_json() {
        let mut sim = Simulator::new(&ready_config()).unwrap();
        sim.run(2);

        let json = serde_json::to_value(sim.report()).unwrap();
        assert_eq!(json["final_state"], "operational");
        assert_eq!(json["visits"]["boot"], 1);
    }
}
