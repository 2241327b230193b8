//! Simulator configuration
//!
//! Everything the simulated tracker starts with: core settings, the tag
//! table, battery and storage conditions, the run length and an optional
//! host script. Loaded from TOML or YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracker_core::hal::config_store::tag;
use tracker_core::sim::{default_tags, TagDef};
use tracker_core::CoreSettings;

use crate::SimError;

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Core timing and sizing settings
    #[serde(default)]
    pub core: CoreSettings,

    /// Tag table; empty means the built-in table
    #[serde(default)]
    pub tags: Vec<TagConfig>,

    #[serde(default)]
    pub battery: BatteryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub run: RunConfig,

    /// Host requests replayed from the command script file at boot
    #[serde(default)]
    pub script: Option<ScriptConfig>,

    /// Host and hardware events at fixed ticks
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

impl SimConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Pick the loader from the file extension
    pub fn load_any(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::load_yaml(path),
            _ => Self::load(path),
        }
    }

    /// Tag definitions for the configuration store
    pub fn tag_defs(&self) -> Vec<TagDef> {
        if self.tags.is_empty() {
            return default_tags();
        }
        self.tags
            .iter()
            .map(|t| TagDef::new(t.id, t.size, t.required))
            .collect()
    }

    /// Initial tag values, decoded from hex
    pub fn initial_values(&self) -> Result<Vec<(u16, Vec<u8>)>, SimError> {
        let mut values = Vec::new();
        for def in &self.tags {
            if let Some(value) = &def.value {
                values.push((def.id, parse_hex(value)?));
            }
        }
        if let Some(threshold) = self.battery.low_threshold {
            values.push((tag::BATTERY_LOW_THRESHOLD, vec![threshold]));
        }
        Ok(values)
    }
}

// =============================================================================
// Tag table
// =============================================================================

/// One configuration tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    pub id: u16,

    /// Value size in bytes
    #[serde(default = "default_tag_size")]
    pub size: usize,

    #[serde(default)]
    pub required: bool,

    /// Initial value as a hex string
    #[serde(default)]
    pub value: Option<String>,
}

fn default_tag_size() -> usize {
    1
}

// =============================================================================
// Battery
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Charge level in percent; absent makes reads fail
    #[serde(default = "default_battery_level")]
    pub level: Option<u8>,

    #[serde(default = "default_battery_millivolts")]
    pub millivolts: Option<u16>,

    /// Written to the low-threshold tag when set
    #[serde(default)]
    pub low_threshold: Option<u8>,

    /// External power present at start
    #[serde(default)]
    pub usb_plugged: bool,
}

fn default_battery_level() -> Option<u8> {
    Some(100)
}

fn default_battery_millivolts() -> Option<u16> {
    Some(4100)
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            level: default_battery_level(),
            millivolts: default_battery_millivolts(),
            low_threshold: None,
            usb_plugged: false,
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Filesystem capacity in bytes
    #[serde(default = "default_fs_capacity")]
    pub fs_capacity: usize,

    /// Size of the external flash exposed by FLASH_DOWNLOAD
    #[serde(default = "default_flash_size")]
    pub flash_size: usize,

    /// Start with an (empty) log file present
    #[serde(default)]
    pub log_file: bool,
}

fn default_fs_capacity() -> usize {
    256 * 1024
}

fn default_flash_size() -> usize {
    4096
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fs_capacity: default_fs_capacity(),
            flash_size: default_flash_size(),
            log_file: false,
        }
    }
}

// =============================================================================
// Run
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Wall-clock period between ticks, also the simulated time step
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    /// Number of ticks to run; 0 runs until interrupted
    #[serde(default = "default_ticks")]
    pub ticks: u64,
}

fn default_tick_period_ms() -> u64 {
    10
}

fn default_ticks() -> u64 {
    1000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            ticks: default_ticks(),
        }
    }
}

// =============================================================================
// Host script and events
// =============================================================================

/// Request packets written to the command script file before boot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// One hex string per packet, header included
    pub packets: Vec<String>,
}

impl ScriptConfig {
    /// Read a script file holding one hex packet per line; `#` starts a comment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)?;
        let packets = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { packets })
    }

    pub fn decode(&self) -> Result<Vec<Vec<u8>>, SimError> {
        self.packets.iter().map(|p| parse_hex(p)).collect()
    }
}

/// An action applied just before the given tick runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub at: u64,
    pub action: SimAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimAction {
    /// Plug or unplug external power
    Usb { plugged: bool },
    /// Change the battery level; absent makes reads fail
    Battery { level: Option<u8> },
    /// Host connects on the USB backend
    Connect,
    Disconnect,
    /// Host sends a raw packet
    Send { packet: String },
}

/// Decode a hex string, tolerating a `0x` prefix and spaces
pub fn parse_hex(s: &str) -> Result<Vec<u8>, SimError> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|e| SimError::Hex {
        value: s.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.core, CoreSettings::default());
        assert_eq!(config.tag_defs(), default_tags());
        assert_eq!(config.battery.level, Some(100));
        assert_eq!(config.run.tick_period_ms, 10);
        assert!(config.script.is_none());
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[core]
session_timeout_ms = 2000

[[tags]]
id = 0x0100
required = true
value = "01"

[[tags]]
id = 0x0A01
size = 1

[battery]
level = 40
low_threshold = 20
usb_plugged = true

[storage]
log_file = true
flash_size = 128

[run]
ticks = 50

[script]
packets = ["7E0E"]

[[events]]
at = 5
action = {{ kind = "connect" }}

[[events]]
at = 9
action = {{ kind = "send", packet = "7e 14" }}
"#
        )
        .unwrap();

        let config = SimConfig::load(&path).unwrap();
        assert_eq!(config.core.session_timeout_ms, 2000);
        assert_eq!(config.core.packet_size, CoreSettings::default().packet_size);
        assert_eq!(config.tag_defs().len(), 2);
        assert_eq!(
            config.initial_values().unwrap(),
            vec![(0x0100, vec![0x01]), (0x0A01, vec![20])]
        );
        assert!(config.battery.usb_plugged);
        assert!(config.storage.log_file);
        assert_eq!(config.run.ticks, 50);
        assert_eq!(
            config.script.unwrap().decode().unwrap(),
            vec![vec![0x7E, 0x0E]]
        );
        assert_eq!(config.events[0].action, SimAction::Connect);
        assert_eq!(
            config.events[1].action,
            SimAction::Send {
                packet: "7e 14".into()
            }
        );
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.yaml");
        std::fs::write(
            &path,
            "battery:\n  level: null\nevents:\n  - at: 3\n    action:\n      kind: usb\n      plugged: true\n",
        )
        .unwrap();

        let config = SimConfig::load_any(&path).unwrap();
        assert_eq!(config.battery.level, None);
        assert_eq!(config.events[0].action, SimAction::Usb { plugged: true });
    }

    #[test]
    fn test_bad_hex_value_rejected() {
        let config = SimConfig {
            tags: vec![TagConfig {
                id: 0x0100,
                size: 1,
                required: true,
                value: Some("zz".into()),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.initial_values(),
            Err(SimError::Hex { .. })
        ));
    }

    #[test]
    fn test_script_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.txt");
        std::fs::write(&path, "# status\n7E0E\n\n7E14 # battery\n").unwrap();

        let script = ScriptConfig::from_file(&path).unwrap();
        assert_eq!(script.packets, vec!["7E0E", "7E14"]);
    }
}
