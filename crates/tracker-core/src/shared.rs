//! State touched by both the device and the session machines

use serde::Serialize;

use crate::hal::FileHandle;
use crate::logging::LogQueue;
use crate::settings::CoreSettings;

/// Progress of a field test requested over the configuration interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    #[default]
    Off,
    Request,
    Waiting,
    Active,
    Finishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TestStates {
    pub gps: TestState,
    pub cellular: TestState,
    pub satellite: TestState,
}

impl TestStates {
    pub fn all_off(&mut self) {
        *self = Self::default();
    }
}

/// Reboot requested by a RESET_REQ, performed once the reply is out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootRequest {
    App,
    Dfu,
}

/// Flags and handles owned jointly by the two machines
#[derive(Debug)]
pub struct SharedState {
    pub log_file_created: bool,
    /// The single open file, shared by log writing and transfers
    pub file: Option<FileHandle>,
    pub log_queue: LogQueue,
    pub tests: TestStates,
    pub reboot: Option<RebootRequest>,
}

impl SharedState {
    pub fn new(settings: &CoreSettings) -> Self {
        Self {
            log_file_created: false,
            file: None,
            log_queue: LogQueue::new(settings.log_queue_depth, settings.log_max_record),
            tests: TestStates::default(),
            reboot: None,
        }
    }
}
