//! Interfaces to the collaborators around the control core
//!
//! The core never touches hardware directly. Everything it needs is reached
//! through the traits here, bundled into a [`Board`].

pub mod clock;
pub mod config_store;
pub mod fs;
pub mod peripherals;
pub mod transport;

use std::sync::Arc;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config_store::{ConfigStore, ConfigStoreError, TagCursor};
pub use fs::{file_id, FileHandle, FileId, FileStat, FileSystem, FsError, FsMode};
pub use peripherals::{LedColour, LedPattern, PeripheralError, Peripherals};
pub use transport::{
    Backend, BackendSelector, EventSender, Transport, TransportError, TransportEvent,
};

/// Every collaborator the controllers drive
pub struct Board {
    pub transport: Box<dyn Transport>,
    pub config: Box<dyn ConfigStore>,
    pub fs: Box<dyn FileSystem>,
    pub peripherals: Box<dyn Peripherals>,
    pub clock: Arc<dyn Clock>,
}

impl Board {
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
