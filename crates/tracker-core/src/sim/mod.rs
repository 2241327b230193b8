//! In-memory collaborators
//!
//! Each collaborator keeps its state behind an `Arc<parking_lot::Mutex<_>>`
//! and hands out a cloneable handle, so a test or the simulator can play the
//! host and the hardware while the controller owns the boxed trait object.

mod config_store;
mod fs;
mod peripherals;
mod transport;

use std::sync::Arc;

pub use config_store::{default_tags, MemoryConfigStore, TagDef};
pub use fs::{MemoryFileSystem, MemoryFsHandle};
pub use peripherals::{PeripheralState, SimPeripherals, SimPeripheralsHandle};
pub use transport::{encode_script, parse_script, MockTransport, MockTransportHandle};

use crate::hal::{Board, Clock, ManualClock};

/// A board built from in-memory collaborators plus the handles to drive it
pub struct SimBoard {
    pub board: Board,
    pub transport: MockTransportHandle,
    pub fs: MemoryFsHandle,
    pub peripherals: SimPeripheralsHandle,
    pub clock: ManualClock,
}

impl SimBoard {
    pub fn new(config: MemoryConfigStore, fs_capacity: usize) -> Self {
        Self::with_clock(config, fs_capacity, ManualClock::default())
    }

    /// Build around a caller-supplied clock
    pub fn with_clock(config: MemoryConfigStore, fs_capacity: usize, clock: ManualClock) -> Self {
        let transport = MockTransport::new();
        let fs = MemoryFileSystem::new(fs_capacity);
        let peripherals = SimPeripherals::new();

        let handles = (transport.handle(), fs.handle(), peripherals.handle());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        Self {
            board: Board {
                transport: Box::new(transport),
                config: Box::new(config),
                fs: Box::new(fs),
                peripherals: Box::new(peripherals),
                clock: shared_clock,
            },
            transport: handles.0,
            fs: handles.1,
            peripherals: handles.2,
            clock,
        }
    }
}
