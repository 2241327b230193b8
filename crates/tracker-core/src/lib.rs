//! tracker-core - control core of a battery-powered field tracker
//!
//! This crate drives the device through its operating modes and serves the
//! configuration interface, on top of collaborator traits for the transport,
//! filesystem, configuration store and board peripherals.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DeviceController                          │
//! │  Boot / Charging / Provisioning / Operational / ...         │
//! │                                                             │
//! │  ┌──────────────────┐   ┌────────────────┐  ┌────────────┐ │
//! │  │SessionController │   │ SharedState    │  │ LogQueue   │ │
//! │  │ (TransferContext)│   │ (file, tests)  │  │ (ring pool)│ │
//! │  └────────┬─────────┘   └────────────────┘  └────────────┘ │
//! │           │ send / receive pools                            │
//! │  ┌────────┴────────────────────────────────────────────┐   │
//! │  │ Board: Transport | FileSystem | ConfigStore |       │   │
//! │  │        Peripherals | Clock                          │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one control thread. Transport completions arrive as
//! events and are applied when the current mode polls the transport.

pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod hal;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod shared;
pub mod sim;

pub use buffer::{BufferPool, PoolError, PoolPolicy};
pub use context::{SessionState, TransferContext};
pub use device::{DeviceController, DeviceState};
pub use error::{DeviceError, Disposition, SessionError};
pub use hal::Board;
pub use protocol::{ErrorCode, Request, Response};
pub use session::SessionController;
pub use settings::CoreSettings;
pub use shared::{SharedState, TestState};
