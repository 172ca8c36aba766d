//! # Forecourt Core Library
//!
//! Polling engine for Gilbarco-style two-wire fuel dispenser loops.
//!
//! This library provides:
//! - Two-wire protocol framing (command words, status words, DCW data blocks)
//! - Serial transport over RS-232/RS-485 current-loop adapters
//! - A serialized bus executor with pacing and retries
//! - Pump discovery, a device registry with status history, and a
//!   background monitor loop
//! - A simulated bus for tests and demo installations
//!
//! ## Example
//!
//! ```rust,ignore
//! use forecourt_core::config::CoreConfig;
//! use forecourt_core::manager::PumpManager;
//! use forecourt_core::protocol::SerialTransport;
//!
//! let config = CoreConfig::default();
//! let transport =
//!     SerialTransport::open("/dev/ttyUSB0", config.baud_rate, config.write_timeout())?;
//! let manager = PumpManager::new(Box::new(transport), config);
//!
//! let found = manager.trigger_discovery().await?;
//! manager.start_monitor().await;
//! ```

pub mod config;
pub mod discovery;
pub mod executor;
pub mod manager;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, CoreConfig};
    pub use crate::executor::{BusExecutor, RetryPolicy};
    pub use crate::manager::PumpManager;
    pub use crate::monitor::{Monitor, MonitorState};
    pub use crate::protocol::{
        ProtocolError, PumpAddress, PumpCommand, PumpStatus, SerialTransport, TransactionRecord,
        Transport,
    };
    pub use crate::registry::{DeviceInfo, DeviceRegistry, Liveness, StatusSnapshot};
    pub use crate::sim::{SimHandle, SimulatedBus, SimulatedPump};
}
