//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{PumpAddress, DEFAULT_BAUD_RATE, RESPONSE_TIMEOUT_MS};

/// Configuration problems surfaced at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid pump address range {min}..={max}")]
    InvalidAddressRange { min: u8, max: u8 },

    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
}

/// Engine settings with two-wire defaults.
///
/// Native loop speed is 5787 baud but USB adapters run the closest
/// standard rate, so 9600 is the shipped default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Response window per wire attempt, in milliseconds.
    pub read_timeout_ms: u64,
    /// Write settle time limit, in milliseconds.
    pub write_timeout_ms: u64,
    /// Lowest pump address probed.
    pub min_address: u8,
    /// Highest pump address probed.
    pub max_address: u8,
    /// Per-probe timeout during discovery, in milliseconds.
    pub discovery_timeout_ms: u64,
    /// Time between monitor poll cycles, in seconds.
    pub monitor_interval_secs: u64,
    /// Snapshots retained per device.
    pub history_size: usize,
    /// Async worker threads for the daemon runtime.
    pub max_workers: usize,
    /// Quiet time between consecutive bus commands, in milliseconds.
    pub command_delay_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Candidate serial ports; empty means probe all detected ports.
    pub com_ports: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: RESPONSE_TIMEOUT_MS,
            write_timeout_ms: RESPONSE_TIMEOUT_MS,
            min_address: PumpAddress::MIN.get(),
            max_address: PumpAddress::MAX.get(),
            discovery_timeout_ms: 1_000,
            monitor_interval_secs: 30,
            history_size: 100,
            max_workers: 10,
            command_delay_ms: 100,
            max_retries: 3,
            com_ports: Vec::new(),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_address < PumpAddress::MIN.get()
            || self.max_address > PumpAddress::MAX.get()
            || self.min_address > self.max_address
        {
            return Err(ConfigError::InvalidAddressRange {
                min: self.min_address,
                max: self.max_address,
            });
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroValue { field: "baud_rate" });
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "read_timeout_ms",
            });
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "write_timeout_ms",
            });
        }
        if self.monitor_interval_secs == 0 {
            return Err(ConfigError::ZeroValue {
                field: "monitor_interval_secs",
            });
        }
        if self.history_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "history_size",
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max_workers",
            });
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_address_range_rejected() {
        let config = CoreConfig {
            min_address: 8,
            max_address: 4,
            ..CoreConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAddressRange { min: 8, max: 4 })
        );
    }

    #[test]
    fn test_zero_write_timeout_rejected() {
        let config = CoreConfig {
            write_timeout_ms: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                field: "write_timeout_ms"
            })
        ));
    }

    #[test]
    fn test_zero_history_rejected() {
        let config = CoreConfig {
            history_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                field: "history_size"
            })
        ));
    }
}
