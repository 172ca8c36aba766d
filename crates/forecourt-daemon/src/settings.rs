//! Environment-sourced daemon settings
//!
//! The core consumes a fully resolved [`CoreConfig`]; all environment
//! parsing happens here. Unset variables fall back to the core defaults,
//! malformed values are rejected at startup.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use forecourt_core::config::CoreConfig;

/// Resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: CoreConfig,
    /// Run against the simulated bus instead of a serial port.
    pub demo_mode: bool,
}

fn parse_var<T: FromStr>(name: &str, target: &mut T) -> Result<()>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(name) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: {raw:?}"))?;
    }
    Ok(())
}

fn parse_bool_var(name: &str) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => bail!("invalid {name}: {raw:?}"),
        },
        Err(_) => Ok(false),
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = CoreConfig::default();

        parse_var("SERIAL_BAUDRATE", &mut config.baud_rate)?;
        parse_var("SERIAL_TIMEOUT", &mut config.read_timeout_ms)?;
        parse_var("SERIAL_WRITE_TIMEOUT", &mut config.write_timeout_ms)?;
        parse_var("MIN_PUMP_ADDRESS", &mut config.min_address)?;
        parse_var("MAX_PUMP_ADDRESS", &mut config.max_address)?;
        parse_var("DISCOVERY_TIMEOUT", &mut config.discovery_timeout_ms)?;
        parse_var("MONITOR_INTERVAL", &mut config.monitor_interval_secs)?;
        parse_var("STATUS_HISTORY_SIZE", &mut config.history_size)?;
        parse_var("MAX_WORKERS", &mut config.max_workers)?;
        parse_var("COMMAND_DELAY", &mut config.command_delay_ms)?;
        parse_var("MAX_RETRIES", &mut config.max_retries)?;

        if let Ok(raw) = env::var("COM_PORT") {
            config.com_ports = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate().context("invalid configuration")?;

        Ok(Self {
            config,
            demo_mode: parse_bool_var("DEMO_MODE")?,
        })
    }
}
