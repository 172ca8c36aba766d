//! Pump manager
//!
//! The inbound API surface. Wraps the shared executor, the registry, and
//! the monitor behind one handle that the daemon (or an embedding
//! application) drives.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::discovery;
use crate::executor::{BusExecutor, RetryPolicy};
use crate::monitor::{Monitor, MonitorState};
use crate::protocol::{
    parse_transaction_block, ProtocolError, PumpAddress, PumpCommand, PumpStatus, ResponseFrame,
    Transport, TransactionRecord, TwoWireCodec,
};
use crate::registry::{DeviceInfo, DeviceRegistry, Liveness, StatusSnapshot};

/// Shared engine handle. Cheap to clone via the `Arc`s inside.
#[derive(Clone)]
pub struct PumpManager {
    executor: Arc<Mutex<BusExecutor>>,
    registry: Arc<DeviceRegistry>,
    monitor: Arc<Monitor>,
    config: CoreConfig,
}

impl PumpManager {
    /// Build a manager over any transport. The daemon passes a
    /// [`SerialTransport`](crate::protocol::SerialTransport) or a
    /// [`SimulatedBus`](crate::sim::SimulatedBus) depending on demo mode.
    pub fn new(transport: Box<dyn Transport>, config: CoreConfig) -> Self {
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            command_delay: config.command_delay(),
            timeout: config.read_timeout(),
        };
        let executor = Arc::new(Mutex::new(BusExecutor::new(
            transport,
            Box::new(TwoWireCodec),
            policy,
        )));
        let registry = Arc::new(DeviceRegistry::new(config.history_size));
        let monitor = Arc::new(Monitor::new(
            Arc::clone(&executor),
            Arc::clone(&registry),
            config.monitor_interval(),
        ));
        Self {
            executor,
            registry,
            monitor,
            config,
        }
    }

    /// All registered devices with their latest snapshot, ascending by
    /// address.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.registry.list_devices()
    }

    /// Status history for one device, oldest first.
    pub fn history(&self, address: PumpAddress) -> Vec<StatusSnapshot> {
        self.registry.history(address)
    }

    /// Last-known responsiveness for one device.
    pub fn liveness(&self, address: PumpAddress) -> Option<Liveness> {
        self.registry.liveness(address)
    }

    /// Foreground status poll. Records the snapshot on success; marks the
    /// device unresponsive when retries are exhausted.
    pub async fn poll_status(&self, address: PumpAddress) -> Result<PumpStatus, ProtocolError> {
        let result = {
            let mut executor = self.executor.lock().await;
            executor.execute(address, PumpCommand::StatusPoll)
        };

        match result {
            Ok(Some(response)) => {
                let status = response.status.unwrap_or(PumpStatus::Offline);
                if let Some(code) = response.status_code {
                    self.registry.record(address, StatusSnapshot::now(status, code));
                }
                Ok(status)
            }
            Ok(None) => Err(ProtocolError::Timeout),
            Err(err) => {
                if matches!(err, ProtocolError::Unresponsive { .. }) {
                    self.registry.mark_unresponsive(address);
                }
                Err(err)
            }
        }
    }

    /// Issue any command to one pump, returning the decoded response when
    /// the command has one.
    pub async fn send_command(
        &self,
        address: PumpAddress,
        command: PumpCommand,
    ) -> Result<Option<ResponseFrame>, ProtocolError> {
        let mut executor = self.executor.lock().await;
        if command.expects_response() {
            executor.execute(address, command)
        } else {
            executor.dispatch(address, command).map(|()| None)
        }
    }

    /// Authorize a pump, then verify the effect with a status poll. The
    /// authorize word itself has no reply, so the follow-up status is the
    /// only confirmation the loop offers.
    pub async fn authorize(&self, address: PumpAddress) -> Result<PumpStatus, ProtocolError> {
        {
            let mut executor = self.executor.lock().await;
            executor.dispatch(address, PumpCommand::Authorize)?;
        }
        let status = self.poll_status(address).await?;
        if status != PumpStatus::Authorized && status != PumpStatus::Dispensing {
            warn!(%address, ?status, "pump did not accept authorization");
        }
        Ok(status)
    }

    /// Stop one pump and verify with a status poll.
    pub async fn stop_pump(&self, address: PumpAddress) -> Result<PumpStatus, ProtocolError> {
        {
            let mut executor = self.executor.lock().await;
            executor.dispatch(address, PumpCommand::Stop)?;
        }
        self.poll_status(address).await
    }

    /// Fetch and parse the last transaction from a pump.
    pub async fn transaction(
        &self,
        address: PumpAddress,
    ) -> Result<TransactionRecord, ProtocolError> {
        let response = {
            let mut executor = self.executor.lock().await;
            executor.execute(address, PumpCommand::TransactionRequest)?
        };
        let response = response.ok_or(ProtocolError::Timeout)?;
        parse_transaction_block(&response.raw).map_err(ProtocolError::Decode)
    }

    /// Emergency stop for the whole loop. One wire word, no reply, no
    /// per-pump verification.
    pub async fn all_stop(&self) -> Result<(), ProtocolError> {
        let mut executor = self.executor.lock().await;
        executor.dispatch(PumpAddress::MIN, PumpCommand::AllStop)?;
        info!("all-stop issued");
        Ok(())
    }

    /// Scan the configured address range and reconcile the registry with
    /// the result.
    pub async fn trigger_discovery(&self) -> Result<BTreeSet<PumpAddress>, ProtocolError> {
        let min = PumpAddress::new(self.config.min_address)?;
        let max = PumpAddress::new(self.config.max_address)?;
        let found = {
            let mut executor = self.executor.lock().await;
            discovery::scan(&mut executor, min, max, self.config.discovery_timeout())?
        };
        self.registry.apply_discovery(&found);
        Ok(found)
    }

    pub async fn start_monitor(&self) {
        self.monitor.start().await;
    }

    pub async fn stop_monitor(&self) {
        self.monitor.stop().await;
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
