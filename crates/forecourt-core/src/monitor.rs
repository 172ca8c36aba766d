//! Background status monitor
//!
//! Periodically status-polls every registered pump through the shared
//! executor and records the results. The executor lock is taken per
//! device, so foreground commands interleave between polls instead of
//! waiting out a whole cycle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::executor::BusExecutor;
use crate::protocol::{ProtocolError, PumpCommand};
use crate::registry::{DeviceRegistry, StatusSnapshot};

/// Where the monitor currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    /// Never started.
    Idle,
    /// Walking the device list.
    Polling,
    /// Waiting for the next tick.
    Sleeping,
    /// Shut down (requested or after a fatal bus error).
    Stopped,
}

/// Handle to the background polling task.
pub struct Monitor {
    executor: Arc<Mutex<BusExecutor>>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    state: watch::Sender<MonitorState>,
}

impl Monitor {
    pub fn new(
        executor: Arc<Mutex<BusExecutor>>,
        registry: Arc<DeviceRegistry>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(MonitorState::Idle);
        Self {
            executor,
            registry,
            interval,
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Spawn the polling task. No-op if already running.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock().await = Some(shutdown_tx);

        let executor = Arc::clone(&self.executor);
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        let state = self.state.clone();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "monitor started");

            loop {
                state.send_replace(MonitorState::Sleeping);
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                state.send_replace(MonitorState::Polling);
                if let Err(err) = poll_cycle(&executor, &registry).await {
                    error!(error = %err, "monitor stopping after fatal bus error");
                    break;
                }
            }

            state.send_replace(MonitorState::Stopped);
            info!("monitor stopped");
        }));
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

/// Poll every known address once. Per-device failures are recorded and the
/// cycle continues; only fatal transport errors propagate.
async fn poll_cycle(
    executor: &Arc<Mutex<BusExecutor>>,
    registry: &Arc<DeviceRegistry>,
) -> Result<(), ProtocolError> {
    for address in registry.known_addresses() {
        // Lock per device so foreground commands are not starved
        let result = {
            let mut executor = executor.lock().await;
            executor.execute(address, PumpCommand::StatusPoll)
        };

        match result {
            Ok(Some(response)) => {
                if let (Some(status), Some(code)) = (response.status, response.status_code) {
                    registry.record(address, StatusSnapshot::now(status, code));
                }
            }
            Ok(None) => {}
            Err(ProtocolError::Unresponsive { attempts, .. }) => {
                warn!(%address, attempts, "pump unresponsive");
                registry.mark_unresponsive(address);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(%address, error = %err, "poll failed");
                registry.mark_unresponsive(address);
            }
        }
    }
    Ok(())
}
