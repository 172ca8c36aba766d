//! Device registry and status history
//!
//! Tracks the set of pumps found on the loop, their last observed status,
//! and a bounded history of status snapshots per device.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::protocol::{PumpAddress, PumpStatus};

/// Default number of snapshots retained per device.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Whether a device has been answering polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Last exchange succeeded.
    Alive,
    /// Last exchange exhausted its retries.
    Unresponsive,
    /// Registered but not yet polled.
    Unknown,
}

/// One observed status, timestamped at decode time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: PumpStatus,
    /// Raw 4-bit status code off the wire.
    pub status_code: u8,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn now(status: PumpStatus, status_code: u8) -> Self {
        Self {
            status,
            status_code,
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time view of a registered device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub address: PumpAddress,
    pub liveness: Liveness,
    pub last_status: Option<StatusSnapshot>,
}

#[derive(Debug)]
struct DeviceEntry {
    liveness: Liveness,
    history: VecDeque<StatusSnapshot>,
}

impl DeviceEntry {
    fn new() -> Self {
        Self {
            liveness: Liveness::Unknown,
            history: VecDeque::new(),
        }
    }
}

/// Registry of known pumps. Interior-locked so the monitor task and
/// foreground callers can share one instance behind an `Arc`.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<PumpAddress, DeviceEntry>>,
    history_size: usize,
}

impl DeviceRegistry {
    pub fn new(history_size: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            history_size: history_size.max(1),
        }
    }

    /// Add an address with no observations yet. No-op when it already
    /// exists (existing history is kept).
    pub fn register(&self, address: PumpAddress) {
        let mut devices = self.devices.write().unwrap();
        if !devices.contains_key(&address) {
            devices.insert(address, DeviceEntry::new());
            debug!(%address, "device registered");
        }
    }

    /// Append a snapshot for a device and refresh its liveness. An
    /// [`Offline`](PumpStatus::Offline) snapshot marks the device
    /// unresponsive; anything else marks it alive. Unknown addresses are
    /// registered on the fly so a foreground poll of an undiscovered pump
    /// still leaves a trace.
    pub fn record(&self, address: PumpAddress, snapshot: StatusSnapshot) {
        let mut devices = self.devices.write().unwrap();
        let entry = devices.entry(address).or_insert_with(DeviceEntry::new);
        entry.liveness = if snapshot.status == PumpStatus::Offline {
            Liveness::Unresponsive
        } else {
            Liveness::Alive
        };
        if entry.history.len() == self.history_size {
            entry.history.pop_front();
        }
        entry.history.push_back(snapshot);
    }

    /// Flag a device whose poll exhausted its retries. History is kept.
    /// Like [`record`](Self::record), unknown addresses are registered on
    /// the fly so a failed foreground poll leaves a trace too.
    pub fn mark_unresponsive(&self, address: PumpAddress) {
        let mut devices = self.devices.write().unwrap();
        let entry = devices.entry(address).or_insert_with(DeviceEntry::new);
        entry.liveness = Liveness::Unresponsive;
    }

    /// Snapshot history for one device, oldest first. Empty for unknown
    /// addresses.
    pub fn history(&self, address: PumpAddress) -> Vec<StatusSnapshot> {
        let devices = self.devices.read().unwrap();
        devices
            .get(&address)
            .map(|entry| entry.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn liveness(&self, address: PumpAddress) -> Option<Liveness> {
        let devices = self.devices.read().unwrap();
        devices.get(&address).map(|entry| entry.liveness)
    }

    /// All registered addresses in ascending order.
    pub fn known_addresses(&self) -> Vec<PumpAddress> {
        let devices = self.devices.read().unwrap();
        let mut addresses: Vec<_> = devices.keys().copied().collect();
        addresses.sort();
        addresses
    }

    /// Point-in-time view of every device, ascending by address.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.read().unwrap();
        let mut infos: Vec<_> = devices
            .iter()
            .map(|(&address, entry)| DeviceInfo {
                address,
                liveness: entry.liveness,
                last_status: entry.history.back().cloned(),
            })
            .collect();
        infos.sort_by_key(|info| info.address);
        infos
    }

    /// Reconcile with the latest discovery scan: register addresses that
    /// appeared and drop ones the scan no longer sees.
    pub fn apply_discovery(&self, found: &BTreeSet<PumpAddress>) {
        let mut devices = self.devices.write().unwrap();
        devices.retain(|address, _| found.contains(address));
        for &address in found {
            devices.entry(address).or_insert_with(DeviceEntry::new);
        }
        info!(count = found.len(), "registry updated from discovery");
    }
}
