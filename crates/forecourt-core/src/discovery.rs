//! Bus discovery
//!
//! Probes an address range with status polls and reports which pumps
//! answered. Discovery only observes the loop; reconciling the result into
//! the registry is the caller's job.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::executor::{BusExecutor, RetryPolicy};
use crate::protocol::{ProtocolError, PumpAddress, PumpCommand};

/// Probe every address in `min..=max` with a status poll.
///
/// A decoded reply includes the address in the result; a timeout or a
/// garbled reply excludes it. Fatal transport errors abort the whole scan.
/// Probes use a single retry so a dead loop does not stall for the full
/// per-device retry budget times sixteen.
pub fn scan(
    executor: &mut BusExecutor,
    min: PumpAddress,
    max: PumpAddress,
    timeout: Duration,
) -> Result<BTreeSet<PumpAddress>, ProtocolError> {
    let probe_policy = RetryPolicy {
        max_retries: 1,
        command_delay: executor.policy().command_delay,
        timeout,
    };

    let mut found = BTreeSet::new();
    for address in min.range_to(max) {
        match executor.execute_with_policy(address, PumpCommand::StatusPoll, probe_policy) {
            Ok(_) => {
                debug!(%address, "pump answered probe");
                found.insert(address);
            }
            Err(ProtocolError::Unresponsive { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    info!(count = found.len(), "discovery scan complete");
    Ok(found)
}
