//! Bus command executor
//!
//! Serializes all traffic on the two-wire loop. The loop is half-duplex
//! with a single controller, so exactly one exchange may be in flight at a
//! time; everything that talks to pumps goes through one executor held
//! behind an async mutex.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::protocol::{
    CommandFrame, ProtocolError, PumpAddress, PumpCommand, ResponseFrame, ResponseKind, Transport,
    WireCodec, DCW_ETX, MAX_BLOCK_LEN,
};

/// Retry and pacing policy for bus exchanges.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Minimum quiet time between consecutive commands on the loop.
    pub command_delay: Duration,
    /// Response window per attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            command_delay: Duration::from_millis(100),
            timeout: Duration::from_millis(crate::protocol::RESPONSE_TIMEOUT_MS),
        }
    }
}

/// Outcome of a single wire attempt.
enum AttemptOutcome {
    Success(Option<ResponseFrame>),
    /// Transient failure worth retrying (timeout, garbled frame).
    Retry(ProtocolError),
    /// Transport-level failure; retrying cannot help.
    Fatal(ProtocolError),
}

/// The single serialization point for the pump loop.
///
/// Owns the transport exclusively. Callers share it as
/// `Arc<tokio::sync::Mutex<BusExecutor>>`; the mutex's FIFO fairness gives
/// submission-order processing, and a caller that gives up while queued
/// never reaches the wire.
pub struct BusExecutor {
    transport: Box<dyn Transport>,
    codec: Box<dyn WireCodec>,
    policy: RetryPolicy,
    last_command: Option<Instant>,
}

impl BusExecutor {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Box<dyn WireCodec>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            codec,
            policy,
            last_command: None,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute a command and return its decoded response (`None` for
    /// commands that elicit no reply). Retries transient failures up to
    /// the policy's limit; exhaustion becomes
    /// [`ProtocolError::Unresponsive`].
    pub fn execute(
        &mut self,
        address: PumpAddress,
        command: PumpCommand,
    ) -> Result<Option<ResponseFrame>, ProtocolError> {
        self.execute_with_policy(address, command, self.policy)
    }

    /// Like [`execute`](Self::execute) but under a caller-supplied policy.
    /// Discovery uses this to probe quickly with a single retry.
    pub fn execute_with_policy(
        &mut self,
        address: PumpAddress,
        command: PumpCommand,
        policy: RetryPolicy,
    ) -> Result<Option<ResponseFrame>, ProtocolError> {
        let frame = CommandFrame::new(address, command);
        let attempts = policy.max_retries + 1;
        let mut last_transient = None;

        for attempt in 1..=attempts {
            match self.attempt(&frame, policy) {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Fatal(err) => {
                    warn!(%address, ?command, error = %err, "bus exchange failed");
                    return Err(err);
                }
                AttemptOutcome::Retry(err) => {
                    debug!(%address, ?command, attempt, error = %err, "attempt failed");
                    last_transient = Some(err);
                }
            }
        }

        Err(ProtocolError::Unresponsive {
            address,
            attempts,
            source: Box::new(last_transient.unwrap_or(ProtocolError::Timeout)),
        })
    }

    /// Fire a no-response command (authorize, stop, all-stop) with pacing
    /// but no receive phase. Callers verify the effect with a follow-up
    /// status poll.
    pub fn dispatch(
        &mut self,
        address: PumpAddress,
        command: PumpCommand,
    ) -> Result<(), ProtocolError> {
        let frame = CommandFrame::new(address, command);
        self.pace(self.policy.command_delay);
        self.transport.clear_input()?;
        self.transport.send(&self.codec.encode(&frame))?;
        self.last_command = Some(Instant::now());
        debug!(%address, ?command, "dispatched");
        Ok(())
    }

    /// One paced send/receive/decode exchange.
    fn attempt(&mut self, frame: &CommandFrame, policy: RetryPolicy) -> AttemptOutcome {
        self.pace(policy.command_delay);

        if let Err(err) = self.transport.clear_input() {
            return AttemptOutcome::Fatal(err);
        }
        if let Err(err) = self.transport.send(&self.codec.encode(frame)) {
            return AttemptOutcome::Fatal(err);
        }
        self.last_command = Some(Instant::now());

        let raw = match frame.command.response_kind() {
            ResponseKind::None => return AttemptOutcome::Success(None),
            ResponseKind::StatusWord => self.transport.receive(1, policy.timeout),
            ResponseKind::DataBlock => {
                self.transport
                    .receive_block(DCW_ETX, MAX_BLOCK_LEN, policy.timeout)
            }
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(err) if err.is_fatal() => return AttemptOutcome::Fatal(err),
            Err(err) => return AttemptOutcome::Retry(err),
        };

        let decoded = match frame.command.response_kind() {
            ResponseKind::StatusWord => self.codec.decode_status(&raw, frame.address),
            _ => self.codec.decode_block(&raw, frame.address),
        };

        match decoded {
            Ok(response) => AttemptOutcome::Success(Some(response)),
            Err(err) => AttemptOutcome::Retry(ProtocolError::Decode(err)),
        }
    }

    /// Hold off until the loop has been quiet for the configured delay.
    fn pace(&mut self, delay: Duration) {
        if let Some(last) = self.last_command {
            let elapsed = last.elapsed();
            if elapsed < delay {
                std::thread::sleep(delay - elapsed);
            }
        }
    }
}
