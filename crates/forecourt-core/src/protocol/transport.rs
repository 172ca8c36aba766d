//! Bus transport
//!
//! Byte-level access to the two-wire loop. The executor is written against
//! the [`Transport`] trait; [`SerialTransport`] is the production
//! implementation over a serial adapter.

use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::serial::{clear_buffers, open_port};
use super::ProtocolError;

/// Polling interval while waiting for response bytes.
const POLL_INTERVAL_MS: u64 = 2;

/// Byte-level access to the pump loop.
///
/// Implementations are synchronous; the executor owns the single instance
/// and serializes all access to it.
pub trait Transport: Send {
    /// Write bytes onto the loop and wait for the line to go quiet.
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Read exactly `count` bytes, or whatever arrived if the window
    /// closes first. Returns [`ProtocolError::Timeout`] when nothing
    /// arrives at all.
    fn receive(&mut self, count: usize, max_wait: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Read until `terminator` is seen, up to `max_len` bytes.
    fn receive_block(
        &mut self,
        terminator: u8,
        max_len: usize,
        max_wait: Duration,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Drop any unread input. Called before each command so a late reply
    /// from a previous exchange cannot be misattributed.
    fn clear_input(&mut self) -> Result<(), ProtocolError>;
}

/// Production transport over a serial two-wire adapter.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    baud_rate: u32,
    /// Upper bound on the post-write settle wait.
    write_timeout: Duration,
}

impl SerialTransport {
    /// Open the named port with two-wire line settings.
    pub fn open(
        name: &str,
        baud_rate: u32,
        write_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let port = open_port(name, Some(baud_rate))?;
        debug!(port = name, baud_rate, "serial transport opened");
        Ok(Self {
            port,
            baud_rate,
            write_timeout,
        })
    }

    /// Wrap an already-open port (used by the port probing path).
    pub fn from_port(port: Box<dyn SerialPort>, baud_rate: u32, write_timeout: Duration) -> Self {
        Self {
            port,
            baud_rate,
            write_timeout,
        }
    }

    /// Poll `bytes_to_read` until `stop` says enough arrived or the window
    /// closes. Blocking reads on the port are unreliable across platforms,
    /// so reads only happen when bytes are known to be waiting.
    fn poll_read(
        &mut self,
        max_wait: Duration,
        mut stop: impl FnMut(&[u8]) -> bool,
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut response = Vec::new();
        let mut buffer = [0u8; 64];
        let start = Instant::now();

        loop {
            if start.elapsed() > max_wait {
                break;
            }

            let available = self
                .port
                .bytes_to_read()
                .map_err(|e| ProtocolError::Serial(e.to_string()))?;

            if available > 0 {
                let to_read = std::cmp::min(available as usize, buffer.len());
                match self.port.read(&mut buffer[..to_read]) {
                    Ok(0) => break,
                    Ok(n) => {
                        response.extend_from_slice(&buffer[..n]);
                        trace!(read = n, total = response.len(), "bus read");
                        if stop(&response) {
                            break;
                        }
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        // Non-blocking, continue polling
                    }
                    Err(e) => {
                        warn!(error = %e, "bus read error");
                        return Err(ProtocolError::Io(e));
                    }
                }
            } else {
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
        }

        if response.is_empty() {
            return Err(ProtocolError::Timeout);
        }
        Ok(response)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port.write_all(data)?;

        // flush() calls tcdrain which can block indefinitely on some
        // adapters, so wait out the transmission time instead.
        // Each byte is 11 bits on the line (start + 8 data + parity + stop).
        let safe_baud = if self.baud_rate == 0 {
            9600
        } else {
            self.baud_rate
        };
        let bits = (data.len() * 11) as u64;
        let transmit_ms = bits * 1_000 / u64::from(safe_baud);
        let settle = Duration::from_millis(transmit_ms + 2).min(self.write_timeout);
        std::thread::sleep(settle);

        trace!(bytes = data.len(), "bus write");
        Ok(())
    }

    fn receive(&mut self, count: usize, max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        self.poll_read(max_wait, |data| data.len() >= count)
            .map(|mut data| {
                data.truncate(count);
                data
            })
    }

    fn receive_block(
        &mut self,
        terminator: u8,
        max_len: usize,
        max_wait: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.poll_read(max_wait, |data| {
            data.contains(&terminator) || data.len() >= max_len
        })
        .map(|mut data| {
            if let Some(pos) = data.iter().position(|&b| b == terminator) {
                data.truncate(pos + 1);
            } else {
                data.truncate(max_len);
            }
            data
        })
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        clear_buffers(self.port.as_mut())
    }
}
