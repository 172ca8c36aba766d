//! Protocol errors

use thiserror::Error;

use super::PumpAddress;

/// Errors produced while decoding a response frame. All decode failures are
/// retryable: the executor resends the command rather than surfacing them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("LRC mismatch: expected {expected:#03x}, got {actual:#03x}")]
    LrcMismatch { expected: u8, actual: u8 },

    #[error("address mismatch: expected pump {expected}, got pump {actual}")]
    AddressMismatch {
        expected: PumpAddress,
        actual: PumpAddress,
    },
}

/// Errors that can occur during bus communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("serial port error: {0}")]
    Serial(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response timeout")]
    Timeout,

    #[error("not connected to the bus")]
    NotConnected,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid pump address: {0} (valid range is 1-16)")]
    InvalidAddress(u8),

    #[error("pump {address} unresponsive after {attempts} attempts")]
    Unresponsive {
        address: PumpAddress,
        attempts: u32,
        #[source]
        source: Box<ProtocolError>,
    },
}

impl ProtocolError {
    /// Transient failures are retried by the executor.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::Timeout | ProtocolError::Decode(_))
    }

    /// Fatal failures indicate the link itself is gone and escalate past
    /// the retry loop (and stop the monitor).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Serial(_) | ProtocolError::Io(_) | ProtocolError::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ProtocolError::Timeout.is_transient());
        assert!(ProtocolError::Decode(DecodeError::Malformed("empty")).is_transient());
        assert!(!ProtocolError::Timeout.is_fatal());
        assert!(ProtocolError::Serial("port vanished".into()).is_fatal());
        assert!(ProtocolError::Io(std::io::Error::other("gone")).is_fatal());
    }
}
