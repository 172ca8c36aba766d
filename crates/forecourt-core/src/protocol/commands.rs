//! Protocol commands
//!
//! Defines the command set and status codes of the two-wire protocol.

use serde::{Deserialize, Serialize};

/// Status codes reported by pumps in a status word.
pub const STATUS_DATA_ERROR: u8 = 0x0;
/// Pump is off / ready.
pub const STATUS_OFF: u8 = 0x6;
/// Customer lifted the nozzle (call state).
pub const STATUS_CALL: u8 = 0x7;
/// Authorized but not yet delivering.
pub const STATUS_AUTH: u8 = 0x8;
/// Delivering product.
pub const STATUS_BUSY: u8 = 0x9;
/// Transaction complete (PEOT).
pub const STATUS_PEOT: u8 = 0xA;
/// Transaction complete (FEOT).
pub const STATUS_FEOT: u8 = 0xB;
/// Pump stop engaged.
pub const STATUS_STOP: u8 = 0xC;
/// Pump has data to send.
pub const STATUS_SEND_DATA: u8 = 0xD;

/// Two-wire commands addressed to a single pump (plus the bus-wide all-stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpCommand {
    /// Status poll (code 0x0)
    StatusPoll,

    /// Authorize dispensing (code 0x1)
    Authorize,

    /// Send data to the pump (code 0x2)
    SendData,

    /// Stop dispensing (code 0x3)
    Stop,

    /// Request transaction data (code 0x4)
    TransactionRequest,

    /// Request pump totals (code 0x5)
    TotalsRequest,

    /// Request real-time money (code 0x6)
    RealTimeMoney,

    /// Stop every pump on the loop (fixed word 0xFC, not addressed)
    AllStop,
}

/// Shape of the response a command elicits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The pump does not answer.
    None,
    /// A single status word.
    StatusWord,
    /// A DCW-delimited data block terminated by ETX.
    DataBlock,
}

impl PumpCommand {
    /// The 4-bit command code.
    pub fn code(&self) -> u8 {
        match self {
            PumpCommand::StatusPoll => 0x0,
            PumpCommand::Authorize => 0x1,
            PumpCommand::SendData => 0x2,
            PumpCommand::Stop => 0x3,
            PumpCommand::TransactionRequest => 0x4,
            PumpCommand::TotalsRequest => 0x5,
            PumpCommand::RealTimeMoney => 0x6,
            PumpCommand::AllStop => 0xF,
        }
    }

    /// Check if this command expects a response
    pub fn expects_response(&self) -> bool {
        !matches!(
            self,
            PumpCommand::Authorize | PumpCommand::SendData | PumpCommand::Stop | PumpCommand::AllStop
        )
    }

    /// The response shape this command elicits.
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            PumpCommand::StatusPoll => ResponseKind::StatusWord,
            PumpCommand::TransactionRequest
            | PumpCommand::TotalsRequest
            | PumpCommand::RealTimeMoney => ResponseKind::DataBlock,
            PumpCommand::Authorize
            | PumpCommand::SendData
            | PumpCommand::Stop
            | PumpCommand::AllStop => ResponseKind::None,
        }
    }
}

/// Pump operating state, decoded from a status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpStatus {
    /// Pump is off/ready (protocol 0x6)
    Idle,
    /// Customer requesting service (protocol 0x7)
    Calling,
    /// Authorized but not dispensing (protocol 0x8)
    Authorized,
    /// Actively dispensing fuel (protocol 0x9)
    Dispensing,
    /// Transaction finished (protocol 0xA/0xB)
    Complete,
    /// Stop engaged (protocol 0xC)
    Stopped,
    /// Communication or data error (protocol 0x0/0xD)
    Error,
    /// No communication with the pump
    Offline,
}

impl PumpStatus {
    /// Map a raw status code to a pump state. Unknown codes are treated as
    /// no-communication rather than an error.
    pub fn from_code(code: u8) -> Self {
        match code {
            STATUS_DATA_ERROR | STATUS_SEND_DATA => PumpStatus::Error,
            STATUS_OFF => PumpStatus::Idle,
            STATUS_CALL => PumpStatus::Calling,
            STATUS_AUTH => PumpStatus::Authorized,
            STATUS_BUSY => PumpStatus::Dispensing,
            STATUS_PEOT | STATUS_FEOT => PumpStatus::Complete,
            STATUS_STOP => PumpStatus::Stopped,
            _ => PumpStatus::Offline,
        }
    }
}
