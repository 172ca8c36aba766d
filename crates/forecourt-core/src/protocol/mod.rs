//! Two-Wire Serial Protocol Communication
//!
//! Implements the Gilbarco two-wire protocol for SK700-II and compatible
//! fuel dispensers, as used over RS-232/RS-485 current-loop adapters.
//!
//! Commands and status replies are single words; transaction data arrives
//! as DCW-delimited blocks (see [`frame`]).

pub mod address;
pub mod commands;
mod error;
pub mod frame;
pub mod serial;
mod transport;

pub use address::PumpAddress;
pub use commands::{PumpCommand, PumpStatus, ResponseKind};
pub use error::{DecodeError, ProtocolError};
pub use frame::{
    calculate_lrc, parse_transaction_block, CommandFrame, ResponseFrame, TransactionRecord,
    TwoWireCodec, WireCodec, ALL_STOP_WORD, DCW_ETX, DCW_GRADE_NEXT, DCW_LRC_NEXT,
    DCW_MONEY_NEXT, DCW_PPU_NEXT, DCW_PUMP_ID_NEXT, DCW_STX, DCW_VOLUME_NEXT,
};
pub use serial::{clear_buffers, configure_port, list_ports, open_port, PortInfo};
pub use transport::{SerialTransport, Transport};

/// Native two-wire baud rate. Most RS-232/485 adapters cannot generate it.
pub const TWO_WIRE_BAUD_RATE: u32 = 5787;

/// Default baud rate for adapter-based installations (closest standard rate).
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Maximum pump response time in milliseconds on the two-wire loop.
pub const RESPONSE_TIMEOUT_MS: u64 = 68;

/// Upper bound on a transaction data block, in bytes.
pub const MAX_BLOCK_LEN: usize = 50;
