//! Simulated bus
//!
//! A [`Transport`] backed by in-memory pumps. Used by the test suite and
//! by the daemon's demo mode, where [`SimHandle::advance`] drifts pump
//! state through a realistic fueling cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;

use crate::protocol::{
    calculate_lrc, ProtocolError, PumpAddress, PumpStatus, Transport, ALL_STOP_WORD, DCW_ETX,
    DCW_GRADE_NEXT, DCW_LRC_NEXT, DCW_MONEY_NEXT, DCW_PPU_NEXT, DCW_STX, DCW_VOLUME_NEXT,
};

/// Command codes as they appear in the high nibble of a command word.
const CODE_STATUS: u8 = 0x0;
const CODE_AUTHORIZE: u8 = 0x1;
const CODE_STOP: u8 = 0x3;
const CODE_TRANSACTION: u8 = 0x4;

/// One in-memory pump.
#[derive(Debug, Clone)]
pub struct SimulatedPump {
    pub address: PumpAddress,
    pub status: PumpStatus,
    /// When set, status replies carry this pump nibble instead of the real
    /// one, to exercise address-mismatch rejection.
    pub misreport_as: Option<PumpAddress>,
    /// Dispensed volume of the last transaction (XXX.XXX units).
    pub volume: f64,
    /// Price per unit for transaction blocks.
    pub price_per_unit: f64,
    pub grade: u8,
}

impl SimulatedPump {
    pub fn new(address: PumpAddress, status: PumpStatus) -> Self {
        Self {
            address,
            status,
            misreport_as: None,
            volume: 0.0,
            price_per_unit: 1.459,
            grade: 1,
        }
    }

    fn status_word(&self) -> u8 {
        let nibble = self.misreport_as.unwrap_or(self.address).to_nibble();
        (status_code(self.status) << 4) | nibble
    }

    fn transaction_block(&self) -> Vec<u8> {
        let mut body = vec![DCW_GRADE_NEXT, 0xE0 | (self.grade & 0xF)];
        body.push(DCW_VOLUME_NEXT);
        body.extend_from_slice(&to_bcd((self.volume * 1000.0).round() as u64, 6));
        body.push(DCW_MONEY_NEXT);
        let money = (self.volume * self.price_per_unit * 100.0).round() as u64;
        body.extend_from_slice(&to_bcd(money, 6));
        body.push(DCW_PPU_NEXT);
        body.extend_from_slice(&to_bcd((self.price_per_unit * 1000.0).round() as u64, 4));

        let lrc = calculate_lrc(&body);
        let mut block = vec![DCW_STX];
        block.extend_from_slice(&body);
        block.extend_from_slice(&[DCW_LRC_NEXT, lrc, DCW_ETX]);
        block
    }
}

fn status_code(status: PumpStatus) -> u8 {
    match status {
        PumpStatus::Error => 0x0,
        PumpStatus::Idle => 0x6,
        PumpStatus::Calling => 0x7,
        PumpStatus::Authorized => 0x8,
        PumpStatus::Dispensing => 0x9,
        PumpStatus::Complete => 0xB,
        PumpStatus::Stopped => 0xC,
        PumpStatus::Offline => 0x6,
    }
}

/// Encode a value as least-significant-digit-first BCD bytes.
fn to_bcd(mut value: u64, digits: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(digits);
    for _ in 0..digits {
        out.push(0xE0 | (value % 10) as u8);
        value /= 10;
    }
    out
}

#[derive(Debug, Default)]
struct SimState {
    pumps: HashMap<PumpAddress, SimulatedPump>,
    pending: Vec<u8>,
    send_count: u64,
    receive_count: u64,
    fail_sends: bool,
    garble_remaining: u32,
    /// Set while an exchange is open (send seen, response not yet read).
    in_flight: bool,
    overlap_detected: bool,
}

/// Test-side handle for inspecting and steering a [`SimulatedBus`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Total wire sends observed.
    pub fn send_count(&self) -> u64 {
        self.state.lock().unwrap().send_count
    }

    /// Completed receive calls.
    pub fn receive_count(&self) -> u64 {
        self.state.lock().unwrap().receive_count
    }

    /// Make every subsequent send fail with an I/O error.
    pub fn fail_sends(&self) {
        self.state.lock().unwrap().fail_sends = true;
    }

    /// Corrupt the next `n` responses.
    pub fn garble_next_responses(&self, n: u32) {
        self.state.lock().unwrap().garble_remaining = n;
    }

    /// Take a pump off the loop entirely; subsequent probes of its
    /// address time out.
    pub fn remove_pump(&self, address: PumpAddress) {
        self.state.lock().unwrap().pumps.remove(&address);
    }

    pub fn set_status(&self, address: PumpAddress, status: PumpStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(pump) = state.pumps.get_mut(&address) {
            pump.status = status;
        }
    }

    pub fn status(&self, address: PumpAddress) -> Option<PumpStatus> {
        let state = self.state.lock().unwrap();
        state.pumps.get(&address).map(|p| p.status)
    }

    /// True if a send ever arrived while a previous exchange was still
    /// open. The executor's serialization guarantee keeps this false.
    pub fn overlap_detected(&self) -> bool {
        self.state.lock().unwrap().overlap_detected
    }

    /// Drift every pump one step through the fueling cycle. Drives the
    /// daemon's demo mode.
    pub fn advance(&self, rng: &mut StdRng) {
        let mut state = self.state.lock().unwrap();
        for pump in state.pumps.values_mut() {
            pump.status = match pump.status {
                PumpStatus::Idle => {
                    if rng.gen_bool(0.3) {
                        PumpStatus::Calling
                    } else {
                        PumpStatus::Idle
                    }
                }
                PumpStatus::Calling => PumpStatus::Calling,
                PumpStatus::Authorized => {
                    pump.volume = 0.0;
                    PumpStatus::Dispensing
                }
                PumpStatus::Dispensing => {
                    pump.volume += rng.gen_range(0.5..4.0);
                    if rng.gen_bool(0.25) {
                        PumpStatus::Complete
                    } else {
                        PumpStatus::Dispensing
                    }
                }
                PumpStatus::Complete => {
                    if rng.gen_bool(0.5) {
                        PumpStatus::Idle
                    } else {
                        PumpStatus::Complete
                    }
                }
                other => other,
            };
        }
    }
}

/// In-memory [`Transport`] implementation.
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new(pumps: Vec<SimulatedPump>) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState {
            pumps: pumps.into_iter().map(|p| (p.address, p)).collect(),
            ..SimState::default()
        }));
        let handle = SimHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }

    fn reply_for(state: &mut SimState, word: u8) -> Vec<u8> {
        if word == ALL_STOP_WORD {
            for pump in state.pumps.values_mut() {
                pump.status = PumpStatus::Stopped;
            }
            return Vec::new();
        }

        let code = word >> 4;
        let Some(address) = PumpAddress::from_nibble(word & 0xF) else {
            return Vec::new();
        };
        let Some(pump) = state.pumps.get_mut(&address) else {
            return Vec::new();
        };

        match code {
            CODE_STATUS => vec![pump.status_word()],
            CODE_AUTHORIZE => {
                if pump.status == PumpStatus::Calling {
                    pump.status = PumpStatus::Authorized;
                }
                Vec::new()
            }
            CODE_STOP => {
                pump.status = PumpStatus::Stopped;
                Vec::new()
            }
            CODE_TRANSACTION => pump.transaction_block(),
            _ => Vec::new(),
        }
    }
}

impl Transport for SimulatedBus {
    fn send(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        state.send_count += 1;
        if state.in_flight {
            state.overlap_detected = true;
        }
        if state.fail_sends {
            return Err(ProtocolError::Io(std::io::Error::other(
                "simulated send failure",
            )));
        }

        let word = data.first().copied().unwrap_or(0);
        let mut reply = Self::reply_for(&mut state, word);
        if !reply.is_empty() && state.garble_remaining > 0 {
            state.garble_remaining -= 1;
            // Flip the low nibble so decode rejects the frame (wrong
            // source address for status words, broken STX for blocks)
            reply[0] ^= 0x0F;
        }
        state.in_flight = !reply.is_empty();
        state.pending = reply;
        Ok(())
    }

    fn receive(&mut self, count: usize, _max_wait: Duration) -> Result<Vec<u8>, ProtocolError> {
        // Keep tests fast: a silent pump surfaces immediately instead of
        // waiting out the response window.
        std::thread::sleep(Duration::from_millis(1));
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            state.in_flight = false;
            return Err(ProtocolError::Timeout);
        }
        let take = state.pending.len().min(count);
        let taken: Vec<u8> = state.pending.drain(..take).collect();
        state.in_flight = !state.pending.is_empty();
        state.receive_count += 1;
        Ok(taken)
    }

    fn receive_block(
        &mut self,
        terminator: u8,
        max_len: usize,
        _max_wait: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        std::thread::sleep(Duration::from_millis(1));
        let mut state = self.state.lock().unwrap();
        if state.pending.is_empty() {
            state.in_flight = false;
            return Err(ProtocolError::Timeout);
        }
        let end = state
            .pending
            .iter()
            .position(|&b| b == terminator)
            .map(|pos| pos + 1)
            .unwrap_or(state.pending.len())
            .min(max_len);
        let taken: Vec<u8> = state.pending.drain(..end).collect();
        state.in_flight = false;
        state.receive_count += 1;
        Ok(taken)
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().unwrap();
        state.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_transaction_block;

    fn addr(n: u8) -> PumpAddress {
        PumpAddress::new(n).unwrap()
    }

    #[test]
    fn test_status_reply_matches_pump_state() {
        let (mut bus, _handle) = SimulatedBus::new(vec![SimulatedPump::new(
            addr(5),
            PumpStatus::Authorized,
        )]);
        bus.send(&[0x05]).unwrap();
        let reply = bus.receive(1, Duration::from_millis(5)).unwrap();
        assert_eq!(reply, vec![0x85]);
    }

    #[test]
    fn test_authorize_requires_calling() {
        let (mut bus, handle) =
            SimulatedBus::new(vec![SimulatedPump::new(addr(1), PumpStatus::Idle)]);
        bus.send(&[0x11]).unwrap();
        assert_eq!(handle.status(addr(1)), Some(PumpStatus::Idle));

        handle.set_status(addr(1), PumpStatus::Calling);
        bus.send(&[0x11]).unwrap();
        assert_eq!(handle.status(addr(1)), Some(PumpStatus::Authorized));
    }

    #[test]
    fn test_all_stop_halts_every_pump() {
        let (mut bus, handle) = SimulatedBus::new(vec![
            SimulatedPump::new(addr(1), PumpStatus::Dispensing),
            SimulatedPump::new(addr(2), PumpStatus::Calling),
        ]);
        bus.send(&[ALL_STOP_WORD]).unwrap();
        assert_eq!(handle.status(addr(1)), Some(PumpStatus::Stopped));
        assert_eq!(handle.status(addr(2)), Some(PumpStatus::Stopped));
    }

    #[test]
    fn test_transaction_block_round_trips() {
        let mut pump = SimulatedPump::new(addr(2), PumpStatus::Complete);
        pump.volume = 12.345;
        pump.price_per_unit = 1.459;
        pump.grade = 2;
        let (mut bus, _handle) = SimulatedBus::new(vec![pump]);

        bus.send(&[0x42]).unwrap();
        let block = bus
            .receive_block(DCW_ETX, 50, Duration::from_millis(5))
            .unwrap();
        let record = parse_transaction_block(&block).unwrap();
        assert_eq!(record.grade, Some(2));
        assert_eq!(record.volume, Some(12.345));
        assert_eq!(record.price_per_unit, Some(1.459));
    }

    #[test]
    fn test_silent_address_times_out() {
        let (mut bus, _handle) = SimulatedBus::new(vec![]);
        bus.send(&[0x03]).unwrap();
        assert!(matches!(
            bus.receive(1, Duration::from_millis(5)),
            Err(ProtocolError::Timeout)
        ));
    }
}
