//! A behavioural CMSIS-DAP probe for tests.
//!
//! `MockProbe` answers the command subset this crate speaks and records
//! every packet the host writes, so tests can assert on the exact wire
//! traffic. State is shared through `Rc<RefCell<_>>` so a test keeps a
//! handle after the carrier moves into the context.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::carrier::UsbCarrier;
use crate::context::DebugContext;
use crate::error::TransportError;

pub(crate) struct MockState {
    pub packet_size: u16,
    pub packet_count: u8,
    /// Value answered for DP register 0 reads.
    pub idr: u32,
    /// SWD status byte for the next `DAP_Transfer`, consumed once.
    pub fail_next_transfer: Option<u8>,
    /// Every packet the host wrote, verbatim.
    pub writes: Vec<Vec<u8>>,
    next_value: u32,
    pending: VecDeque<Vec<u8>>,
}

impl MockState {
    fn new(packet_size: u16, packet_count: u8) -> Self {
        MockState {
            packet_size,
            packet_count,
            idr: 0x2ba0_1477,
            fail_next_transfer: None,
            writes: Vec::new(),
            next_value: 0x1000_0000,
            pending: VecDeque::new(),
        }
    }

    /// Opcode of every host packet, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.writes.iter().map(|w| w[0]).collect()
    }

    /// Host packets with the given opcode.
    pub fn packets(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|w| w[0] == opcode)
            .cloned()
            .collect()
    }

    fn handle(&mut self, packet: &[u8]) {
        let response = match packet[0] {
            0x00 => self.handle_info(packet[1]),
            0x02 => vec![0x02, 0x01],
            0x13 => vec![0x13, 0x00],
            0x04 => vec![0x04, 0x00],
            0x1d => vec![0x1d, 0x00],
            0x05 => self.handle_transfer(packet),
            // Probes answer unknown commands with 0xFF.
            _ => vec![0xff],
        };
        self.pending.push_back(response);
    }

    fn handle_info(&mut self, index: u8) -> Vec<u8> {
        let mut response = vec![0x00];
        match index {
            0x02 => {
                let name = b"Mock CMSIS-DAP\0";
                response.push(name.len() as u8);
                response.extend_from_slice(name);
            }
            0x04 => {
                let version = b"2.1.1\0";
                response.push(version.len() as u8);
                response.extend_from_slice(version);
            }
            0xf0 => response.extend_from_slice(&[1, 0x01]),
            0xfe => response.extend_from_slice(&[1, self.packet_count]),
            0xff => {
                response.push(2);
                response.extend_from_slice(&self.packet_size.to_le_bytes());
            }
            _ => response.push(0),
        }
        response
    }

    fn handle_transfer(&mut self, packet: &[u8]) -> Vec<u8> {
        let count = packet[2] as usize;
        let mut offset = 3;
        let mut words: Vec<u32> = Vec::new();
        for _ in 0..count {
            let request = packet[offset];
            offset += 1;
            let is_read = request & 0x02 != 0;
            let value_match = request & 0x10 != 0;
            if is_read && !value_match {
                let value = if request & 0x01 == 0 && request & 0x0c == 0 {
                    self.idr
                } else {
                    self.next_value += 1;
                    self.next_value
                };
                words.push(value);
            } else {
                // Write, match-mask write, or value-match read: all carry
                // a four-byte payload and produce no response word.
                offset += 4;
            }
        }

        if let Some(status) = self.fail_next_transfer.take() {
            return vec![0x05, 1, status];
        }

        let mut response = vec![0x05, count as u8, 0x01];
        for word in words {
            response.extend_from_slice(&word.to_le_bytes());
        }
        response
    }
}

pub(crate) struct MockProbe(pub Rc<RefCell<MockState>>);

impl UsbCarrier for MockProbe {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.0.borrow_mut();
        state.writes.push(buf.to_vec());
        state.handle(buf);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.0.borrow_mut();
        let response = state.pending.pop_front().ok_or(TransportError::Io)?;
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }
}

pub(crate) fn try_mock_context(
    packet_size: u16,
    packet_count: u8,
) -> (
    Result<DebugContext, TransportError>,
    Rc<RefCell<MockState>>,
) {
    let state = Rc::new(RefCell::new(MockState::new(packet_size, packet_count)));
    let result = DebugContext::with_carrier(Box::new(MockProbe(state.clone())));
    (result, state)
}

/// A configured context on a 64-byte mock probe, with the configuration
/// traffic cleared from the write log.
pub(crate) fn mock_context() -> (DebugContext, Rc<RefCell<MockState>>) {
    mock_context_with(64)
}

pub(crate) fn mock_context_with(packet_size: u16) -> (DebugContext, Rc<RefCell<MockState>>) {
    let (result, state) = try_mock_context(packet_size, 1);
    let dc = result.expect("mock probe configuration failed");
    state.borrow_mut().writes.clear();
    (dc, state)
}

/// A carrier that replays canned responses, for exercising the command
/// layer's framing checks.
pub(crate) struct ScriptedCarrier {
    pub responses: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
}

impl ScriptedCarrier {
    pub fn new(responses: &[&[u8]]) -> Self {
        ScriptedCarrier {
            responses: responses.iter().map(|r| r.to_vec()).collect(),
            writes: Vec::new(),
        }
    }
}

impl UsbCarrier for ScriptedCarrier {
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let response = self.responses.pop_front().ok_or(TransportError::Io)?;
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }
}
