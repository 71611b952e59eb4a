//! `DAP_Transfer` wire encoding and the `DAP_TransferConfigure` command.
//!
//! Packet assembly for `DAP_Transfer` itself lives in [`crate::queue`],
//! which packs request records into a fixed buffer; this module owns the
//! request-byte bit assignments and the decode of the aggregated SWD
//! status byte the probe answers with.

use scroll::{Pwrite, LE};

use super::{CommandId, Request};
use crate::error::TransportError;

/// Request byte, bit 0: access an AP register (DP when clear).
pub(crate) const XFER_AP: u8 = 1 << 0;
pub(crate) const XFER_DP: u8 = 0;
/// Request byte, bit 1: read (write when clear).
pub(crate) const XFER_RD: u8 = 1 << 1;
pub(crate) const XFER_WR: u8 = 0;
/// Request byte, bit 4: read repeatedly until the masked value matches.
pub(crate) const XFER_VALUE_MATCH: u8 = 1 << 4;
/// Request byte, bit 5: the payload writes the probe's match mask instead
/// of a target register.
pub(crate) const XFER_MATCH_MASK: u8 = 1 << 5;

/// SWD status byte of a `DAP_Transfer` response.
pub(crate) const RSP_ACK_MASK: u8 = 0x07;
pub(crate) const RSP_ACK_OK: u8 = 0x01;
pub(crate) const RSP_ACK_WAIT: u8 = 0x02;
pub(crate) const RSP_ACK_FAULT: u8 = 0x04;
pub(crate) const RSP_PROTOCOL_ERROR: u8 = 0x08;
pub(crate) const RSP_VALUE_MISMATCH: u8 = 0x10;

/// Unpack the aggregated SWD status byte into a transport error.
///
/// The decode order is part of the contract: a wire-level parity error
/// shadows the acknowledgement bits, and a value mismatch is only
/// meaningful on an otherwise clean OK acknowledgement.
pub(crate) fn decode_status(status: u8) -> Result<(), TransportError> {
    if status & RSP_PROTOCOL_ERROR != 0 {
        tracing::error!("swd parity error");
        return Err(TransportError::SwdParity);
    }
    match status & RSP_ACK_MASK {
        RSP_ACK_OK => {}
        RSP_ACK_WAIT => {
            tracing::error!("swd wait (timeout)");
            return Err(TransportError::Timeout);
        }
        RSP_ACK_FAULT => {
            tracing::error!("swd fault");
            return Err(TransportError::SwdFault);
        }
        RSP_ACK_MASK => {
            // All acknowledgement bits set: nothing drove the line.
            tracing::error!("swd silent");
            return Err(TransportError::SwdSilent);
        }
        _ => {
            tracing::error!("swd bogus ack 0x{:02x}", status & RSP_ACK_MASK);
            return Err(TransportError::SwdBogus);
        }
    }
    if status & RSP_VALUE_MISMATCH != 0 {
        tracing::error!("value mismatch");
        return Err(TransportError::Match);
    }
    Ok(())
}

/// `DAP_TransferConfigure`: idle cycles, WAIT retry and value-match retry
/// budgets for subsequent transfers.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TransferConfigureRequest {
    pub idle_cycles: u8,
    pub wait_retry: u16,
    pub match_retry: u16,
}

impl Request for TransferConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;

    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        buffer[0] = self.idle_cycles;
        buffer
            .pwrite_with(self.wait_retry, 1, LE)
            .map_err(|_| TransportError::Failed)?;
        buffer
            .pwrite_with(self.match_retry, 3, LE)
            .map_err(|_| TransportError::Failed)?;
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<(), TransportError> {
        super::check_status("dap_transfer_configure", buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn status_decode_order() {
        assert_eq!(decode_status(RSP_ACK_OK), Ok(()));
        assert_eq!(decode_status(RSP_ACK_WAIT), Err(TransportError::Timeout));
        assert_eq!(decode_status(RSP_ACK_FAULT), Err(TransportError::SwdFault));
        assert_eq!(decode_status(0x07), Err(TransportError::SwdSilent));
        assert_eq!(decode_status(0x06), Err(TransportError::SwdBogus));
        // Parity shadows the ack bits.
        assert_eq!(
            decode_status(RSP_PROTOCOL_ERROR | RSP_ACK_OK),
            Err(TransportError::SwdParity)
        );
        // Mismatch only decodes on a clean OK ack.
        assert_eq!(
            decode_status(RSP_VALUE_MISMATCH | RSP_ACK_OK),
            Err(TransportError::Match)
        );
        assert_eq!(
            decode_status(RSP_VALUE_MISMATCH | RSP_ACK_WAIT),
            Err(TransportError::Timeout)
        );
    }

    #[test]
    fn transfer_configure_layout() {
        let request = TransferConfigureRequest {
            idle_cycles: 8,
            wait_retry: 64,
            match_retry: 0x1234,
        };
        let mut buffer = [0u8; 8];
        let len = request.to_bytes(&mut buffer).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buffer[..5], &[8, 64, 0, 0x34, 0x12]);
    }
}
