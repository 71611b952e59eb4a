//! The batched `DAP_Transfer` engine.
//!
//! A [`TransferQueue`] collects DP/AP register operations into a single
//! `DAP_Transfer` packet, inserting `DP.SELECT` writes from the register
//! cache where the target's routing has to change first. Reads bind a
//! caller-supplied `&mut u32` that is filled in when the queue executes;
//! responses are scattered in enqueue order.
//!
//! Errors do not surface per enqueue. The first failure (bad address, or a
//! mid-batch flush that went wrong) is latched, later enqueues become
//! no-ops, and [`TransferQueue::exec`] reports it. This keeps batch
//! construction free of per-operation branching while never losing the
//! first fault.

use scroll::{Pread, LE};

use crate::commands::transfer::{
    decode_status, XFER_AP, XFER_DP, XFER_MATCH_MASK, XFER_RD, XFER_VALUE_MATCH, XFER_WR,
};
use crate::commands::CommandId;
use crate::context::DebugContext;
use crate::dp::{ap_addr_valid, dp_addr_valid, Select, DP_SELECT};
use crate::error::TransportError;

/// Fixed transmit/receive buffer size; `max_packet_size` is clipped to it.
pub(crate) const TX_BUF_SIZE: usize = 1024;
/// Destination slots for queued reads.
pub(crate) const RX_SLOT_CAP: usize = 256;
/// `DAP_Transfer` header: command byte, DAP index, request count.
pub(crate) const HEADER_LEN: usize = 3;
/// The request count field is a single byte.
const MAX_REQUESTS: u8 = 255;

/// One batch of DP/AP operations against a [`DebugContext`].
///
/// Obtained from [`DebugContext::queue`]; enqueue operations, then call
/// [`exec`](TransferQueue::exec). Operations that overflow the probe's
/// packet budget flush the pending requests transparently.
pub struct TransferQueue<'dc, 'v> {
    dc: &'dc mut DebugContext,
    rx: Vec<&'v mut u32>,
}

impl<'dc, 'v> TransferQueue<'dc, 'v> {
    pub(crate) fn new(dc: &'dc mut DebugContext) -> Self {
        dc.queue_reset();
        Self {
            dc,
            rx: Vec::with_capacity(RX_SLOT_CAP),
        }
    }

    /// Queue a DP register read into `value`.
    pub fn dp_read(&mut self, dpaddr: u32, value: &'v mut u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_dp_addr(dpaddr) {
            return;
        }
        self.dp_select(dpaddr);
        self.raw_read(XFER_DP | XFER_RD | (dpaddr as u8 & 0x0c), value);
    }

    /// Queue a DP register write.
    pub fn dp_write(&mut self, dpaddr: u32, value: u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_dp_addr(dpaddr) {
            return;
        }
        self.dp_select(dpaddr);
        self.raw_write(XFER_DP | XFER_WR | (dpaddr as u8 & 0x0c), value);
    }

    /// Queue an AP register read into `value`.
    pub fn ap_read(&mut self, apaddr: u32, value: &'v mut u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_ap_addr(apaddr) {
            return;
        }
        self.ap_select(apaddr);
        self.raw_read(XFER_AP | XFER_RD | (apaddr as u8 & 0x0c), value);
    }

    /// Queue an AP register write.
    pub fn ap_write(&mut self, apaddr: u32, value: u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_ap_addr(apaddr) {
            return;
        }
        self.ap_select(apaddr);
        self.raw_write(XFER_AP | XFER_WR | (apaddr as u8 & 0x0c), value);
    }

    /// Queue a DP read that polls until the masked value equals `expected`,
    /// within the probe's configured match retry budget.
    pub fn dp_match(&mut self, dpaddr: u32, expected: u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_dp_addr(dpaddr) {
            return;
        }
        self.dp_select(dpaddr);
        self.raw_write(
            XFER_DP | XFER_RD | XFER_VALUE_MATCH | (dpaddr as u8 & 0x0c),
            expected,
        );
    }

    /// Queue an AP read that polls until the masked value equals `expected`.
    pub fn ap_match(&mut self, apaddr: u32, expected: u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if !self.check_ap_addr(apaddr) {
            return;
        }
        self.ap_select(apaddr);
        self.raw_write(
            XFER_AP | XFER_RD | XFER_VALUE_MATCH | (apaddr as u8 & 0x0c),
            expected,
        );
    }

    /// Queue a probe match-mask update for subsequent value-match reads.
    /// Suppressed when the probe already holds `mask`.
    pub fn set_match_mask(&mut self, mask: u32) {
        if self.dc.qerror.is_some() {
            return;
        }
        if self.dc.cfg_mask == mask {
            return;
        }
        self.dc.cfg_mask = mask;
        self.raw_write(XFER_WR | XFER_MATCH_MASK, mask);
    }

    /// Flush the queue: transmit pending requests, scatter the response
    /// words, and report the first error of the whole batch.
    ///
    /// The queue is left reinitialised whatever the outcome.
    pub fn exec(mut self) -> Result<(), TransportError> {
        if let Some(error) = self.dc.qerror.take() {
            self.dc.queue_reset();
            self.rx.clear();
            return Err(error);
        }
        self.run()
    }

    fn check_dp_addr(&mut self, dpaddr: u32) -> bool {
        if dp_addr_valid(dpaddr) {
            return true;
        }
        tracing::error!("invalid DP addr {:#010x}", dpaddr);
        self.dc.qerror = Some(TransportError::InvalidArg);
        false
    }

    fn check_ap_addr(&mut self, apaddr: u32) -> bool {
        if ap_addr_valid(apaddr) {
            return true;
        }
        tracing::error!("invalid AP addr {:#010x}", apaddr);
        self.dc.qerror = Some(TransportError::InvalidArg);
        false
    }

    /// Adjust `DP.SELECT` for a DP access, if necessary.
    ///
    /// Only register 4 is banked, so nothing is queued for any other DP
    /// register.
    fn dp_select(&mut self, dpaddr: u32) {
        if dpaddr & 0xf != 0x4 {
            return;
        }
        let mut select = Select(self.dc.dp_select);
        select.set_dpbank((dpaddr >> 4) as u8);
        if select.0 != self.dc.dp_select_cache {
            self.dc.dp_select_cache = select.0;
            self.raw_write(XFER_DP | XFER_WR | DP_SELECT as u8, select.0);
        }
    }

    /// Adjust `DP.SELECT` for an AP access, if necessary.
    ///
    /// DPBANK is always returned to 0 here: an AP access is typically
    /// followed by DP reads (`RDBUFF`, `CTRL/STAT`) that need bank 0.
    fn ap_select(&mut self, apaddr: u32) {
        let mut select = Select(0);
        select.set_apsel((apaddr >> 8) as u8);
        select.set_apbank((apaddr >> 4) as u8);
        if select.0 != self.dc.dp_select_cache {
            self.dc.dp_select_cache = select.0;
            self.raw_write(XFER_DP | XFER_WR | DP_SELECT as u8, select.0);
        }
    }

    /// Append a read request: 1 transmit byte, 4 response bytes, one
    /// destination slot. Flushes first if any budget is exhausted.
    fn raw_read(&mut self, request: u8, value: &'v mut u32) {
        if self.dc.tx_avail < 1
            || self.dc.rx_avail < 4
            || self.rx.len() == RX_SLOT_CAP
            || self.dc.tx_buf[2] == MAX_REQUESTS
        {
            // Make space for more work; a failed flush latches.
            if let Err(error) = self.run() {
                self.dc.qerror = Some(error);
                return;
            }
        }
        self.dc.tx_buf[self.dc.tx_next] = request;
        self.dc.tx_next += 1;
        self.dc.tx_avail -= 1;
        self.dc.rx_avail -= 4;
        self.dc.tx_buf[2] += 1;
        self.rx.push(value);
    }

    /// Append a write or value-match request: 5 transmit bytes, no
    /// response word. Flushes first if the transmit budget is exhausted.
    fn raw_write(&mut self, request: u8, value: u32) {
        if self.dc.tx_avail < 5 || self.dc.tx_buf[2] == MAX_REQUESTS {
            if let Err(error) = self.run() {
                self.dc.qerror = Some(error);
                return;
            }
        }
        let at = self.dc.tx_next;
        self.dc.tx_buf[at] = request;
        self.dc.tx_buf[at + 1..at + 5].copy_from_slice(&value.to_le_bytes());
        self.dc.tx_next += 5;
        self.dc.tx_avail -= 5;
        self.dc.tx_buf[2] += 1;
    }

    /// Transmit and decode whatever is queued, then reinitialise.
    fn run(&mut self) -> Result<(), TransportError> {
        if self.dc.tx_buf[2] == 0 {
            return Ok(());
        }
        let result = self.transact();
        self.dc.queue_reset();
        self.rx.clear();
        result
    }

    fn transact(&mut self) -> Result<(), TransportError> {
        let len = self.dc.tx_next;
        tracing::trace!("> {:02x?}", &self.dc.tx_buf[..len]);
        if self.dc.carrier.write(&self.dc.tx_buf[..len])? != len {
            tracing::error!("transfer queue: short usb write");
            return Err(TransportError::Io);
        }

        let mut rx_buf = [0u8; TX_BUF_SIZE];
        let received = self.dc.carrier.read(&mut rx_buf)?;
        tracing::trace!("< {:02x?}", &rx_buf[..received]);
        if received < HEADER_LEN || rx_buf[0] != CommandId::Transfer as u8 {
            tracing::error!("transfer queue: bad response");
            return Err(TransportError::Protocol);
        }

        decode_status(rx_buf[2])?;

        // Scatter however many response words came back, in request order.
        let words = (received - HEADER_LEN) / 4;
        for (i, slot) in self.rx.iter_mut().take(words).enumerate() {
            **slot = rx_buf
                .pread_with(HEADER_LEN + i * 4, LE)
                .map_err(|_| TransportError::Protocol)?;
        }
        Ok(())
    }
}
