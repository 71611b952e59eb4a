//! The debug session context: one probe, one target.
//!
//! Construction opens and configures the probe; [`DebugContext::attach`]
//! then wakes the SWD target (optionally selecting a multidrop instance)
//! and reads its identification code. All register traffic goes through
//! [`TransferQueue`] batches obtained from [`DebugContext::queue`].

use crate::carrier::{BulkCarrier, UsbCarrier};
use crate::commands::connect::ConnectRequest;
use crate::commands::info::{
    self, INFO_PACKET_COUNT, INFO_PACKET_SIZE, INFO_STRING_INDICES, INFO_SWO_BUFFER_SIZE,
    INFO_UART_RX_BUFFER_SIZE, INFO_UART_TX_BUFFER_SIZE,
};
use crate::commands::swd::{SequenceRequest, SwdConfigureRequest};
use crate::commands::transfer::TransferConfigureRequest;
use crate::commands::{send_command, PACKET_BUF_SIZE};
use crate::dp::DP_DPIDR;
use crate::error::TransportError;
use crate::queue::{TransferQueue, HEADER_LEN, TX_BUF_SIZE};

/// Mirror sentinel: value unknown, force a re-send on next use.
pub(crate) const INVALID: u32 = 0xffff_ffff;

/// SWD turnaround configuration sent during probe setup.
const SWD_CONFIG_TURNAROUND_1: u8 = 0x01;

/// Session state of a [`DebugContext`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Attached to a target and ready for transactions.
    Attached,
    /// The last attach failed; a re-attach is required.
    Failure,
    /// Probe configured, no target attached yet.
    Detached,
    /// No USB connection available.
    Offline,
}

/// The canonical SWD attach sequence as a `DAP_SWD_Sequence` command.
///
/// Five bit-blocks: ≥64 ones (JTAG escape prelude), the 16-bit JTAG-to-SWD
/// escape pattern, the 128-bit Selection Alert plus the SWD activation
/// code (in case of a dormant SWD v2 DAP), a line reset, and finally a
/// `DP.TARGETSEL` write used only for multidrop. The bit pattern is fixed;
/// treat it as a binary literal.
///
/// Single-drop transmits the first 45 bytes with a block count of 5.
/// Multidrop transmits all 54 with a count of 8, after patching in the
/// target id (bytes 49..=52, little-endian) and its parity (byte 53). The
/// acknowledgement of the `TARGETSEL` write is ignored by design: only the
/// selected target may drive the line.
const ATTACH_SEQUENCE: [u8; 54] = [
    0x1d, 5,
    //    [--- 64 1s ----------------------------------]
    0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    //    [JTAG2SWD]  [- 16 1s ]  [---------------------
    0x00, 0x9e, 0xe7, 0xff, 0xff, 0x92, 0xf3, 0x09, 0x62,
    //    ----- Selection Alert Sequence ---------------
    0x00, 0x95, 0x2d, 0x85, 0x86, 0xe9, 0xaf, 0xdd, 0xe3,
    //    ---------------------]  [Act Code]  [---------
    0x00, 0xa2, 0x0e, 0xbc, 0x19, 0xa0, 0xf1, 0xff, 0xff,
    //    ----- Line Reset Sequence -------]
    0x30, 0xff, 0xff, 0xff, 0xff, 0xff, 0x0f,
    //    WR DP TARGETSEL
    0x08, 0x99,
    //    5 bits idle
    0x85,
    //    WR VALUE:32, PARITY:1, ZEROs:7
    0x28, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const ATTACH_SINGLE_DROP_LEN: usize = 45;
const ATTACH_MULTIDROP_BLOCKS: u8 = 8;

/// A debug session with one CMSIS-DAP probe.
pub struct DebugContext {
    pub(crate) carrier: Box<dyn UsbCarrier>,
    status: ProbeStatus,

    // Probe packet limits.
    pub(crate) max_packet_count: u32,
    pub(crate) max_packet_size: u32,

    // Probe-side configuration mirrors; `INVALID` forces a re-send.
    pub(crate) cfg_idle: u32,
    pub(crate) cfg_wait: u32,
    pub(crate) cfg_match: u32,
    pub(crate) cfg_mask: u32,

    /// Desired base value of `DP.SELECT`.
    pub(crate) dp_select: u32,
    /// Last value of `DP.SELECT` known to be on the target.
    pub(crate) dp_select_cache: u32,

    // Transfer queue state; the fixed buffers live here so batches do not
    // allocate on the hot path.
    pub(crate) tx_buf: [u8; TX_BUF_SIZE],
    pub(crate) tx_next: usize,
    pub(crate) tx_avail: u32,
    pub(crate) rx_avail: u32,
    pub(crate) qerror: Option<TransportError>,
}

impl DebugContext {
    /// Open the first known probe and configure it.
    pub fn open() -> Result<Self, TransportError> {
        Self::with_carrier(Box::new(BulkCarrier::open()?))
    }

    /// Build a context on a caller-supplied carrier and configure the probe.
    pub fn with_carrier(carrier: Box<dyn UsbCarrier>) -> Result<Self, TransportError> {
        let mut dc = DebugContext {
            carrier,
            status: ProbeStatus::Detached,
            max_packet_count: 1,
            max_packet_size: 64,
            cfg_idle: INVALID,
            cfg_wait: INVALID,
            cfg_match: INVALID,
            cfg_mask: INVALID,
            dp_select: 0,
            dp_select_cache: INVALID,
            tx_buf: [0; TX_BUF_SIZE],
            tx_next: 0,
            tx_avail: 0,
            rx_avail: 0,
            qerror: None,
        };
        dc.configure()?;
        Ok(dc)
    }

    /// Current session state.
    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    /// Packet limits reported by the probe, `(count, size)`.
    pub fn packet_limits(&self) -> (u32, u32) {
        (self.max_packet_count, self.max_packet_size)
    }

    /// Start a new transfer batch. Reinitialises the queue state and
    /// conservatively invalidates the `DP.SELECT` and match-mask mirrors.
    pub fn queue<'v>(&mut self) -> TransferQueue<'_, 'v> {
        TransferQueue::new(self)
    }

    /// Wake the SWD target and read `DP.IDR`.
    ///
    /// `target` selects a multidrop instance by its 32-bit target id; pass
    /// `None` on a single-drop bus. Returns the identification code.
    pub fn attach(&mut self, target: Option<u32>) -> Result<u32, TransportError> {
        let result = self.attach_sequence(target);
        self.status = match result {
            Ok(_) => ProbeStatus::Attached,
            Err(_) => ProbeStatus::Failure,
        };
        result
    }

    fn attach_sequence(&mut self, target: Option<u32>) -> Result<u32, TransportError> {
        match target {
            Some(id) => {
                // Patch the template with the TARGETSEL write: block count,
                // target id, and even parity over its 32 bits.
                let mut cmd = ATTACH_SEQUENCE;
                cmd[1] = ATTACH_MULTIDROP_BLOCKS;
                cmd[49..53].copy_from_slice(&id.to_le_bytes());
                cmd[53] = (id.count_ones() & 1) as u8;
                send_command(self.carrier.as_mut(), &SequenceRequest { payload: &cmd[1..] })?;
            }
            None => {
                send_command(
                    self.carrier.as_mut(),
                    &SequenceRequest {
                        payload: &ATTACH_SEQUENCE[1..ATTACH_SINGLE_DROP_LEN],
                    },
                )?;
            }
        }

        // A bare DP.IDR read is required after a line reset (or line reset
        // plus target select) before anything else touches the bus.
        let mut idcode = 0;
        let mut queue = self.queue();
        queue.dp_read(DP_DPIDR, &mut idcode);
        queue.exec()?;
        Ok(idcode)
    }

    /// Single-shot DP register read.
    pub fn dp_read(&mut self, dpaddr: u32) -> Result<u32, TransportError> {
        let mut value = 0;
        let mut queue = self.queue();
        queue.dp_read(dpaddr, &mut value);
        queue.exec()?;
        Ok(value)
    }

    /// Single-shot DP register write.
    pub fn dp_write(&mut self, dpaddr: u32, value: u32) -> Result<(), TransportError> {
        let mut queue = self.queue();
        queue.dp_write(dpaddr, value);
        queue.exec()
    }

    /// Single-shot AP register read.
    pub fn ap_read(&mut self, apaddr: u32) -> Result<u32, TransportError> {
        let mut value = 0;
        let mut queue = self.queue();
        queue.ap_read(apaddr, &mut value);
        queue.exec()?;
        Ok(value)
    }

    /// Single-shot AP register write.
    pub fn ap_write(&mut self, apaddr: u32, value: u32) -> Result<(), TransportError> {
        let mut queue = self.queue();
        queue.ap_write(apaddr, value);
        queue.exec()
    }

    /// Set the probe's value-match retry budget. Suppressed when the probe
    /// already holds this configuration.
    pub fn set_match_retry(&mut self, retries: u32) -> Result<(), TransportError> {
        self.transfer_configure(self.cfg_idle, self.cfg_wait, retries)
    }

    /// Reset the queue buffers and budgets, and conservatively invalidate
    /// the target-side `SELECT` mirror and the probe's match mask.
    pub(crate) fn queue_reset(&mut self) {
        // TODO: less conservative mode: keep dp_select_cache across batches
        // once attach/reset invalidation hooks exist.
        self.tx_buf[0] = crate::commands::CommandId::Transfer as u8;
        self.tx_buf[1] = 0; // DAP index, always 0 for SWD
        self.tx_buf[2] = 0;
        self.tx_next = HEADER_LEN;
        self.tx_avail = self.max_packet_size - HEADER_LEN as u32;
        self.rx_avail = self.max_packet_size - HEADER_LEN as u32;
        self.qerror = None;
        self.dp_select_cache = INVALID;
        self.cfg_mask = INVALID;
    }

    /// Send `DAP_TransferConfigure`, eliding the command when the probe
    /// already holds the requested values. Arguments clamp silently to
    /// their wire-format ranges.
    fn transfer_configure(
        &mut self,
        idle: u32,
        wait: u32,
        match_retry: u32,
    ) -> Result<(), TransportError> {
        let idle = idle.min(255);
        let wait = wait.min(65535);
        let match_retry = match_retry.min(65535);

        if self.cfg_idle == idle && self.cfg_wait == wait && self.cfg_match == match_retry {
            return Ok(());
        }

        let request = TransferConfigureRequest {
            idle_cycles: idle as u8,
            wait_retry: wait as u16,
            match_retry: match_retry as u16,
        };
        match send_command(self.carrier.as_mut(), &request) {
            Ok(()) => {
                self.cfg_idle = idle;
                self.cfg_wait = wait;
                self.cfg_match = match_retry;
                Ok(())
            }
            Err(error) => {
                self.cfg_idle = INVALID;
                self.cfg_wait = INVALID;
                self.cfg_match = INVALID;
                Err(error)
            }
        }
    }

    /// Query probe identity and limits, then bring up the SWD port.
    ///
    /// Identity strings, capabilities and buffer sizes are advisory; the
    /// packet limit minima and the port bring-up are not.
    fn configure(&mut self) -> Result<(), TransportError> {
        self.dp_select = 0;
        self.cfg_idle = INVALID;
        self.cfg_wait = INVALID;
        self.cfg_match = INVALID;
        self.cfg_mask = INVALID;
        self.max_packet_count = 1;
        self.max_packet_size = 64;
        self.queue_reset();

        for index in INFO_STRING_INDICES {
            if let Ok(Some(text)) = info::read_info_string(self.carrier.as_mut(), index) {
                tracing::info!("0x{:02x}: '{}'", index, text);
            }
        }

        if let Ok(caps) = info::read_capabilities(self.carrier.as_mut()) {
            tracing::info!("capabilities: {}", caps);
        }
        if let Ok(size) = info::read_info_u32(self.carrier.as_mut(), INFO_UART_RX_BUFFER_SIZE) {
            tracing::info!("UART RX buffer size: {}", size);
        }
        if let Ok(size) = info::read_info_u32(self.carrier.as_mut(), INFO_UART_TX_BUFFER_SIZE) {
            tracing::info!("UART TX buffer size: {}", size);
        }
        if let Ok(size) = info::read_info_u32(self.carrier.as_mut(), INFO_SWO_BUFFER_SIZE) {
            tracing::info!("SWO trace buffer size: {}", size);
        }
        if let Ok(count) = info::read_info_u8(self.carrier.as_mut(), INFO_PACKET_COUNT) {
            tracing::info!("max packet count: {}", count);
            self.max_packet_count = count as u32;
        }
        if let Ok(size) = info::read_info_u16(self.carrier.as_mut(), INFO_PACKET_SIZE) {
            tracing::info!("max packet size: {}", size);
            self.max_packet_size = size as u32;
        }

        if self.max_packet_count < 1 || self.max_packet_size < 64 {
            tracing::error!("impossible packet configuration");
            return Err(TransportError::Protocol);
        }

        self.dp_select_cache = INVALID;

        // Clip to our fixed buffers.
        if self.max_packet_size > PACKET_BUF_SIZE as u32 {
            self.max_packet_size = PACKET_BUF_SIZE as u32;
        }

        send_command(self.carrier.as_mut(), &ConnectRequest::Swd)?;
        send_command(
            self.carrier.as_mut(),
            &SwdConfigureRequest(SWD_CONFIG_TURNAROUND_1),
        )?;
        self.transfer_configure(8, 64, 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::ProbeStatus;
    use crate::dp::{DP_ABORT, DP_DPIDR};
    use crate::error::TransportError;
    use crate::mock::{mock_context, try_mock_context};

    #[test]
    fn configure_queries_then_brings_up_port() {
        let (result, state) = try_mock_context(512, 4);
        let dc = result.unwrap();
        assert_eq!(dc.packet_limits(), (4, 512));
        assert_eq!(dc.status(), ProbeStatus::Detached);

        let opcodes = state.borrow().opcodes();
        assert_eq!(opcodes[opcodes.len() - 3..], [0x02, 0x13, 0x04]);
        assert!(opcodes[..opcodes.len() - 3].iter().all(|&op| op == 0x00));

        // One turnaround cycle, then idle=8 wait=64 match=0.
        assert_eq!(state.borrow().packets(0x13), vec![vec![0x13, 0x01]]);
        assert_eq!(state.borrow().packets(0x04), vec![vec![0x04, 8, 64, 0, 0, 0]]);
    }

    #[test]
    fn oversized_packet_limit_is_clipped() {
        let (result, _state) = try_mock_context(2048, 1);
        assert_eq!(result.unwrap().packet_limits(), (1, 1024));
    }

    #[test]
    fn impossible_packet_limits_fail_construction() {
        let (result, _state) = try_mock_context(32, 1);
        assert_eq!(result.err(), Some(TransportError::Protocol));

        let (result, _state) = try_mock_context(64, 0);
        assert_eq!(result.err(), Some(TransportError::Protocol));
    }

    #[test]
    fn single_drop_attach() {
        let (mut dc, state) = mock_context();
        let idcode = dc.attach(None).unwrap();
        assert_eq!(idcode, state.borrow().idr);
        assert_eq!(dc.status(), ProbeStatus::Attached);

        // The short form of the sequence: five blocks, 45 bytes.
        let sequences = state.borrow().packets(0x1d);
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].len(), 45);
        assert_eq!(sequences[0][1], 5);

        // Followed by exactly one bare DP.IDR read.
        let transfers = state.borrow().packets(0x05);
        assert_eq!(transfers, vec![vec![0x05, 0x00, 1, 0x02]]);
    }

    #[test]
    fn multidrop_attach_patches_targetsel() {
        let (mut dc, state) = mock_context();
        dc.attach(Some(0x0100_2927)).unwrap();

        let sequences = state.borrow().packets(0x1d);
        assert_eq!(sequences[0].len(), 54);
        assert_eq!(sequences[0][1], 8);
        assert_eq!(sequences[0][49..53], [0x27, 0x29, 0x00, 0x01]);
        assert_eq!(sequences[0][53], 0); // eight bits set: even parity
    }

    #[test]
    fn multidrop_parity_covers_odd_ids() {
        let (mut dc, state) = mock_context();
        dc.attach(Some(0x0100_2926)).unwrap();
        assert_eq!(state.borrow().packets(0x1d)[0][53], 1);
    }

    #[test]
    fn failed_attach_marks_failure() {
        let (mut dc, state) = mock_context();
        state.borrow_mut().fail_next_transfer = Some(0x07);
        assert_eq!(dc.attach(None), Err(TransportError::SwdSilent));
        assert_eq!(dc.status(), ProbeStatus::Failure);
    }

    #[test]
    fn match_retry_configuration_elides() {
        let (mut dc, state) = mock_context();
        dc.set_match_retry(5).unwrap();
        dc.set_match_retry(5).unwrap();
        assert_eq!(state.borrow().packets(0x04), vec![vec![0x04, 8, 64, 0, 5, 0]]);
    }

    #[test]
    fn match_retry_clamps_to_wire_range() {
        let (mut dc, state) = mock_context();
        dc.set_match_retry(1_000_000).unwrap();
        assert_eq!(
            state.borrow().packets(0x04),
            vec![vec![0x04, 8, 64, 0, 0xff, 0xff]]
        );
    }

    #[test]
    fn single_shot_wrappers() {
        let (mut dc, state) = mock_context();
        let idr = state.borrow().idr;
        assert_eq!(dc.dp_read(DP_DPIDR), Ok(idr));
        dc.ap_write(0x04, 0x2000_0000).unwrap();
        assert_eq!(dc.ap_read(0x0c), Ok(0x1000_0001));
        dc.dp_write(DP_ABORT, 0x1e).unwrap();
        // Four batches went out, one per wrapper call.
        assert_eq!(state.borrow().packets(0x05).len(), 4);
    }
}
