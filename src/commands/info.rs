//! `DAP_Info` queries: probe identity strings, capabilities, packet limits.

use scroll::{Pread, LE};

use super::{CommandId, Request};
use crate::carrier::UsbCarrier;
use crate::error::TransportError;

/// Identity string sub-indices, enumerated at configuration time for
/// reporting. 0x01 = vendor, 0x02 = product, 0x03 = serial, 0x04 =
/// CMSIS-DAP version, 0x05/0x06 = target device vendor/name, 0x07/0x08 =
/// board vendor/name, 0x09 = firmware version.
pub(crate) const INFO_STRING_INDICES: std::ops::RangeInclusive<u8> = 0x00..=0x09;

pub(crate) const INFO_CAPABILITIES: u8 = 0xf0;
pub(crate) const INFO_UART_RX_BUFFER_SIZE: u8 = 0xfb;
pub(crate) const INFO_UART_TX_BUFFER_SIZE: u8 = 0xfc;
pub(crate) const INFO_SWO_BUFFER_SIZE: u8 = 0xfd;
pub(crate) const INFO_PACKET_COUNT: u8 = 0xfe;
pub(crate) const INFO_PACKET_SIZE: u8 = 0xff;

/// One `DAP_Info` query with payload length bounds.
///
/// The response carries a length byte followed by that many payload bytes;
/// a length outside `[min, max]` is a framing violation.
struct InfoRequest {
    index: u8,
    min: usize,
    max: usize,
}

impl Request for InfoRequest {
    const COMMAND_ID: CommandId = CommandId::Info;

    type Response = Vec<u8>;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        buffer[0] = self.index;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Vec<u8>, TransportError> {
        let len = *buffer.first().ok_or(TransportError::Protocol)? as usize;
        if len < self.min || len > self.max || buffer.len() < 1 + len {
            tracing::error!(
                "dap_info(0x{:02x}): bad payload length {} (expected {}..={})",
                self.index,
                len,
                self.min,
                self.max
            );
            return Err(TransportError::Protocol);
        }
        Ok(buffer[1..1 + len].to_vec())
    }
}

/// Query one `DAP_Info` entry, enforcing the payload length bounds.
pub(crate) fn read_info(
    carrier: &mut dyn UsbCarrier,
    index: u8,
    min: usize,
    max: usize,
) -> Result<Vec<u8>, TransportError> {
    super::send_command(carrier, &InfoRequest { index, min, max })
}

/// Read an identity string entry. Empty or absent entries come back as None.
pub(crate) fn read_info_string(
    carrier: &mut dyn UsbCarrier,
    index: u8,
) -> Result<Option<String>, TransportError> {
    let payload = read_info(carrier, index, 0, 255)?;
    if payload.is_empty() {
        return Ok(None);
    }
    // Payload is a zero-terminated ASCII string; tolerate a missing
    // terminator and any stray non-UTF8 bytes.
    let text: String = payload
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    Ok(Some(text))
}

pub(crate) fn read_info_u8(
    carrier: &mut dyn UsbCarrier,
    index: u8,
) -> Result<u8, TransportError> {
    let payload = read_info(carrier, index, 1, 1)?;
    Ok(payload[0])
}

pub(crate) fn read_info_u16(
    carrier: &mut dyn UsbCarrier,
    index: u8,
) -> Result<u16, TransportError> {
    let payload = read_info(carrier, index, 2, 2)?;
    payload.pread_with(0, LE).map_err(|_| TransportError::Protocol)
}

pub(crate) fn read_info_u32(
    carrier: &mut dyn UsbCarrier,
    index: u8,
) -> Result<u32, TransportError> {
    let payload = read_info(carrier, index, 4, 4)?;
    payload.pread_with(0, LE).map_err(|_| TransportError::Protocol)
}

/// Probe capability flags from `DAP_Info` index 0xF0.
#[derive(Copy, Clone, Debug, Default)]
pub struct Capabilities {
    pub swd: bool,
    pub jtag: bool,
    pub swo_uart: bool,
    pub swo_manchester: bool,
    pub atomic_commands: bool,
    pub test_domain_timer: bool,
    pub swo_streaming: bool,
    pub uart_comm_port: bool,
    pub usb_com_port: bool,
}

impl Capabilities {
    /// The capability info payload is one or two bytes depending on the
    /// probe's CMSIS-DAP version.
    pub(crate) fn from_payload(payload: &[u8]) -> Self {
        let info0 = payload.first().copied().unwrap_or(0);
        let info1 = payload.get(1).copied().unwrap_or(0);
        Capabilities {
            swd: info0 & 0x01 != 0,
            jtag: info0 & 0x02 != 0,
            swo_uart: info0 & 0x04 != 0,
            swo_manchester: info0 & 0x08 != 0,
            atomic_commands: info0 & 0x10 != 0,
            test_domain_timer: info0 & 0x20 != 0,
            swo_streaming: info0 & 0x40 != 0,
            uart_comm_port: info0 & 0x80 != 0,
            usb_com_port: info1 & 0x01 != 0,
        }
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = [
            (self.swd, "SWD"),
            (self.jtag, "JTAG"),
            (self.swo_uart, "SWO(UART)"),
            (self.swo_manchester, "SWO(Manchester)"),
            (self.atomic_commands, "ATOMIC"),
            (self.test_domain_timer, "TIMER"),
            (self.swo_streaming, "SWO(Streaming)"),
            (self.uart_comm_port, "UART"),
            (self.usb_com_port, "USBCOM"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

pub(crate) fn read_capabilities(
    carrier: &mut dyn UsbCarrier,
) -> Result<Capabilities, TransportError> {
    let payload = read_info(carrier, INFO_CAPABILITIES, 1, 2)?;
    Ok(Capabilities::from_payload(&payload))
}

#[cfg(test)]
mod tests {
    use super::Capabilities;

    #[test]
    fn capability_flags_render_in_wire_order() {
        let caps = Capabilities::from_payload(&[0x45, 0x01]);
        assert!(caps.swd && caps.swo_uart && caps.swo_streaming && caps.usb_com_port);
        assert!(!caps.jtag);
        assert_eq!(caps.to_string(), "SWD SWO(UART) SWO(Streaming) USBCOM");
    }
}
