//! Single request/response CMSIS-DAP commands.
//!
//! Each command is one USB write (command byte plus arguments) followed by
//! one USB read whose first byte must echo the command. The batched
//! `DAP_Transfer` path does not go through this module; the transfer queue
//! packs its packet incrementally into a fixed buffer (see
//! [`crate::queue`]).

pub mod connect;
pub mod info;
pub mod swd;
pub mod transfer;

use crate::carrier::UsbCarrier;
use crate::error::TransportError;

/// Largest CMSIS-DAP packet this crate will exchange.
pub(crate) const PACKET_BUF_SIZE: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum CommandId {
    Info = 0x00,
    Connect = 0x02,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    SwdConfigure = 0x13,
    SwdSequence = 0x1d,
}

pub(crate) trait Request {
    const COMMAND_ID: CommandId;

    type Response;

    /// Serialize the command arguments (everything after the command byte).
    /// Returns the number of bytes written.
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError>;

    /// Parse the response payload (everything after the echoed command byte).
    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, TransportError>;
}

pub(crate) fn send_command<R: Request>(
    carrier: &mut dyn UsbCarrier,
    request: &R,
) -> Result<R::Response, TransportError> {
    let mut buffer = [0u8; PACKET_BUF_SIZE];
    buffer[0] = R::COMMAND_ID as u8;
    let len = request.to_bytes(&mut buffer[1..])? + 1;

    tracing::trace!("> {:02x?}", &buffer[..len]);
    if carrier.write(&buffer[..len])? != len {
        tracing::error!("command {:02x}: short usb write", R::COMMAND_ID as u8);
        return Err(TransportError::Io);
    }

    let mut response = [0u8; PACKET_BUF_SIZE];
    let received = carrier.read(&mut response)?;
    if received < 1 {
        tracing::error!("command {:02x}: short usb read", R::COMMAND_ID as u8);
        return Err(TransportError::Io);
    }
    tracing::trace!("< {:02x?}", &response[..received]);

    if response[0] != R::COMMAND_ID as u8 {
        tracing::error!(
            "command {:02x}: unsupported (probe answered {:02x})",
            R::COMMAND_ID as u8,
            response[0]
        );
        return Err(TransportError::Unsupported);
    }

    request.parse_response(&response[1..received])
}

/// Shared decode for the one-byte probe status that configuration commands
/// answer with: zero is success, anything else is surfaced as `Remote`.
pub(crate) fn check_status(name: &str, buffer: &[u8]) -> Result<(), TransportError> {
    let status = *buffer.first().ok_or(TransportError::Protocol)?;
    if status != 0 {
        tracing::error!("{} status 0x{:02x}", name, status);
        return Err(TransportError::Remote);
    }
    Ok(())
}
