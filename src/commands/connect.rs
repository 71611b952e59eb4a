use super::{CommandId, Request};
use crate::error::TransportError;

/// `DAP_Connect` port selection. Only the SWD port is used by this crate.
#[derive(Copy, Clone, Debug)]
pub(crate) enum ConnectRequest {
    Swd = 0x01,
}

impl Request for ConnectRequest {
    const COMMAND_ID: CommandId = CommandId::Connect;

    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        buffer[0] = *self as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<(), TransportError> {
        // The response byte is the port the probe actually initialised;
        // zero means the init failed.
        let port = *buffer.first().ok_or(TransportError::Protocol)?;
        if port != *self as u8 {
            tracing::error!("dap_connect: probe initialised port 0x{:02x}", port);
            return Err(TransportError::Remote);
        }
        Ok(())
    }
}
