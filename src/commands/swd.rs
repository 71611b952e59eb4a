use super::{CommandId, Request};
use crate::error::TransportError;

/// `DAP_SWD_Configure`: turnaround period and data phase settings.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SwdConfigureRequest(pub u8);

impl Request for SwdConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;

    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        buffer[0] = self.0;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<(), TransportError> {
        super::check_status("dap_swd_configure", buffer)
    }
}

/// `DAP_SWD_Sequence` carrying a pre-built bit-sequence payload.
///
/// The payload bytes are treated as opaque: the attach sequence template is
/// a fixed binary literal (see [`crate::context`]), not structured data.
/// The probe's status byte is deliberately not checked, because the attach
/// sequence contains a `TARGETSEL` write whose acknowledgement is ignored
/// by design and may leave the probe reporting an error.
#[derive(Copy, Clone, Debug)]
pub(crate) struct SequenceRequest<'a> {
    pub payload: &'a [u8],
}

impl Request for SequenceRequest<'_> {
    const COMMAND_ID: CommandId = CommandId::SwdSequence;

    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        buffer[..self.payload.len()].copy_from_slice(self.payload);
        Ok(self.payload.len())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<(), TransportError> {
        if buffer.is_empty() {
            return Err(TransportError::Protocol);
        }
        Ok(())
    }
}
