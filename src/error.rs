use thiserror::Error;

/// Errors surfaced by the transport engine.
///
/// The layering is visible in the variants: USB carrier failures come out as
/// [`Io`](TransportError::Io), CMSIS-DAP framing problems as
/// [`Protocol`](TransportError::Protocol) or
/// [`Unsupported`](TransportError::Unsupported), and conditions decoded from
/// the SWD acknowledgement of a `DAP_Transfer` as the `Swd*`, `Timeout` and
/// `Match` variants.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A USB read or write failed or transferred fewer bytes than required.
    #[error("USB read/write failed or was short")]
    Io,
    /// The probe response violated CMSIS-DAP framing (bad length).
    #[error("CMSIS-DAP framing violation in probe response")]
    Protocol,
    /// The probe echoed a different command byte, i.e. rejected the command.
    #[error("probe rejected the command (opcode echo mismatch)")]
    Unsupported,
    /// The probe returned a non-zero status byte on a configuration command.
    #[error("probe returned an error status for a configuration command")]
    Remote,
    /// The probe detected an SWD parity or protocol error on the wire.
    #[error("SWD parity/protocol error")]
    SwdParity,
    /// The target answered a transfer with a FAULT acknowledgement.
    #[error("SWD FAULT acknowledgement from target")]
    SwdFault,
    /// No target drove the acknowledgement bits (line reads all ones).
    #[error("no SWD acknowledgement (no target responding)")]
    SwdSilent,
    /// The acknowledgement bits held a reserved value.
    #[error("bogus SWD acknowledgement from target")]
    SwdBogus,
    /// The target kept answering WAIT until the probe's retry budget ran out.
    #[error("SWD WAIT retries exhausted")]
    Timeout,
    /// A value-match read never observed the expected value within the
    /// configured retry budget.
    #[error("value match retries exhausted")]
    Match,
    /// A DP or AP register address violated the address mask invariants.
    #[error("invalid DP/AP register address")]
    InvalidArg,
    /// No known debug probe could be opened.
    #[error("no debug probe found")]
    Offline,
    /// Unspecified internal failure.
    #[error("internal failure")]
    Failed,
}
