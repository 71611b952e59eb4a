//! Host-side SWD transport engine for CMSIS-DAP debug probes.
//!
//! This crate drives an ARM target over Serial Wire Debug through a
//! CMSIS-DAP probe on USB. It owns the layer between "a byte pipe to the
//! probe" and "read/write this DP or AP register":
//!
//! - probe discovery and configuration ([`DebugContext::open`]),
//! - the SWD attach sequence, including multidrop target selection
//!   ([`DebugContext::attach`]),
//! - batching of register operations into `DAP_Transfer` packets with
//!   transparent flushing against the probe's packet budget
//!   ([`TransferQueue`]),
//! - a `DP.SELECT` cache that elides redundant routing writes,
//! - decode of the SWD acknowledgement into [`TransportError`].
//!
//! ```no_run
//! use swdap::{DebugContext, DP_CTRL_STAT};
//!
//! # fn main() -> Result<(), swdap::TransportError> {
//! let mut dc = DebugContext::open()?;
//! let idcode = dc.attach(None)?;
//! println!("IDCODE {:#010x}", idcode);
//!
//! let mut ctrl = 0;
//! let mut queue = dc.queue();
//! queue.dp_write(DP_CTRL_STAT, 0x5000_0000);
//! queue.dp_read(DP_CTRL_STAT, &mut ctrl);
//! queue.exec()?;
//! # Ok(())
//! # }
//! ```
//!
//! Higher-level debug operations (memory access, breakpoints, flashing)
//! compose on top of the DP/AP primitives here and are out of scope, as
//! are JTAG, SWO trace and UART passthrough.

mod carrier;
mod commands;
mod context;
mod dp;
mod error;
mod queue;

#[cfg(test)]
pub(crate) mod mock;

pub use carrier::{BulkCarrier, UsbCarrier};
pub use commands::info::Capabilities;
pub use context::{DebugContext, ProbeStatus};
pub use dp::{
    Select, AP_CSW, AP_DRW, AP_IDR, AP_TAR, DP_ABORT, DP_CTRL_STAT, DP_DLCR, DP_DLPIDR, DP_DPIDR,
    DP_EVENTSTAT, DP_RDBUFF, DP_SELECT, DP_TARGETID,
};
pub use error::TransportError;
pub use queue::TransferQueue;
