//! Framed stdio protocol spoken between the session host and its WASI guest.
//!
//! Every message is a length-prefixed JSON frame: an ASCII decimal byte
//! count, a newline, then exactly that many UTF-8 bytes.  The same codec is
//! used symmetrically in both directions on a single stdio pair, carrying
//! execution requests, execution results, and the nested tool upcalls the
//! guest issues mid-cell.

mod frame;
mod message;

pub use frame::{FrameError, MAX_FRAME_BYTES, MAX_HEADER_BYTES, read_frame, write_frame};
pub use message::{ExecError, ExecOutcome, Message, ToolFault, WireError};
