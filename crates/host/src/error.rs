//! Error taxonomy for the session host.
//!
//! Inside an execution turn, anything that can be reported as a failed
//! [`ExecResult`](crate::ExecResult) is reported that way (traps, timeouts,
//! stream faults mid-cell).  Only structural and lifecycle failures surface
//! as [`HostError`] values.

use codecell_wire::{FrameError, WireError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Frame-level failure on the guest stdio channel.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),
    /// A frame arrived that violates the protocol invariants.
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    /// The guest worker thread exited; the session can no longer serve calls.
    #[error("guest terminated: {0}")]
    GuestTerminated(String),
    /// The session was closed.
    #[error("session is closed")]
    Stopped,
    /// No live session under this id.
    #[error("unknown session: {0}")]
    UnknownSession(String),
    /// A freshly generated session id collided with a live one.
    #[error("session id collision: {0}")]
    IdCollision(String),
    /// Missing interpreter binary, unusable preopens, or bad environment.
    #[error("configuration error: {0}")]
    Config(String),
    /// The facade was handed a malformed `function_call` record.
    #[error("invalid function_call record: {0}")]
    InvalidCall(String),
    /// Engine, module or linker failure from the WASM runtime.
    #[error("wasm runtime error: {0}")]
    Wasm(wasmtime::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
