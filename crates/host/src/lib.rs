//! codecell-host — long-lived, sandboxed Python interpreter sessions for
//! LLM tool use.
//!
//! Each [`Session`] owns one CPython-WASI instance running a small guest
//! loop: cells arrive as length-prefixed JSON frames on stdin, results come
//! back on stdout, and mid-cell the guest may issue nested tool upcalls that
//! the host dispatches to a caller-supplied [`ToolHandler`].  The
//! [`Service`] registry manages sessions by opaque id; the [`Facade`] wraps
//! the whole thing into the single `python` tool an LLM sees, with the
//! user's function tools compiled into an importable `sdk.py`.
//!
//! The interpreter binary (`python.wasm`) and its stdlib are external
//! artifacts located through `PYTHON_WASM` / `PYTHON_WASM_HOME`; see
//! [`HostConfig`].

mod config;
mod error;
mod facade;
mod handler;
mod pipe;
mod service;
mod session;

pub use config::{DEFAULT_HOME_GUEST, DEFAULT_ROOT, DEFAULT_TIMEOUT_MS, HostConfig};
pub use error::HostError;
pub use facade::{Facade, SDK_FILENAME, default_service};
pub use handler::{NopHandler, ToolHandler};
pub use service::{Service, new_session_id};
pub use session::{ExecResult, Session};
