//! Host configuration sourced from the environment.

use std::env;
use std::path::PathBuf;

use crate::error::HostError;

/// Default guest alias under which the interpreter home is exposed.
pub const DEFAULT_HOME_GUEST: &str = "/python_home";
/// Default root under which session scratch directories are created.
pub const DEFAULT_ROOT: &str = "/tmp/codecell";
/// Default per-cell wall-clock budget in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 8000;

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Path to the interpreter WASM module (`PYTHON_WASM`).
    pub python_wasm: PathBuf,
    /// Host directory containing the interpreter's `lib` tree
    /// (`PYTHON_WASM_HOME`).
    pub python_home: Option<PathBuf>,
    /// Guest alias for the interpreter home (`PYTHON_WASM_HOME_GUEST`).
    pub home_guest_alias: String,
    /// Guest alias for the session directory (`WASI_SESSION_GUEST`).
    /// The host path itself is used when unset.
    pub session_guest_alias: Option<String>,
    /// Root for session scratch directories.
    pub root: PathBuf,
    /// Maximum accepted frame payload on the guest stdio channel.
    pub max_frame_bytes: usize,
    /// Timeout applied when the caller does not pass one.
    pub default_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            python_wasm: PathBuf::from("/opt/wasm/python.wasm"),
            python_home: None,
            home_guest_alias: DEFAULT_HOME_GUEST.into(),
            session_guest_alias: None,
            root: PathBuf::from(DEFAULT_ROOT),
            max_frame_bytes: codecell_wire::MAX_FRAME_BYTES,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl HostConfig {
    /// Build a config from the process environment.
    ///
    /// `PYTHON_WASM` is required; the remaining variables fall back to the
    /// defaults above.  Whether the paths actually exist is checked at
    /// session construction, where a miss is a [`HostError::Config`].
    pub fn from_env() -> Result<Self, HostError> {
        let mut config = Self::default();
        match env::var("PYTHON_WASM") {
            Ok(path) if !path.is_empty() => config.python_wasm = PathBuf::from(path),
            _ => return Err(HostError::Config("PYTHON_WASM is not set".into())),
        }
        if let Ok(home) = env::var("PYTHON_WASM_HOME") {
            if !home.is_empty() {
                config.python_home = Some(PathBuf::from(home));
            }
        }
        if let Ok(alias) = env::var("PYTHON_WASM_HOME_GUEST") {
            if !alias.is_empty() {
                config.home_guest_alias = alias;
            }
        }
        if let Ok(alias) = env::var("WASI_SESSION_GUEST") {
            if !alias.is_empty() {
                config.session_guest_alias = Some(alias);
            }
        }
        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}
