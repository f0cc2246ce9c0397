//! Process-wide session registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::HostConfig;
use crate::error::HostError;
use crate::handler::ToolHandler;
use crate::session::{ExecResult, Session};

/// Generate an opaque session id: 16 characters of URL-safe base64 over 12
/// cryptographically random bytes.  The URL-safe alphabet keeps ids usable
/// as directory names.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Owns every live session.  A session id is either present and alive, or
/// absent — `close` removes the entry under the lock and tears the session
/// down outside it.
pub struct Service {
    config: HostConfig,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl Service {
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        std::fs::create_dir_all(&config.root)?;
        Ok(Self { config, sessions: Mutex::new(HashMap::new()) })
    }

    /// Root directory holding the per-session scratch directories.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub async fn create_session(&self, handler: Arc<dyn ToolHandler>) -> Result<String, HostError> {
        let sid = new_session_id();
        info!(sid = %sid, "creating session");
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&sid) {
            return Err(HostError::IdCollision(sid));
        }
        let session = Session::new(&sid, &self.config, handler).await?;
        sessions.insert(sid.clone(), Arc::new(session));
        Ok(sid)
    }

    /// Execute one cell in the given session.  `timeout_ms: None` applies
    /// the configured default (8000 ms out of the box).
    pub async fn exec_cell(
        &self,
        sid: &str,
        code: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecResult, HostError> {
        let session = self
            .sessions
            .lock()
            .await
            .get(sid)
            .cloned()
            .ok_or_else(|| HostError::UnknownSession(sid.to_string()))?;
        session
            .exec_cell(code, timeout_ms.unwrap_or(self.config.default_timeout_ms))
            .await
    }

    /// Reset the session's interpreter globals.  A no-op for absent ids.
    pub async fn reset(&self, sid: &str) -> Result<(), HostError> {
        let session = self.sessions.lock().await.get(sid).cloned();
        match session {
            Some(session) => session.reset().await,
            None => Ok(()),
        }
    }

    pub async fn close(&self, sid: &str) {
        let session = self.sessions.lock().await.remove(sid);
        if let Some(session) = session {
            info!(sid = %sid, "closing session");
            session.close().await;
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<Session>)> =
            self.sessions.lock().await.drain().collect();
        for (sid, session) in drained {
            info!(sid = %sid, "closing session");
            session.close().await;
        }
    }
}
