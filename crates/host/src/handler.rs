//! Tool upcall handler.

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Services the tool upcalls a guest cell makes through its generated stubs.
///
/// The returned map is the body of the `tool_result` frame sent back into
/// the guest (commonly `{"content": …}`); `type` and `id` are filled in by
/// the session when absent, so a handler may also return a complete
/// `tool_result`-shaped map, including its own `error` object.
///
/// Handler failures never take the session down: an `Err` is delivered to
/// the guest as a `tool_result` carrying
/// `error: {"type": "CallbackError", "message": …}`, where it surfaces as a
/// normal value (or exception) inside the running cell.
///
/// Handlers are invoked serially per session, but a handler shared between
/// sessions must be safe against concurrent calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(
        &self,
        name: &str,
        request_id: &str,
        arguments: &Map<String, Value>,
    ) -> anyhow::Result<Map<String, Value>>;
}

/// Handler that acknowledges every upcall with an empty result.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopHandler;

#[async_trait]
impl ToolHandler for NopHandler {
    async fn handle(
        &self,
        _name: &str,
        _request_id: &str,
        _arguments: &Map<String, Value>,
    ) -> anyhow::Result<Map<String, Value>> {
        Ok(Map::new())
    }
}
