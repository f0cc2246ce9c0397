//! LLM-facing facade: one `python` tool backed by a session, with the
//! user's function tools compiled into an importable stub module.

use std::sync::{Arc, OnceLock};

use serde_json::{Value, json};
use tracing::debug;

use codecell_sdkgen::FunctionTool;

use crate::config::HostConfig;
use crate::error::HostError;
use crate::handler::{NopHandler, ToolHandler};
use crate::service::Service;

/// Filename of the generated stub module inside the session directory.
pub const SDK_FILENAME: &str = "sdk.py";

static DEFAULT_SERVICE: OnceLock<Arc<Service>> = OnceLock::new();

/// The lazily created process-wide service used by [`Facade::new`].
/// Configured from the environment on first use.
pub fn default_service() -> Result<Arc<Service>, HostError> {
    if let Some(service) = DEFAULT_SERVICE.get() {
        return Ok(service.clone());
    }
    let service = Arc::new(Service::new(HostConfig::from_env()?)?);
    Ok(DEFAULT_SERVICE.get_or_init(|| service).clone())
}

pub struct Facade {
    service: Arc<Service>,
    session_id: String,
    sdk_code: String,
    tools: Vec<Value>,
    instructions: String,
}

impl Facade {
    /// Build against the process-wide default service.
    pub async fn new(
        tools: Vec<Value>,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<Self, HostError> {
        Self::with_service(default_service()?, tools, handler).await
    }

    /// Build against an explicit service.
    ///
    /// Creates a session (with a no-op handler unless one is given),
    /// renders the stub module from the `type == "function"` descriptors,
    /// and writes it into the session directory as [`SDK_FILENAME`].
    pub async fn with_service(
        service: Arc<Service>,
        tools: Vec<Value>,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<Self, HostError> {
        let handler = handler.unwrap_or_else(|| Arc::new(NopHandler));
        let functions: Vec<FunctionTool> =
            tools.iter().filter_map(FunctionTool::from_value).collect();
        let sdk_code = codecell_sdkgen::render(&functions);

        let session_id = service.create_session(handler).await?;
        tokio::fs::write(service.root().join(&session_id).join(SDK_FILENAME), &sdk_code).await?;
        debug!(session = %session_id, tools = functions.len(), "facade ready");

        let visible = visible_tools(&tools);
        let instructions = instructions_text(&sdk_code);
        Ok(Self { service, session_id, sdk_code, tools: visible, instructions })
    }

    /// The tool list to advertise to the model: the built-in `python` tool
    /// first, then the user's non-function descriptors passed through
    /// untouched.  Function descriptors are hidden — the model reaches them
    /// through generated code instead.
    pub fn tools(&self) -> &[Value] {
        &self.tools
    }

    /// Operator guidance for the `python` tool, embedding the stub source.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Source of the generated stub module.
    pub fn sdk_code(&self) -> &str {
        &self.sdk_code
    }

    /// Execute a `python` function_call record and wrap the outcome as a
    /// `function_call_output`.
    pub async fn tool_call(&self, function_call: &Value) -> Result<Value, HostError> {
        let record = function_call
            .as_object()
            .ok_or_else(|| HostError::InvalidCall("not a JSON object".into()))?;
        if record.get("type").and_then(Value::as_str) != Some("function_call") {
            return Err(HostError::InvalidCall("type must be \"function_call\"".into()));
        }
        let name = record.get("name").and_then(Value::as_str).unwrap_or_default();
        if name != "python" {
            return Err(HostError::InvalidCall(format!("unsupported tool: {name}")));
        }
        let call_id = record
            .get("call_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let arguments = record
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        let parsed: Value = serde_json::from_str(arguments)
            .map_err(|e| HostError::InvalidCall(format!("arguments is not valid JSON: {e}")))?;
        let code = parsed.get("code").and_then(Value::as_str).unwrap_or_default();

        let result = self.service.exec_cell(&self.session_id, code, None).await?;
        let output = if result.ok {
            result.stdout
        } else {
            result.error.unwrap_or_default()
        };
        Ok(json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }))
    }

    /// Close the facade's session.
    pub async fn close(&self) {
        self.service.close(&self.session_id).await;
    }
}

/// Descriptor of the built-in `python` tool.
pub(crate) fn python_tool() -> Value {
    json!({
        "type": "function",
        "name": "python",
        "description": "Execute Python code in a persistent, sandboxed interpreter session. \
            Variables, imports and files survive across calls.",
        "parameters": {
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source code to execute.",
                }
            },
            "required": ["code"],
        },
    })
}

pub(crate) fn visible_tools(tools: &[Value]) -> Vec<Value> {
    let mut visible = vec![python_tool()];
    visible.extend(
        tools
            .iter()
            .filter(|tool| FunctionTool::from_value(tool).is_none())
            .cloned(),
    );
    visible
}

pub(crate) fn instructions_text(sdk_code: &str) -> String {
    let mut text = String::from(
        "You can run Python with the `python` tool. It executes code in a persistent \
         interpreter session: variables, imports and files survive across calls.\n\
         \n\
         - The filesystem is limited to the current working directory.\n\
         - Write large outputs to files and read them back in slices instead of \
         printing everything at once.\n",
    );
    if !sdk_code.is_empty() {
        text.push_str(
            "- A module `sdk.py` in the working directory exposes the functions listed \
             below; import them with `from sdk import <name>`.\n\n```python\n",
        );
        text.push_str(sdk_code);
        if !sdk_code.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("```\n");
    }
    text
}
