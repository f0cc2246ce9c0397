//! Tagged message sum over the frame payloads, with the boundary decode
//! rules the session host applies to guest traffic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Error body of a failed cell execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecError {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Payload of an `exec_result` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutcome {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: Option<ExecError>,
}

/// Error body of a `tool_result` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFault {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Malformed frames caught at the decode boundary.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("tool_request frame carries no id")]
    MissingId,
    #[error("malformed {0} frame: {1}")]
    Malformed(&'static str, serde_json::Error),
}

/// The message variants carried by the framed protocol.
///
/// `Ack` is the bare `{"ok": …}` reply the guest sends for `reset` and
/// `exit`; it is the only variant without a `type` tag on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ExecRequest { code: String },
    ExecResult(ExecOutcome),
    ToolRequest { id: String, name: String, arguments: Map<String, Value> },
    ToolResult { id: String, content: Option<Value>, error: Option<ToolFault> },
    Reset,
    Exit,
    Ack { ok: bool },
}

impl Message {
    /// Encode to the exact wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Message::ExecRequest { code } => json!({"type": "exec_request", "code": code}),
            Message::ExecResult(outcome) => json!({
                "type": "exec_result",
                "ok": outcome.ok,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
                "error": outcome.error,
            }),
            Message::ToolRequest { id, name, arguments } => json!({
                "type": "tool_request",
                "id": id,
                "name": name,
                "arguments": arguments,
            }),
            Message::ToolResult { id, content, error } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("tool_result"));
                obj.insert("id".into(), json!(id));
                if let Some(content) = content {
                    obj.insert("content".into(), content.clone());
                }
                if let Some(error) = error {
                    obj.insert("error".into(), json!(error));
                }
                Value::Object(obj)
            }
            Message::Reset => json!({"type": "reset"}),
            Message::Exit => json!({"type": "exit"}),
            Message::Ack { ok } => json!({"ok": ok}),
        }
    }

    /// Decode a frame payload.
    ///
    /// An object tagged `tool_request` must carry a non-empty `id`; a
    /// missing `name` degrades to the empty string, since the frame is still
    /// routable.  An untagged object whose only key is `ok` is an ack.  Any
    /// other object — tagged `exec_result`, tagged with something unknown,
    /// or untagged — is treated as the terminal execution result, per the
    /// host's receive-loop contract.
    pub fn decode(value: Value) -> Result<Message, WireError> {
        let Value::Object(obj) = value else {
            return Err(WireError::NotAnObject);
        };

        let tag = obj.get("type").and_then(Value::as_str).map(str::to_string);
        match tag.as_deref() {
            Some("exec_request") => {
                let code = obj
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(Message::ExecRequest { code })
            }
            Some("tool_request") => {
                let id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or(WireError::MissingId)?
                    .to_string();
                // A missing name degrades to the empty string: the frame is
                // still routable by id, and the handler decides what an
                // unnamed tool means.
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = match obj.get("arguments") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                Ok(Message::ToolRequest { id, name, arguments })
            }
            Some("tool_result") => {
                let id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = obj.get("content").cloned();
                let error = match obj.get("error") {
                    Some(err) => Some(
                        serde_json::from_value(err.clone())
                            .map_err(|e| WireError::Malformed("tool_result", e))?,
                    ),
                    None => None,
                };
                Ok(Message::ToolResult { id, content, error })
            }
            Some("reset") => Ok(Message::Reset),
            Some("exit") => Ok(Message::Exit),
            None if obj.len() == 1 && obj.contains_key("ok") => Ok(Message::Ack {
                ok: obj.get("ok").and_then(Value::as_bool).unwrap_or(false),
            }),
            // "exec_result", an unknown tag, or no tag at all: the terminal
            // result of the in-flight execution.
            _ => {
                let outcome = serde_json::from_value(Value::Object(obj))
                    .map_err(|e| WireError::Malformed("exec_result", e))?;
                Ok(Message::ExecResult(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variants_round_trip() -> anyhow::Result<()> {
        let messages = vec![
            Message::ExecRequest { code: "x = 1".into() },
            Message::ToolRequest {
                id: "r1".into(),
                name: "get_weather".into(),
                arguments: serde_json::from_value(json!({"city": "SF"}))?,
            },
            Message::ToolResult {
                id: "r1".into(),
                content: Some(json!({"temp": 22})),
                error: None,
            },
            Message::Reset,
            Message::Exit,
        ];
        for message in messages {
            assert_eq!(Message::decode(message.to_value())?, message);
        }
        Ok(())
    }

    #[test]
    fn exec_result_round_trips_with_error_body() -> anyhow::Result<()> {
        let message = Message::ExecResult(ExecOutcome {
            ok: false,
            stdout: "partial\n".into(),
            stderr: String::new(),
            error: Some(ExecError {
                kind: Some("ValueError".into()),
                msg: "boom".into(),
                trace: Some("Traceback …".into()),
            }),
        });
        assert_eq!(Message::decode(message.to_value())?, message);
        Ok(())
    }

    #[test]
    fn untagged_object_is_the_terminal_exec_result() -> anyhow::Result<()> {
        let value = json!({"ok": true, "stdout": "42\n", "stderr": "", "error": null});
        match Message::decode(value)? {
            Message::ExecResult(outcome) => {
                assert!(outcome.ok);
                assert_eq!(outcome.stdout, "42\n");
            }
            other => panic!("expected exec result, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn unknown_tag_is_the_terminal_exec_result() -> anyhow::Result<()> {
        let value = json!({"type": "banana", "ok": false});
        assert!(matches!(
            Message::decode(value)?,
            Message::ExecResult(ExecOutcome { ok: false, .. })
        ));
        Ok(())
    }

    #[test]
    fn bare_ok_object_is_an_ack() -> anyhow::Result<()> {
        assert_eq!(Message::decode(json!({"ok": true}))?, Message::Ack { ok: true });
        assert_eq!(Message::decode(json!({"ok": false}))?, Message::Ack { ok: false });
        Ok(())
    }

    #[test]
    fn tool_request_without_id_is_rejected() {
        let value = json!({"type": "tool_request", "name": "t", "arguments": {}});
        assert!(matches!(Message::decode(value), Err(WireError::MissingId)));
        let value = json!({"type": "tool_request", "id": "", "name": "t"});
        assert!(matches!(Message::decode(value), Err(WireError::MissingId)));
    }

    #[test]
    fn tool_request_without_name_is_still_routable() -> anyhow::Result<()> {
        let value = json!({"type": "tool_request", "id": "r9", "arguments": {"k": 1}});
        match Message::decode(value)? {
            Message::ToolRequest { id, name, arguments } => {
                assert_eq!(id, "r9");
                assert_eq!(name, "");
                assert_eq!(arguments.get("k"), Some(&json!(1)));
            }
            other => panic!("expected tool request, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn non_object_frames_are_rejected() {
        assert!(matches!(
            Message::decode(json!([1, 2, 3])),
            Err(WireError::NotAnObject)
        ));
    }

    #[test]
    fn ack_carries_no_type_tag_on_the_wire() {
        let value = Message::Ack { ok: true }.to_value();
        assert_eq!(value, json!({"ok": true}));
    }
}
