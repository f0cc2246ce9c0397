//! Tool-stub code generator.
//!
//! Translates JSON-Schema function-tool descriptors into a Python module the
//! WASI guest can import.  Each descriptor becomes one typed wrapper function
//! that packages its arguments under their original wire names and forwards
//! them to the guest helper `tool_call(name, args)`.
//!
//! The generator is a pure function of its input: no runtime failures, no
//! shared state across renders.  Malformed schemas degrade to `Any`-typed
//! parameters, and an empty descriptor list renders the empty string.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Hard keywords that may not be used as Python identifiers.
const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// A function-tool descriptor extracted from the caller's tool list.
#[derive(Debug, Clone)]
pub struct FunctionTool {
    pub name: String,
    pub description: Option<String>,
    /// JSON-Schema object with `properties` and optional `required`.
    pub parameters: Value,
}

impl FunctionTool {
    /// Parse a descriptor with `type == "function"`, accepting both the flat
    /// shape (`{"type": "function", "name": …}`) and the nested one
    /// (`{"type": "function", "function": {…}}`).  Returns `None` for
    /// anything else.
    pub fn from_value(tool: &Value) -> Option<Self> {
        let obj = tool.as_object()?;
        if obj.get("type").and_then(Value::as_str) != Some("function") {
            return None;
        }
        let body = obj.get("function").and_then(Value::as_object).unwrap_or(obj);
        Some(Self {
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("tool")
                .to_string(),
            description: body
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            parameters: body.get("parameters").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Render the stub module for the given function tools.
pub fn render(tools: &[FunctionTool]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut typing = BTreeSet::new();
    let mut body: Vec<String> = Vec::new();
    for (idx, tool) in tools.iter().enumerate() {
        if idx > 0 {
            body.push(String::new());
        }
        body.extend(emit_tool(tool, &mut typing));
    }

    // Preamble: make the module's own directory importable, then pull in the
    // guest helper the wrappers delegate to.
    let mut lines: Vec<String> = vec![
        "from __future__ import annotations".into(),
        String::new(),
        "import os".into(),
        "import sys".into(),
        String::new(),
        "sys.path.insert(0, os.path.dirname(os.path.abspath(__file__)))".into(),
        String::new(),
        format!(
            "from typing import {}",
            typing.iter().copied().collect::<Vec<_>>().join(", ")
        ),
        "from guest_helpers import tool_call".into(),
        String::new(),
    ];
    lines.extend(body);
    lines.join("\n") + "\n"
}

/// Convenience over a raw tool list: keep the `type == "function"` entries
/// and render their stubs.
pub fn render_from_values(tools: &[Value]) -> String {
    let functions: Vec<FunctionTool> = tools.iter().filter_map(FunctionTool::from_value).collect();
    render(&functions)
}

// ── Parameter model ──────────────────────────────────────────────────────────

struct Param {
    ident: String,
    wire: String,
    annotation: String,
    default: Option<String>,
    description: Option<String>,
}

fn parse_parameters(schema: &Value, typing: &mut BTreeSet<&'static str>) -> Vec<Param> {
    let empty = Map::new();
    let obj = schema.as_object().unwrap_or(&empty);
    let props = obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    // Required parameters first (declaration order), then the remaining
    // optional ones (declaration order), duplicates dropped.
    let mut ordered: Vec<&str> = Vec::new();
    for name in required.iter().copied().chain(props.keys().map(String::as_str)) {
        if !ordered.contains(&name) {
            ordered.push(name);
        }
    }

    ordered
        .into_iter()
        .map(|wire| {
            build_parameter(
                wire,
                props.get(wire).unwrap_or(&Value::Null),
                required.contains(&wire),
                typing,
            )
        })
        .collect()
}

fn build_parameter(
    wire: &str,
    schema: &Value,
    is_required: bool,
    typing: &mut BTreeSet<&'static str>,
) -> Param {
    // `type: [T, "null"]` collapses to the non-null annotation and makes the
    // parameter optional.
    let mut allows_null = false;
    let owned;
    let schema_for_annotation = match schema.get("type") {
        Some(Value::Array(types)) => {
            allows_null = types.iter().any(|t| t.as_str() == Some("null"));
            let non_null = types
                .iter()
                .find(|t| t.as_str() != Some("null"))
                .cloned()
                .unwrap_or(Value::Null);
            let mut clone = schema.as_object().cloned().unwrap_or_default();
            clone.insert("type".into(), non_null);
            owned = Value::Object(clone);
            &owned
        }
        _ => schema,
    };
    let mut annotation = annotation_from_schema(schema_for_annotation, typing);

    let schema_default = schema.get("default").filter(|v| !v.is_null());
    let default = if is_required {
        schema_default.map(py_repr)
    } else {
        Some(schema_default.map(py_repr).unwrap_or_else(|| "None".into()))
    };

    let optional = !is_required || allows_null;
    if optional
        && default.as_deref().is_none_or(|d| d == "None")
        && !annotation.starts_with("Optional[")
    {
        typing.insert("Optional");
        annotation = format!("Optional[{annotation}]");
    }

    Param {
        ident: to_identifier(wire),
        wire: wire.to_string(),
        annotation,
        default,
        description: schema
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
    }
}

fn annotation_from_schema(schema: &Value, typing: &mut BTreeSet<&'static str>) -> String {
    let Some(obj) = schema.as_object() else {
        typing.insert("Any");
        return "Any".into();
    };
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        typing.insert("Literal");
        let rendered: Vec<String> = values.iter().map(py_repr).collect();
        return format!("Literal[{}]", rendered.join(", "));
    }
    match obj.get("type").and_then(Value::as_str) {
        Some("string") => "str".into(),
        Some("integer") => "int".into(),
        Some("number") => "float".into(),
        Some("boolean") => "bool".into(),
        Some("array") => {
            let inner = annotation_from_schema(obj.get("items").unwrap_or(&Value::Null), typing);
            typing.insert("List");
            format!("List[{inner}]")
        }
        Some("object") => {
            typing.insert("Dict");
            typing.insert("Any");
            "Dict[str, Any]".into()
        }
        _ => {
            typing.insert("Any");
            "Any".into()
        }
    }
}

// ── Emission ─────────────────────────────────────────────────────────────────

fn emit_tool(tool: &FunctionTool, typing: &mut BTreeSet<&'static str>) -> Vec<String> {
    let fn_name = to_identifier(&tool.name);
    let params = parse_parameters(&tool.parameters, typing);
    typing.insert("Any");

    // Python rejects a non-defaulted parameter after a defaulted one, and a
    // required parameter may still carry a schema default.  The signature
    // therefore partitions on defaults (stable, so declaration order is kept
    // within each group); the argument mapping below stays in declaration
    // order regardless.
    let (plain, defaulted): (Vec<&Param>, Vec<&Param>) =
        params.iter().partition(|p| p.default.is_none());
    let signature = plain
        .iter()
        .chain(defaulted.iter())
        .map(|p| match &p.default {
            Some(default) => format!("{}: {} = {}", p.ident, p.annotation, default),
            None => format!("{}: {}", p.ident, p.annotation),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines = vec![format!("def {fn_name}({signature}) -> Any:")];

    let mut doc: Vec<String> = Vec::new();
    if let Some(description) = &tool.description {
        doc.push(description.clone());
    }
    let arg_docs: Vec<String> = params
        .iter()
        .map(|p| {
            let mut text = p
                .description
                .clone()
                .unwrap_or_else(|| "No description provided.".into());
            if p.wire != p.ident {
                text = format!("{text} (alias: `{}`)", p.wire);
            }
            format!("{}: {}", p.ident, text)
        })
        .collect();
    if !arg_docs.is_empty() {
        if !doc.is_empty() {
            doc.push(String::new());
        }
        doc.push("Args:".into());
        doc.extend(arg_docs.iter().map(|line| format!("    {line}")));
    }
    if !doc.is_empty() {
        lines.extend(format_docstring(&doc, 1));
    }

    // Argument mapping keyed by the original wire names, in parameter order.
    if params.is_empty() {
        lines.push("    args = {}".into());
    } else {
        let entries = params
            .iter()
            .map(|p| format!("{}: {}", py_str_repr(&p.wire), p.ident))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    args = {{{entries}}}"));
    }
    lines.push(format!("    return tool_call({}, args)", py_str_repr(&tool.name)));
    lines
}

fn format_docstring(doc: &[String], level: usize) -> Vec<String> {
    let indent = "    ".repeat(level);
    let safe: Vec<String> = doc
        .iter()
        .map(|line| line.replace("\"\"\"", "\\\"\\\"\\\""))
        .collect();
    if safe.len() == 1 {
        return vec![format!("{indent}\"\"\"{}\"\"\"", safe[0])];
    }
    let mut lines = vec![format!("{indent}\"\"\"")];
    lines.extend(safe.iter().map(|line| format!("{indent}{line}")));
    lines.push(format!("{indent}\"\"\""));
    lines
}

// ── Name and literal rendering ───────────────────────────────────────────────

/// Derive a valid Python identifier from a schema name: non-word runs become
/// `_`, the result is lowercased and stripped of outer underscores, names
/// starting with a digit get a `tool_` prefix, and keywords get a trailing
/// `_`.  The original name is preserved as the wire key by the caller.
fn to_identifier(name: &str) -> String {
    let mut ident = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            for lower in ch.to_lowercase() {
                ident.push(lower);
            }
            last_was_sep = false;
        } else if !last_was_sep {
            ident.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = ident.trim_matches('_');
    let mut ident = if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed.to_string()
    };
    if ident.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        ident = format!("tool_{ident}");
    }
    if PYTHON_KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// Render a JSON value as a Python literal.
fn py_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".into(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => py_str_repr(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(py_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", py_str_repr(k), py_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn py_str_repr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_tool() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Fetch weather.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "city": {"type": "string", "description": "City name"},
                        "units": {
                            "type": "string",
                            "enum": ["metric", "imperial"],
                            "description": "Unit system",
                            "default": "metric",
                        },
                        "include-hourly": {
                            "type": "boolean",
                            "description": "Include hourly data",
                        },
                    },
                    "required": ["city"],
                },
            },
        })
    }

    #[test]
    fn renders_docstrings_and_aliases() {
        let generated = render_from_values(&[weather_tool()]);

        let expected_lines = [
            "from __future__ import annotations",
            "",
            "import os",
            "import sys",
            "",
            "sys.path.insert(0, os.path.dirname(os.path.abspath(__file__)))",
            "",
            "from typing import Any, Literal, Optional",
            "from guest_helpers import tool_call",
            "",
            "def get_weather(city: str, units: Literal['metric', 'imperial'] = 'metric', include_hourly: Optional[bool] = None) -> Any:",
            "    \"\"\"",
            "    Fetch weather.",
            "    ",
            "    Args:",
            "        city: City name",
            "        units: Unit system",
            "        include_hourly: Include hourly data (alias: `include-hourly`)",
            "    \"\"\"",
            "    args = {'city': city, 'units': units, 'include-hourly': include_hourly}",
            "    return tool_call('get_weather', args)",
        ];
        assert_eq!(generated, expected_lines.join("\n") + "\n");
    }

    #[test]
    fn nullable_type_becomes_optional_with_none_default() {
        let tool = json!({
            "type": "function",
            "function": {
                "name": "update_count",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "count": {
                            "type": ["integer", "null"],
                            "description": "Optional count override",
                        }
                    },
                },
            },
        });
        let generated = render_from_values(&[tool]);

        let expected_lines = [
            "from __future__ import annotations",
            "",
            "import os",
            "import sys",
            "",
            "sys.path.insert(0, os.path.dirname(os.path.abspath(__file__)))",
            "",
            "from typing import Any, Optional",
            "from guest_helpers import tool_call",
            "",
            "def update_count(count: Optional[int] = None) -> Any:",
            "    \"\"\"",
            "    Args:",
            "        count: Optional count override",
            "    \"\"\"",
            "    args = {'count': count}",
            "    return tool_call('update_count', args)",
        ];
        assert_eq!(generated, expected_lines.join("\n") + "\n");
    }

    #[test]
    fn empty_tool_list_renders_nothing() {
        assert_eq!(render(&[]), "");
        assert_eq!(render_from_values(&[]), "");
    }

    #[test]
    fn non_function_descriptors_are_ignored() {
        let tools = vec![json!({"type": "web_search"}), json!("not even an object")];
        assert_eq!(render_from_values(&tools), "");
    }

    #[test]
    fn flat_descriptors_are_accepted() {
        let tool = json!({
            "type": "function",
            "name": "ping",
            "parameters": {"type": "object", "properties": {}},
        });
        let generated = render_from_values(&[tool]);
        assert!(generated.contains("def ping() -> Any:"));
        assert!(generated.contains("    args = {}"));
        assert!(generated.contains("    return tool_call('ping', args)"));
    }

    #[test]
    fn identifier_normalization_preserves_wire_names() {
        assert_eq!(to_identifier("include-hourly"), "include_hourly");
        assert_eq!(to_identifier("class"), "class_");
        assert_eq!(to_identifier("2fa-code"), "tool_2fa_code");
        assert_eq!(to_identifier("--weird!!name--"), "weird_name");
        assert_eq!(to_identifier("---"), "tool");
        assert_eq!(to_identifier("Mixed Case"), "mixed_case");

        let tool = json!({
            "type": "function",
            "name": "lookup",
            "parameters": {
                "type": "object",
                "properties": {"class": {"type": "string"}},
                "required": ["class"],
            },
        });
        let generated = render_from_values(&[tool]);
        assert!(generated.contains("def lookup(class_: str) -> Any:"));
        // The wire key keeps the reserved word.
        assert!(generated.contains("    args = {'class': class_}"));
    }

    #[test]
    fn required_parameters_come_first_and_duplicates_collapse() {
        let tool = json!({
            "type": "function",
            "name": "order_demo",
            "parameters": {
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {"type": "integer"},
                    "c": {"type": "boolean"},
                },
                "required": ["c", "a", "c"],
            },
        });
        let generated = render_from_values(&[tool]);
        assert!(generated.contains("def order_demo(c: bool, a: str, b: Optional[int] = None) -> Any:"));
        assert!(generated.contains("    args = {'c': c, 'a': a, 'b': b}"));
    }

    #[test]
    fn defaulted_required_params_trail_plain_ones_in_the_signature() {
        let tool = json!({
            "type": "function",
            "name": "mixed_defaults",
            "parameters": {
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {"type": "integer", "default": 5},
                },
                "required": ["b", "a"],
            },
        });
        let generated = render_from_values(&[tool]);
        // `b` is required but carries a schema default; it may not precede
        // the non-defaulted `a` in the signature.
        assert!(generated.contains("def mixed_defaults(a: str, b: int = 5) -> Any:"));
        // The wire mapping keeps declaration order (required first, as given).
        assert!(generated.contains("    args = {'b': b, 'a': a}"));
    }

    #[test]
    fn arrays_objects_and_unknowns_map_to_typing_forms() {
        let tool = json!({
            "type": "function",
            "name": "shapes",
            "parameters": {
                "type": "object",
                "properties": {
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "payload": {"type": "object"},
                    "mystery": {},
                },
                "required": ["tags", "payload", "mystery"],
            },
        });
        let generated = render_from_values(&[tool]);
        assert!(generated.contains(
            "def shapes(tags: List[str], payload: Dict[str, Any], mystery: Any) -> Any:"
        ));
        assert!(generated.contains("from typing import Any, Dict, List"));
    }

    #[test]
    fn schema_defaults_render_as_python_literals() {
        let tool = json!({
            "type": "function",
            "name": "defaults_demo",
            "parameters": {
                "type": "object",
                "properties": {
                    "flag": {"type": "boolean", "default": true},
                    "limit": {"type": "integer", "default": 5},
                    "label": {"type": "string", "default": "it's fine"},
                },
            },
        });
        let generated = render_from_values(&[tool]);
        assert!(generated.contains("flag: bool = True"));
        assert!(generated.contains("limit: int = 5"));
        assert!(generated.contains("label: str = 'it\\'s fine'"));
    }

    #[test]
    fn malformed_schemas_degrade_to_any() {
        let tool = json!({
            "type": "function",
            "name": "odd",
            "parameters": {
                "type": "object",
                "properties": {"x": {"type": 42}},
                "required": ["x", "ghost"],
            },
        });
        let generated = render_from_values(&[tool]);
        // Non-string type and a required name with no property schema both
        // fall back to Any rather than failing.
        assert!(generated.contains("def odd(x: Any, ghost: Any) -> Any:"));
    }

    #[test]
    fn two_tools_are_separated_by_a_blank_line() {
        let tools = vec![
            json!({"type": "function", "name": "first", "parameters": {}}),
            json!({"type": "function", "name": "second", "parameters": {}}),
        ];
        let generated = render_from_values(&tools);
        assert!(generated.contains("    return tool_call('first', args)\n\ndef second() -> Any:"));
    }
}
