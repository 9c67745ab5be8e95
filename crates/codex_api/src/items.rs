//! Builders for the input items and tool declarations the endpoint accepts.
//!
//! Items returned by the backend in `response.output` are kept as raw JSON and
//! sent back untouched on the next request.

use serde_json::{json, Value};

pub fn user_message(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "user",
        "content": [{"type": "input_text", "text": text}],
    })
}

pub fn function_call_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output,
    })
}

/// Function tool declaration; `parameters` is a JSON Schema object.
pub fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "name": name,
        "description": description,
        "strict": false,
        "parameters": parameters,
    })
}

pub fn web_search_tool() -> Value {
    json!({"type": "web_search"})
}

/// Fields of a `function_call` output item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallItem {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl FunctionCallItem {
    /// Returns `None` unless `item` is a `function_call` with string fields.
    pub fn from_item(item: &Value) -> Option<Self> {
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            return None;
        }
        let field = |key: &str| item.get(key).and_then(Value::as_str).map(ToOwned::to_owned);
        Some(Self {
            call_id: field("call_id")?,
            name: field("name")?,
            arguments: field("arguments").unwrap_or_else(|| "{}".to_owned()),
        })
    }
}
