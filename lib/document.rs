// Control-channel documents: request builder and lenient reply readers
//
// Every request carries "function" and "ID"; every request except auth also
// carries "token". Replies echo "ID" and report "statusCode" (0 = success).
use crate::error::{CorelinkError, Result};
use corelink_core::StreamId;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct Request {
    doc: Map<String, Value>,
}

impl Request {
    pub fn new(function: &str) -> Self {
        let mut doc = Map::new();
        doc.insert("function".to_string(), Value::from(function));
        Request { doc }
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.doc.insert(key.to_string(), value.into());
        self
    }

    pub fn extend(mut self, fields: Map<String, Value>) -> Self {
        self.doc.extend(fields);
        self
    }

    pub fn function(&self) -> &str {
        self.doc.get("function").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn id(&self) -> Option<u32> {
        self.doc.get("ID").and_then(as_u32)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.doc)
    }
}

/// Reads a u32 from a JSON number or a numeric string
pub fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn field_u32(reply: &Value, key: &str) -> Option<u32> {
    reply.get(key).and_then(as_u32)
}

pub fn field_str<'a>(reply: &'a Value, key: &str) -> Option<&'a str> {
    reply.get(key).and_then(Value::as_str)
}

pub fn status_code(reply: &Value) -> i64 {
    match reply.get("statusCode") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => 0,
    }
}

pub fn message(reply: &Value) -> String {
    field_str(reply, "message").unwrap_or_default().to_string()
}

/// Stream ids listed under `key`, either as `{"streamID": ..}` objects or
/// bare values. A zero or unparsable id fails the whole list.
pub fn stream_list(reply: &Value, key: &str) -> Result<Vec<StreamId>> {
    let entries = match reply.get(key) {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(other) => {
            return Err(CorelinkError::Protocol(format!("{} is not a list: {}", key, other)))
        }
    };

    entries
        .iter()
        .map(|entry| {
            let id = match entry {
                Value::Object(_) => entry.get("streamID").and_then(as_u32),
                other => as_u32(other),
            };
            match id {
                Some(id) if id != 0 => Ok(id),
                _ => Err(CorelinkError::Protocol(format!("error parsing streamID from {}", entry))),
            }
        })
        .collect()
}

pub fn string_list(reply: &Value, key: &str) -> Vec<String> {
    reply
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}
