//! Inbound message sanitization
//!
//! Server payloads are reduced to an explicit allowlist before any caller code
//! sees them. Fields fall into three categories: `common` fields always pass,
//! `auth` fields pass only for authentication-typed messages and `data` fields
//! only for data-typed messages. Everything else is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Deref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCategory {
    Common,
    Auth,
    Data,
}

/// Allowlist of message fields, shared by every connection of a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPolicy {
    pub common: Vec<String>,
    pub auth: Vec<String>,
    pub data: Vec<String>,
    /// Declared `type` values that count as authentication messages
    pub auth_types: Vec<String>,
    /// Declared `type` values that count as data messages
    pub data_types: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self {
            common: strings(&["id", "type", "status", "timestamp"]),
            auth: strings(&["token", "authenticated", "session"]),
            data: strings(&["content", "payload", "message", "data"]),
            auth_types: strings(&["auth", "authentication"]),
            data_types: strings(&["data", "message"]),
        }
    }
}

impl FieldPolicy {
    /// Category applicable to a message with the given declared type, besides `Common`
    pub fn category_for(&self, message_type: Option<&str>) -> Option<FieldCategory> {
        let message_type = message_type?;
        if self.auth_types.iter().any(|t| t == message_type) {
            Some(FieldCategory::Auth)
        } else if self.data_types.iter().any(|t| t == message_type) {
            Some(FieldCategory::Data)
        } else {
            None
        }
    }

    fn fields(&self, category: FieldCategory) -> &[String] {
        match category {
            FieldCategory::Common => &self.common,
            FieldCategory::Auth => &self.auth,
            FieldCategory::Data => &self.data,
        }
    }

    /// Copy only allowlisted fields. Non-object payloads sanitize to an empty message.
    pub fn sanitize(&self, payload: &Value) -> SanitizedMessage {
        let Some(object) = payload.as_object() else {
            return SanitizedMessage::default();
        };

        let mut sanitized = Map::new();
        let mut copy = |category: FieldCategory| {
            for field in self.fields(category) {
                if let Some(value) = object.get(field) {
                    sanitized.insert(field.clone(), value.clone());
                }
            }
        };

        copy(FieldCategory::Common);
        if let Some(category) = self.category_for(object.get("type").and_then(Value::as_str)) {
            copy(category);
        }

        SanitizedMessage(sanitized)
    }
}

/// An inbound message holding allowlisted fields only.
///
/// Only [`FieldPolicy::sanitize`] can build one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedMessage(Map<String, Value>);

impl SanitizedMessage {
    pub fn message_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl Deref for SanitizedMessage {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
