use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Declared type of one payload field.
///
/// Type names are matched case-insensitively. Names other than the four coerced
/// types are kept verbatim and decode as pass-through strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Int,
    Long,
    Bool,
    Other(String),
}

impl From<String> for FieldType {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => FieldType::String,
            "INT" => FieldType::Int,
            "LONG" => FieldType::Long,
            "BOOL" | "BOOLEAN" => FieldType::Bool,
            _ => FieldType::Other(s),
        }
    }
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        FieldType::from(s.to_string())
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.to_string()
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FieldType::String => write!(f, "STRING"),
            FieldType::Int => write!(f, "INT"),
            FieldType::Long => write!(f, "LONG"),
            FieldType::Bool => write!(f, "BOOL"),
            FieldType::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<FieldType>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
        }
    }
}

/// Ordered payload layout of one logical stream, keyed by `name:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSchema {
    pub name: String,
    pub version: String,
    pub fields: Vec<SchemaField>,
}

impl StreamSchema {
    pub fn new(name: impl Into<String>, version: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            fields,
        }
    }

    pub fn stream_key(&self) -> String {
        stream_key(&self.name, &self.version)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub fn stream_key(name: &str, version: &str) -> String {
    format!("{}:{}", name, version)
}
