use serde::Serialize;

/// One decoded payload value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    String(String),
    Int(i32),
    Long(i64),
    Bool(bool),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

/// A typed event ready for the publishing sink.
///
/// `payload` is positionally aligned with the fields of the stream's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedRecord {
    pub stream_key: String,
    /// `[source file name, tenant id]`
    pub metadata: Vec<FieldValue>,
    pub payload: Vec<FieldValue>,
}

impl DecodedRecord {
    pub fn new(
        stream_key: impl Into<String>,
        source: &str,
        tenant_id: &str,
        payload: Vec<FieldValue>,
    ) -> Self {
        Self {
            stream_key: stream_key.into(),
            metadata: vec![FieldValue::from(source), FieldValue::from(tenant_id)],
            payload,
        }
    }

    /// Source identifier of the record (the uploaded file name).
    pub fn source(&self) -> Option<&str> {
        self.metadata.first().and_then(FieldValue::as_str)
    }
}
