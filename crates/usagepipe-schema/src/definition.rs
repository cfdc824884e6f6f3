//! Stream definition documents
//!
//! A definition is the JSON form of a stream schema as it is stored on disk or in the
//! registry table:
//!
//! ```json
//! {
//!   "name": "org.wso2.apimgt.statistics.request",
//!   "version": "3.0.0",
//!   "payloadData": [{ "type": "STRING", "name": "apiName" }]
//! }
//! ```
//!
//! Keys other than these three are ignored.

use serde::{Deserialize, Serialize};
use usagepipe_core::models::stream_key;
use usagepipe_core::{SchemaField, StreamSchema};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDefinition {
    pub name: String,
    pub version: String,
    #[serde(rename = "payloadData", default)]
    pub payload_data: Vec<SchemaField>,
}

impl StreamDefinition {
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    pub fn stream_key(&self) -> String {
        stream_key(&self.name, &self.version)
    }

    pub fn into_schema(self) -> StreamSchema {
        StreamSchema::new(self.name, self.version, self.payload_data)
    }
}

impl From<StreamSchema> for StreamDefinition {
    fn from(schema: StreamSchema) -> Self {
        Self {
            name: schema.name,
            version: schema.version,
            payload_data: schema.fields,
        }
    }
}
