use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use zip::write::{FileOptions, ZipWriter};

use usagepipe_core::constants::{
    EXECUTION_TIME_STREAM, FAULT_STREAM, REQUEST_STREAM, RESPONSE_STREAM, THROTTLE_STREAM,
};
use usagepipe_core::{
    DecodedRecord, NewUpload, PipelineResult, SchemaField, StreamSchema, UploadedFileRecord,
};
use usagepipe_db::{MemoryUsageFileStore, UsageFileStore};
use usagepipe_schema::{SchemaSource, StreamSchemaCache};

use crate::sink::EventSink;

pub struct StaticSchemaSource(pub Vec<StreamSchema>);

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn load_all(&self) -> PipelineResult<Vec<StreamSchema>> {
        Ok(self.0.clone())
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

fn schema(key: &str, fields: &[(&str, &str)]) -> StreamSchema {
    let (name, version) = key.rsplit_once(':').unwrap();
    StreamSchema::new(
        name,
        version,
        fields
            .iter()
            .map(|(name, ty)| SchemaField::new(*name, *ty))
            .collect(),
    )
}

pub fn usage_schemas() -> Vec<StreamSchema> {
    vec![
        schema(
            REQUEST_STREAM,
            &[
                ("apiName", "STRING"),
                ("requestCount", "INT"),
                ("requestTime", "LONG"),
                ("throttledOut", "BOOL"),
            ],
        ),
        schema(RESPONSE_STREAM, &[("apiName", "STRING"), ("responseTime", "LONG")]),
        schema(EXECUTION_TIME_STREAM, &[("apiName", "STRING"), ("backendLatency", "LONG")]),
        schema(FAULT_STREAM, &[("apiName", "STRING"), ("faultTime", "LONG")]),
        schema(THROTTLE_STREAM, &[("apiName", "STRING"), ("throttledTime", "LONG")]),
    ]
}

pub fn schema_cache() -> Arc<StreamSchemaCache> {
    Arc::new(StreamSchemaCache::new(Arc::new(StaticSchemaSource(
        usage_schemas(),
    ))))
}

pub fn request_line(count: i32) -> String {
    format!("{}\tPizzaAPI--{}--1700000000000--false", REQUEST_STREAM, count)
}

pub fn memory_store() -> Arc<MemoryUsageFileStore> {
    Arc::new(MemoryUsageFileStore::default())
}

/// Upload `content` under `file_name`; the tenant is the name's first segment.
pub async fn upload(
    store: &Arc<MemoryUsageFileStore>,
    file_name: &str,
    content: &str,
) -> UploadedFileRecord {
    upload_bytes(store, file_name, content.as_bytes().to_vec()).await
}

pub async fn upload_bytes(
    store: &Arc<MemoryUsageFileStore>,
    file_name: &str,
    content: Vec<u8>,
) -> UploadedFileRecord {
    let tenant = file_name.split('.').next().unwrap();
    store
        .persist_upload(
            NewUpload::new(tenant, file_name).unwrap(),
            Box::pin(std::io::Cursor::new(content)),
        )
        .await
        .unwrap()
}

pub fn zip_bytes(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(std::io::Cursor::new(&mut buffer));
        for (name, content) in entries {
            match content {
                Some(content) => {
                    zip.start_file(*name, FileOptions::default()).unwrap();
                    zip.write_all(content.as_bytes()).unwrap();
                }
                None => zip.add_directory(*name, FileOptions::default()).unwrap(),
            }
        }
        zip.finish().unwrap();
    }
    buffer
}

/// A sink whose publish never completes.
pub struct PendingSink;

#[async_trait]
impl EventSink for PendingSink {
    async fn publish(&self, _record: DecodedRecord) -> PipelineResult<()> {
        std::future::pending().await
    }

    fn sink_name(&self) -> &'static str {
        "pending"
    }
}
