//! Stream schema cache
//!
//! Schemas are read from the [`SchemaSource`] once per population and served from memory
//! until [`StreamSchemaCache::invalidate`] is called. A population is only accepted when
//! every required stream key is present; otherwise the load fails with
//! `SchemaUnavailable` and nothing is cached, so the next call retries the source.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use usagepipe_core::constants::REQUIRED_STREAMS;
use usagepipe_core::{PipelineError, PipelineResult, StreamSchema};

use crate::source::SchemaSource;

type SchemaMap = HashMap<String, Arc<StreamSchema>>;

/// Result of a lookup in a populated cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaLookup {
    Found(Arc<StreamSchema>),
    /// The cache is populated but has no definition for this stream key.
    Missing(String),
}

impl SchemaLookup {
    pub fn found(self) -> Option<Arc<StreamSchema>> {
        match self {
            SchemaLookup::Found(schema) => Some(schema),
            SchemaLookup::Missing(_) => None,
        }
    }
}

pub struct StreamSchemaCache {
    source: Arc<dyn SchemaSource>,
    required: Vec<String>,
    schemas: RwLock<Option<Arc<SchemaMap>>>,
    // Serializes populations; readers never take it.
    load_lock: Mutex<()>,
}

impl StreamSchemaCache {
    /// Cache requiring the five well-known usage streams.
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self::with_required(
            source,
            REQUIRED_STREAMS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_required(source: Arc<dyn SchemaSource>, required: Vec<String>) -> Self {
        Self {
            source,
            required,
            schemas: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn required_streams(&self) -> &[String] {
        &self.required
    }

    /// Look up one stream, populating the cache first if needed.
    pub async fn get_schema(&self, stream_key: &str) -> PipelineResult<SchemaLookup> {
        let schemas = self.populated().await?;
        Ok(match schemas.get(stream_key) {
            Some(schema) => SchemaLookup::Found(schema.clone()),
            None => SchemaLookup::Missing(stream_key.to_string()),
        })
    }

    /// Populate eagerly. Returns the number of cached streams.
    pub async fn warm(&self) -> PipelineResult<usize> {
        Ok(self.populated().await?.len())
    }

    /// Drop the populated set; the next lookup reads the source again.
    pub async fn invalidate(&self) {
        *self.schemas.write().await = None;
        tracing::info!("Stream schema cache invalidated");
    }

    pub async fn is_populated(&self) -> bool {
        self.schemas.read().await.is_some()
    }

    async fn populated(&self) -> PipelineResult<Arc<SchemaMap>> {
        if let Some(schemas) = self.schemas.read().await.as_ref() {
            return Ok(schemas.clone());
        }

        let _guard = self.load_lock.lock().await;
        // Another task may have finished loading while we waited.
        if let Some(schemas) = self.schemas.read().await.as_ref() {
            return Ok(schemas.clone());
        }

        let loaded = Arc::new(self.load().await?);
        *self.schemas.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    async fn load(&self) -> PipelineResult<SchemaMap> {
        let schemas = self.source.load_all().await?;

        let mut map = SchemaMap::with_capacity(schemas.len());
        for schema in schemas {
            let key = schema.stream_key();
            if map.insert(key.clone(), Arc::new(schema)).is_some() {
                tracing::warn!(stream = %key, "Duplicate stream definition, keeping the last one");
            }
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !map.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            tracing::error!(
                source = self.source.source_name(),
                found = self.required.len() - missing.len(),
                required = self.required.len(),
                missing = ?missing,
                "Required stream definitions unavailable"
            );
            return Err(PipelineError::SchemaUnavailable(format!(
                "missing required streams: {}",
                missing.join(", ")
            )));
        }

        tracing::info!(
            source = self.source.source_name(),
            streams = map.len(),
            "Stream schemas loaded"
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use usagepipe_core::SchemaField;

    struct CountingSource {
        schemas: StdMutex<Vec<StreamSchema>>,
        loads: AtomicUsize,
    }

    impl CountingSource {
        fn new(keys: &[&str]) -> Self {
            let schemas = keys
                .iter()
                .map(|key| {
                    let (name, version) = key.rsplit_once(':').unwrap();
                    StreamSchema::new(name, version, vec![SchemaField::new("apiName", "STRING")])
                })
                .collect();
            Self {
                schemas: StdMutex::new(schemas),
                loads: AtomicUsize::new(0),
            }
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn load_all(&self) -> PipelineResult<Vec<StreamSchema>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.schemas.lock().unwrap().clone())
        }

        fn source_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_all_required_streams_populate_cache() {
        let source = Arc::new(CountingSource::new(&REQUIRED_STREAMS));
        let cache = StreamSchemaCache::new(source.clone());

        assert_eq!(cache.warm().await.unwrap(), 5);
        let lookup = cache.get_schema(REQUIRED_STREAMS[0]).await.unwrap();
        assert_eq!(lookup.found().unwrap().stream_key(), REQUIRED_STREAMS[0]);
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_partial_definitions_are_schema_unavailable() {
        let source = Arc::new(CountingSource::new(&REQUIRED_STREAMS[..3]));
        let cache = StreamSchemaCache::new(source.clone());

        let err = cache.get_schema(REQUIRED_STREAMS[0]).await.unwrap_err();
        assert!(matches!(err, PipelineError::SchemaUnavailable(_)));
        assert!(!cache.is_populated().await);

        // A failed population is not cached.
        assert!(cache.warm().await.is_err());
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_missing() {
        let cache = StreamSchemaCache::new(Arc::new(CountingSource::new(&REQUIRED_STREAMS)));

        let lookup = cache.get_schema("org.example.unknown:1.0.0").await.unwrap();
        assert_eq!(
            lookup,
            SchemaLookup::Missing("org.example.unknown:1.0.0".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_loads_read_source_once() {
        let source = Arc::new(CountingSource::new(&REQUIRED_STREAMS));
        let cache = Arc::new(StreamSchemaCache::new(source.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_schema(REQUIRED_STREAMS[1]).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().found().is_some());
        }
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_reloads_from_source() {
        let source = Arc::new(CountingSource::new(&REQUIRED_STREAMS));
        let cache = StreamSchemaCache::new(source.clone());
        cache.warm().await.unwrap();

        source
            .schemas
            .lock()
            .unwrap()
            .push(StreamSchema::new("org.example.extra", "1.0.0", vec![]));

        assert!(matches!(
            cache.get_schema("org.example.extra:1.0.0").await.unwrap(),
            SchemaLookup::Missing(_)
        ));

        cache.invalidate().await;
        assert!(matches!(
            cache.get_schema("org.example.extra:1.0.0").await.unwrap(),
            SchemaLookup::Found(_)
        ));
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn test_custom_required_streams() {
        let source = Arc::new(CountingSource::new(&["a:1", "b:1"]));
        let cache = StreamSchemaCache::with_required(source, vec!["a:1".to_string()]);

        assert_eq!(cache.warm().await.unwrap(), 2);
        assert_eq!(cache.required_streams(), ["a:1".to_string()]);
    }
}
