//! Schema sources
//!
//! Exactly one source backs a [`StreamSchemaCache`](crate::StreamSchemaCache): a directory
//! of JSON definition files, or the `stream_definitions` registry table.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::path::{Path, PathBuf};

use usagepipe_core::{PipelineError, PipelineResult, StreamSchema};

use crate::definition::StreamDefinition;

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Read every stream definition the source knows about.
    async fn load_all(&self) -> PipelineResult<Vec<StreamSchema>>;

    fn source_name(&self) -> &'static str;
}

/// `*.json` definition files in one directory. Unreadable or malformed files are
/// logged and skipped.
#[derive(Debug, Clone)]
pub struct DirectorySchemaSource {
    dir: PathBuf,
}

impl DirectorySchemaSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SchemaSource for DirectorySchemaSource {
    async fn load_all(&self) -> PipelineResult<Vec<StreamSchema>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PipelineError::SchemaUnavailable(format!(
                "cannot read schema directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            PipelineError::SchemaUnavailable(format!("cannot list schema directory: {}", e))
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        // Deterministic order so a duplicated key always resolves the same way.
        paths.sort();

        let mut schemas = Vec::with_capacity(paths.len());
        for path in paths {
            let data = match tokio::fs::read_to_string(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable stream definition");
                    continue;
                }
            };
            match StreamDefinition::from_json(&data) {
                Ok(def) => schemas.push(def.into_schema()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed stream definition");
                }
            }
        }

        tracing::debug!(
            dir = %self.dir.display(),
            count = schemas.len(),
            "Loaded stream definitions from directory"
        );
        Ok(schemas)
    }

    fn source_name(&self) -> &'static str {
        "directory"
    }
}

/// Definitions registered in the `stream_definitions` table.
#[derive(Clone)]
pub struct RegistrySchemaSource {
    pool: PgPool,
}

impl RegistrySchemaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a definition.
    #[tracing::instrument(skip(self, definition), fields(stream = %definition.stream_key()))]
    pub async fn register(&self, definition: &StreamDefinition) -> PipelineResult<()> {
        let body = serde_json::to_value(definition)
            .map_err(|e| PipelineError::Config(format!("cannot encode definition: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO stream_definitions (stream_key, name, version, definition, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (stream_key)
            DO UPDATE SET definition = EXCLUDED.definition, updated_at = NOW()
            "#,
        )
        .bind(definition.stream_key())
        .bind(&definition.name)
        .bind(&definition.version)
        .bind(body)
        .execute(&self.pool)
        .await?;

        tracing::info!(stream = %definition.stream_key(), "Stream definition registered");
        Ok(())
    }
}

#[async_trait]
impl SchemaSource for RegistrySchemaSource {
    async fn load_all(&self) -> PipelineResult<Vec<StreamSchema>> {
        let rows = sqlx::query("SELECT stream_key, definition FROM stream_definitions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::SchemaUnavailable(format!("registry query failed: {}", e)))?;

        let mut schemas = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("stream_key")?;
            let body: serde_json::Value = row.try_get("definition")?;
            match serde_json::from_value::<StreamDefinition>(body) {
                Ok(def) => schemas.push(def.into_schema()),
                Err(e) => {
                    tracing::warn!(stream = %key, error = %e, "Skipping malformed registered definition");
                }
            }
        }

        Ok(schemas)
    }

    fn source_name(&self) -> &'static str {
        "registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_directory_source_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("request.json"),
            r#"{"name":"req","version":"3.0.0","payloadData":[{"type":"STRING","name":"api"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectorySchemaSource::new(dir.path());
        let schemas = source.load_all().await.unwrap();

        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].stream_key(), "req:3.0.0");
    }

    #[tokio::test]
    async fn test_missing_directory_is_schema_unavailable() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySchemaSource::new(dir.path().join("absent"));

        let err = source.load_all().await.unwrap_err();
        assert!(matches!(err, PipelineError::SchemaUnavailable(_)));
    }
}
