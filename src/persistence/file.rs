//! Flat-file backing store.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::{ProviderConfig, StorageMode};
use crate::persistence::atomic::write_atomic;
use crate::persistence::{document, Persistence, PersistenceError, PersistenceResult};
use crate::routing::KeySchema;
use crate::table::RoutingTable;

/// Stores the table as one TOML document, replaced atomically on commit.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    provider: ProviderConfig,
    schema: KeySchema,
    designator: String,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>, provider: ProviderConfig, designator: String) -> Self {
        Self {
            path: path.into(),
            provider,
            schema: KeySchema::flat_file(),
            designator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    fn mode(&self) -> StorageMode {
        StorageMode::File
    }

    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    async fn commit(&self, table: &RoutingTable) -> PersistenceResult<()> {
        // Serialize before touching the filesystem
        let text = document::to_text(table, &self.provider)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, text.as_bytes()))
            .await
            .map_err(|e| self.write_error(io::Error::other(e)))?
            .map_err(|e| self.write_error(e))?;

        tracing::debug!(path = %self.path.display(), routes = table.len(), "Routes file replaced");
        Ok(())
    }

    async fn load(&self) -> PersistenceResult<RoutingTable> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Routes file not found, starting empty");
                return Ok(RoutingTable::new());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let location = self.path.display().to_string();
        document::parse(&text, &location, &self.schema, &self.designator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RouteRecord;
    use serde_json::json;

    fn persistence(dir: &Path) -> FilePersistence {
        FilePersistence::new(dir.join("rules.toml"), ProviderConfig::default(), String::new())
    }

    fn one_route() -> RoutingTable {
        std::iter::once(
            RouteRecord::build("/a/", "http://10.0.0.1:1", json!({}), 1, &KeySchema::flat_file(), "")
                .unwrap(),
        )
        .collect()
    }

    #[tokio::test]
    async fn test_commit_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = persistence(dir.path());

        backend.commit(&one_route()).await.unwrap();
        let loaded = backend.load().await.unwrap();

        assert_eq!(loaded, one_route());
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = persistence(dir.path()).load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_commit_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilePersistence::new(
            dir.path().join("nope").join("rules.toml"),
            ProviderConfig::default(),
            String::new(),
        );

        let err = backend.commit(&one_route()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Write { .. }));
    }

    #[tokio::test]
    async fn test_load_propagates_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = persistence(dir.path());
        std::fs::write(backend.path(), "[http.routers.x]\nrule = \"unterminated").unwrap();

        let err = backend.load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Parse { .. }));
    }
}
