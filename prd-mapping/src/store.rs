//! Persistence of the mapping tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Mapping, MappingResult};

/// Loads and saves the mapping tree.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Reads and validates the persisted mapping.
    async fn load(&self) -> MappingResult<Mapping>;

    /// Replaces the persisted mapping with `mapping`.
    async fn save(&self, mapping: &Mapping) -> MappingResult<()>;
}

/// YAML mapping document on the local filesystem.
///
/// Saves go through a sibling temporary file that is renamed over the
/// original, so an interrupted write never truncates the mapping.
#[derive(Clone, Debug)]
pub struct YamlMappingFile {
    path: PathBuf,
}

impl YamlMappingFile {
    /// Creates a handle for the document at `path`. The file is not touched.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl MappingStore for YamlMappingFile {
    async fn load(&self) -> MappingResult<Mapping> {
        let raw = fs::read_to_string(&self.path).await?;
        let mapping: Mapping = serde_yaml::from_str(&raw)?;
        mapping.validate()?;
        debug!(path = %self.path.display(), "mapping loaded");
        Ok(mapping)
    }

    async fn save(&self, mapping: &Mapping) -> MappingResult<()> {
        let rendered = serde_yaml::to_string(mapping)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.staging_path();
        fs::write(&staging, rendered).await?;
        fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), "mapping saved");
        Ok(())
    }
}

/// In-process mapping store used by tests and rehearsals.
#[derive(Debug)]
pub struct MemoryMappingStore {
    mapping: RwLock<Mapping>,
}

impl MemoryMappingStore {
    /// Seeds the store with `mapping`.
    #[must_use]
    pub fn new(mapping: Mapping) -> Self {
        Self {
            mapping: RwLock::new(mapping),
        }
    }

    /// Returns a copy of the currently stored mapping.
    pub async fn snapshot(&self) -> Mapping {
        self.mapping.read().await.clone()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn load(&self) -> MappingResult<Mapping> {
        let mapping = self.mapping.read().await.clone();
        mapping.validate()?;
        Ok(mapping)
    }

    async fn save(&self, mapping: &Mapping) -> MappingResult<()> {
        *self.mapping.write().await = mapping.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MappingError, MappingNode};
    use prd_override::AttributeOverride;
    use prd_primitives::ObjectId;
    use serde_json::json;

    const DOCUMENT: &str = "\
organization:
  id: 1
  name: Acme
  target_object: 100
  schemas:
  - id: 2
    name: Invoices
    target_object: null
  hooks:
  - id: 3
    name: Validator
    target_object: 300
    ignore: true
  - id: 4
    name: Exporter
    target_object: null
    attribute_override:
      config.url: $prd_ref:3.config.url
      name: Exporter (prod)
";

    #[tokio::test]
    async fn yaml_file_round_trips_directives() {
        let dir = tempfile::tempdir().unwrap();
        let store = YamlMappingFile::new(dir.path().join("mapping.yaml"));
        tokio::fs::write(store.path(), DOCUMENT).await.unwrap();

        let mut mapping = store.load().await.unwrap();
        assert!(mapping.organization.hooks[0].ignore);
        let table = mapping.organization.hooks[1].overrides().unwrap();
        assert_eq!(table.root_keys(), ["config", "name"]);

        mapping.organization.schemas[0].target_object = Some(ObjectId::new(200));
        store.save(&mapping).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, mapping);
        assert!(!dir.path().join("mapping.yaml.tmp").exists());

        let written = tokio::fs::read_to_string(store.path()).await.unwrap();
        let id_at = written.find("id: 4").unwrap();
        let target_at = written[id_at..].find("target_object").unwrap();
        let override_at = written[id_at..].find("attribute_override").unwrap();
        assert!(target_at < override_at);
    }

    #[tokio::test]
    async fn load_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.yaml");
        tokio::fs::write(
            &path,
            "organization:\n  id: 1\n  schemas:\n  - id: 1\n",
        )
        .await
        .unwrap();

        let err = YamlMappingFile::new(path).load().await.unwrap_err();
        assert!(matches!(err, MappingError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn memory_store_keeps_latest_save() {
        let table: AttributeOverride =
            serde_json::from_value(json!({"name": "$source_value"})).unwrap();
        let org = MappingNode::new(ObjectId::new(1), "org").with_override(table);
        let store = MemoryMappingStore::new(Mapping::new(org));

        let mut mapping = store.load().await.unwrap();
        mapping.organization.target_object = Some(ObjectId::new(9));
        store.save(&mapping).await.unwrap();

        assert_eq!(
            store.snapshot().await.organization.target_object,
            Some(ObjectId::new(9))
        );
    }
}
