//! Read access to the downloaded source environment.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use prd_primitives::{ObjectId, ObjectKind};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Result alias used by object sources.
pub type SourceResult<T> = Result<T, SourceError>;

/// Extension source value marking hooks whose code is managed by the store.
pub const STORE_EXTENSION_SOURCE: &str = "rossum_store";
/// Directory prefix holding per-field formula code next to a schema file.
pub const FORMULA_DIR_PREFIX: &str = "formulas_";

/// Errors raised while reading source objects.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A file or directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A payload file is not valid JSON.
    #[error("malformed payload {}: {reason}", path.display())]
    Format {
        /// Offending path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
}

impl SourceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Content stored next to a payload that supersedes part of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SideChannel {
    /// Replaces the hook's `config.code`.
    HookCode(String),
    /// Replaces the `formula` of schema datapoints, keyed by datapoint id.
    FormulaFields(BTreeMap<String, String>),
}

/// A source payload and its optional side channel.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceObject {
    /// Kind of the object.
    pub kind: ObjectKind,
    /// Raw payload as downloaded.
    pub payload: Value,
    /// Side-channel content, if present.
    pub side_channel: Option<SideChannel>,
}

impl SourceObject {
    /// Wraps a payload with no side channel.
    #[must_use]
    pub fn new(kind: ObjectKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            side_channel: None,
        }
    }

    /// Attaches a side channel.
    #[must_use]
    pub fn with_side_channel(mut self, side_channel: SideChannel) -> Self {
        self.side_channel = Some(side_channel);
        self
    }
}

/// Read-only view of the source environment.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Returns the ids of every available object of `kind`, ascending.
    async fn list(&self, kind: ObjectKind) -> SourceResult<Vec<ObjectId>>;

    /// Reads one object, or `None` when the source has no such object.
    async fn load(&self, kind: ObjectKind, id: ObjectId) -> SourceResult<Option<SourceObject>>;
}

/// Source backed by a directory tree of `*.json` payloads.
///
/// Files are indexed once on [`open`](Self::open) by the kind encoded in
/// their `url` and by their `id`; payloads are re-read on every
/// [`load`](ObjectSource::load). Side channels are discovered next to the
/// payload file:
///
/// - hooks: a sibling `<stem>.py` or `<stem>.js`, chosen from
///   `config.runtime`;
/// - schemas: files in a sibling `formulas_<stem>/` directory, one per
///   datapoint id.
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
    index: HashMap<(ObjectKind, ObjectId), PathBuf>,
}

impl DirectorySource {
    /// Walks `root` and indexes every payload file.
    ///
    /// Files without a recognizable `url`/`id` pair are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the tree cannot be walked or a payload is
    /// not valid JSON.
    pub async fn open(root: impl Into<PathBuf>) -> SourceResult<Self> {
        let root = root.into();
        let files = collect_json_files(&root).await?;
        let entries = try_join_all(files.into_iter().map(|path| async move {
            let payload = read_payload(&path).await?;
            Ok::<_, SourceError>(identify(&payload).map(|key| (key, path)))
        }))
        .await?;

        let mut index = HashMap::new();
        for (key, path) in entries.into_iter().flatten() {
            if let Some(previous) = index.insert(key, path) {
                warn!(kind = %key.0, id = %key.1, path = %previous.display(), "duplicate payload ignored");
            }
        }
        debug!(root = %root.display(), objects = index.len(), "source indexed");
        Ok(Self { root, index })
    }

    /// Returns the indexed root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectSource for DirectorySource {
    async fn list(&self, kind: ObjectKind) -> SourceResult<Vec<ObjectId>> {
        let mut ids: Vec<_> = self
            .index
            .keys()
            .filter(|(indexed, _)| *indexed == kind)
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn load(&self, kind: ObjectKind, id: ObjectId) -> SourceResult<Option<SourceObject>> {
        let Some(path) = self.index.get(&(kind, id)) else {
            return Ok(None);
        };
        let payload = read_payload(path).await?;
        let side_channel = match kind {
            ObjectKind::Hook => hook_code(path, &payload).await?,
            ObjectKind::Schema => formula_fields(path).await?,
            _ => None,
        };
        Ok(Some(SourceObject {
            kind,
            payload,
            side_channel,
        }))
    }
}

/// In-memory source for tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    objects: BTreeMap<(ObjectKind, ObjectId), SourceObject>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `object`, keyed by the `id` of its payload.
    ///
    /// Objects whose payload has no numeric `id` are dropped.
    #[must_use]
    pub fn with(mut self, object: SourceObject) -> Self {
        if let Some(id) = object.payload.get("id").and_then(Value::as_u64) {
            self.objects.insert((object.kind, ObjectId::new(id)), object);
        }
        self
    }

    /// Adds a payload with no side channel.
    #[must_use]
    pub fn with_payload(self, kind: ObjectKind, payload: Value) -> Self {
        self.with(SourceObject::new(kind, payload))
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn list(&self, kind: ObjectKind) -> SourceResult<Vec<ObjectId>> {
        Ok(self
            .objects
            .keys()
            .filter(|(indexed, _)| *indexed == kind)
            .map(|(_, id)| *id)
            .collect())
    }

    async fn load(&self, kind: ObjectKind, id: ObjectId) -> SourceResult<Option<SourceObject>> {
        Ok(self.objects.get(&(kind, id)).cloned())
    }
}

async fn collect_json_files(root: &Path) -> SourceResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|err| SourceError::io(&dir, err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SourceError::io(&dir, err))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| SourceError::io(&path, err))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

async fn read_payload(path: &Path) -> SourceResult<Value> {
    let bytes = fs::read(path)
        .await
        .map_err(|err| SourceError::io(path, err))?;
    serde_json::from_slice(&bytes).map_err(|err| SourceError::Format {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn identify(payload: &Value) -> Option<(ObjectKind, ObjectId)> {
    let url = payload.get("url")?.as_str()?;
    let id = payload.get("id")?.as_u64()?;
    match ObjectKind::from_url(url) {
        Ok(kind) => Some((kind, ObjectId::new(id))),
        Err(err) => {
            debug!(url, error = %err, "payload of unknown kind skipped");
            None
        }
    }
}

async fn hook_code(path: &Path, payload: &Value) -> SourceResult<Option<SideChannel>> {
    let from_store = payload
        .get("extension_source")
        .and_then(Value::as_str)
        .is_some_and(|source| source == STORE_EXTENSION_SOURCE);
    let config = payload.get("config");
    let has_code = config
        .and_then(|config| config.get("code"))
        .is_some_and(|code| !code.is_null());
    if from_store || !has_code {
        return Ok(None);
    }

    let python = config
        .and_then(|config| config.get("runtime"))
        .and_then(Value::as_str)
        .is_some_and(|runtime| runtime.contains("python"));
    let code_path = path.with_extension(if python { "py" } else { "js" });
    match fs::read_to_string(&code_path).await {
        Ok(code) => Ok(Some(SideChannel::HookCode(code))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SourceError::io(&code_path, err)),
    }
}

async fn formula_fields(path: &Path) -> SourceResult<Option<SideChannel>> {
    let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
        return Ok(None);
    };
    let dir = path.with_file_name(format!("{FORMULA_DIR_PREFIX}{stem}"));
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(SourceError::io(&dir, err)),
    };

    let mut fields = BTreeMap::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| SourceError::io(&dir, err))?
    {
        let field_path = entry.path();
        let Some(field_id) = field_path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let code = fs::read_to_string(&field_path)
            .await
            .map_err(|err| SourceError::io(&field_path, err))?;
        fields.insert(field_id.to_owned(), code);
    }

    Ok((!fields.is_empty()).then_some(SideChannel::FormulaFields(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const API: &str = "https://src.example/api/v1";

    async fn write_json(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, serde_json::to_vec_pretty(value).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn indexes_payloads_by_url_kind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_json(
            &root.join("organization.json"),
            &json!({"id": 1, "url": format!("{API}/organizations/1")}),
        )
        .await;
        write_json(
            &root.join("workspaces/main_[4]/queues/inv_[7]/queue.json"),
            &json!({"id": 7, "url": format!("{API}/queues/7")}),
        )
        .await;
        write_json(&root.join("notes.json"), &json!({"hello": "world"})).await;

        let source = DirectorySource::open(root).await.unwrap();
        assert_eq!(
            source.list(ObjectKind::Queue).await.unwrap(),
            [ObjectId::new(7)]
        );
        assert!(
            source
                .load(ObjectKind::Organization, ObjectId::new(1))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            source
                .load(ObjectKind::Hook, ObjectId::new(1))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn discovers_hook_code() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = dir.path().join("hooks");
        write_json(
            &hooks.join("validator_[3].json"),
            &json!({
                "id": 3,
                "url": format!("{API}/hooks/3"),
                "config": {"runtime": "python3.12", "code": "old"}
            }),
        )
        .await;
        fs::write(hooks.join("validator_[3].py"), "new").await.unwrap();
        write_json(
            &hooks.join("store_[4].json"),
            &json!({
                "id": 4,
                "url": format!("{API}/hooks/4"),
                "extension_source": "rossum_store",
                "config": {"runtime": "python3.12", "code": "old"}
            }),
        )
        .await;
        fs::write(hooks.join("store_[4].py"), "ignored").await.unwrap();

        let source = DirectorySource::open(dir.path()).await.unwrap();
        let hook = source
            .load(ObjectKind::Hook, ObjectId::new(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hook.side_channel, Some(SideChannel::HookCode("new".into())));

        let store_hook = source
            .load(ObjectKind::Hook, ObjectId::new(4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store_hook.side_channel, None);
    }

    #[tokio::test]
    async fn discovers_formula_fields() {
        let dir = tempfile::tempdir().unwrap();
        let schemas = dir.path().join("schemas");
        write_json(
            &schemas.join("invoice_[2].json"),
            &json!({"id": 2, "url": format!("{API}/schemas/2"), "content": []}),
        )
        .await;
        let formulas = schemas.join("formulas_invoice_[2]");
        fs::create_dir_all(&formulas).await.unwrap();
        fs::write(formulas.join("total.py"), "a + b").await.unwrap();

        let source = DirectorySource::open(dir.path()).await.unwrap();
        let schema = source
            .load(ObjectKind::Schema, ObjectId::new(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            schema.side_channel,
            Some(SideChannel::FormulaFields(BTreeMap::from([(
                "total".to_owned(),
                "a + b".to_owned()
            )])))
        );
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{").await.unwrap();
        let err = DirectorySource::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, SourceError::Format { .. }));
    }
}
