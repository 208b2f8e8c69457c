//! Input and snapshot files.

use anyhow::{anyhow, Context, Result};
use graphbulk_engine::BulkConfig;
use graphbulk_schema::Model;
use graphbulk_store::{MemoryGraphStore, Relationship, StoreSnapshot, Twin};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Store contents from `path`; an absent file is an empty store.
pub fn load_store(path: &Path) -> Result<MemoryGraphStore> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "snapshot not found, starting empty");
        return Ok(MemoryGraphStore::new());
    }
    let snapshot: StoreSnapshot = read_json(path)?;
    Ok(MemoryGraphStore::from_snapshot(snapshot))
}

/// Write `snapshot` to `path` through a sibling temp file.
pub fn save_store(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// A JSON array of models, or an object with a `models` array.
pub fn load_models(path: &Path) -> Result<Vec<Model>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModelFile {
        List(Vec<Model>),
        Wrapped { models: Vec<Model> },
    }
    Ok(match read_json::<ModelFile>(path)? {
        ModelFile::List(models) | ModelFile::Wrapped { models } => models,
    })
}

/// Twins plus an optional relationship list.
#[derive(Debug, Default, Deserialize)]
pub struct TwinBatch {
    #[serde(default)]
    pub twins: Vec<Twin>,
    #[serde(default)]
    pub relationships: Option<Vec<Relationship>>,
}

pub fn load_twin_batch(path: &Path) -> Result<TwinBatch> {
    read_json(path)
}

/// Config file if given, otherwise `GRAPHBULK_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<BulkConfig> {
    match path {
        Some(path) => read_json(path),
        None => Ok(BulkConfig::from_env()),
    }
}

/// Parse `key=value`.
pub fn parse_filter(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("filter `{raw}` is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("filter `{raw}` has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}
