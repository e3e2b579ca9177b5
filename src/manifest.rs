use crate::{
    error::{IoContext, RegistryError, Result},
    fsutil,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawManifest {
    #[serde(default)]
    pub mods: Vec<RawModEntry>,
}

/// One mod exactly as it appears on disk. Optional keys stay optional here;
/// defaults are applied when the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawModEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub downloads: Vec<String>,
    #[serde(default, deserialize_with = "lenient_overrides")]
    pub overrides: Vec<RawOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOverride {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

/// Accepts anything in `overrides`. Entries that are not objects, and fields
/// that are not strings, read as missing so the catalog drops just that pair.
fn lenient_overrides<'de, D>(deserializer: D) -> std::result::Result<Vec<RawOverride>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items.iter().map(RawOverride::from_value).collect())
}

impl RawOverride {
    fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            source: field("source"),
            target: field("target"),
        }
    }

    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            target: Some(target.into()),
        }
    }

    /// Both halves present and non-empty.
    pub fn complete(&self) -> Option<(&str, &str)> {
        let source = self.source.as_deref().filter(|value| !value.is_empty())?;
        let target = self.target.as_deref().filter(|value| !value.is_empty())?;
        Some((source, target))
    }
}

/// Reads and writes `mod_cache/manifest.json`.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            path: cache_root.join(MANIFEST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every raw entry. A missing manifest is created empty first.
    pub fn load(&self) -> Result<Vec<RawModEntry>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "manifest missing, creating empty one");
            self.save(&[])?;
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path).io_context("read manifest", &self.path)?;
        let manifest: RawManifest =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Manifest {
                path: self.path.clone(),
                source,
            })?;
        Ok(manifest.mods)
    }

    /// Replaces the whole manifest with `mods`.
    pub fn save(&self, mods: &[RawModEntry]) -> Result<()> {
        let manifest = RawManifest {
            mods: mods.to_vec(),
        };
        let raw =
            serde_json::to_string_pretty(&manifest).map_err(|source| RegistryError::Manifest {
                path: self.path.clone(),
                source,
            })?;
        fsutil::write_atomic(&self.path, &raw)
    }
}
