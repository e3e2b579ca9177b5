use crate::{
    lifecycle,
    manifest::{RawModEntry, RawOverride},
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mod {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    /// Cache-relative paths deployed under `Downloads/<id>/`.
    pub download_files: Vec<String>,
    pub override_files: Vec<OverrideFile>,
}

impl Mod {
    pub fn file_count(&self) -> usize {
        self.download_files.len() + self.override_files.len()
    }

    fn from_raw(raw: RawModEntry, warnings: &mut Vec<LoadWarning>) -> Self {
        let mut override_files = Vec::with_capacity(raw.overrides.len());
        for (index, item) in raw.overrides.iter().enumerate() {
            match item.complete() {
                Some((source, target)) => override_files.push(OverrideFile {
                    source: source.to_string(),
                    target: target.to_string(),
                }),
                None => {
                    debug!(mod_id = %raw.id, index, "dropping override without source or target");
                    warnings.push(LoadWarning::DroppedOverride {
                        mod_id: raw.id.clone(),
                        index,
                    });
                }
            }
        }

        Self {
            name: raw.name.unwrap_or_else(|| raw.id.clone()),
            id: raw.id,
            description: raw.description,
            image: raw.image,
            download_files: raw.downloads,
            override_files,
        }
    }

    fn to_raw(&self) -> RawModEntry {
        RawModEntry {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            description: self.description.clone(),
            image: self.image.clone(),
            downloads: self.download_files.clone(),
            overrides: self
                .override_files
                .iter()
                .map(|file| RawOverride::new(&file.source, &file.target))
                .collect(),
        }
    }
}

/// A cache file placed at an exact path under the game root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OverrideFile {
    pub source: String,
    pub target: String,
}

impl OverrideFile {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Something the load tolerated but the caller should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadWarning {
    DuplicateId { id: String },
    InvalidId { id: String, reason: &'static str },
    DroppedOverride { mod_id: String, index: usize },
}

impl LoadWarning {
    fn concerns_entry(&self, id: &str) -> bool {
        match self {
            LoadWarning::DuplicateId { .. } => false,
            LoadWarning::InvalidId { id: other, .. } => other == id,
            LoadWarning::DroppedOverride { mod_id, .. } => mod_id == id,
        }
    }
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadWarning::DuplicateId { id } => {
                write!(f, "duplicate mod id in manifest: {id} (later entry kept)")
            }
            LoadWarning::InvalidId { id, reason } => {
                write!(f, "unusable mod id in manifest: {id:?} ({reason})")
            }
            LoadWarning::DroppedOverride { mod_id, index } => {
                write!(f, "override #{index} of {mod_id} has no source or target (dropped)")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub catalog: Catalog,
    pub warnings: Vec<LoadWarning>,
}

impl LoadOutcome {
    pub fn has_duplicates(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| matches!(warning, LoadWarning::DuplicateId { .. }))
    }
}

/// Mods keyed by id, kept in manifest (install) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    mods: Vec<Mod>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_raw(entries: Vec<RawModEntry>) -> LoadOutcome {
        let mut catalog = Catalog::default();
        let mut warnings: Vec<LoadWarning> = Vec::new();

        for raw in entries {
            let mut entry_warnings = Vec::new();
            let mod_entry = Mod::from_raw(raw, &mut entry_warnings);
            if let Some(reason) = lifecycle::id_problem(&mod_entry.id) {
                warn!(id = ?mod_entry.id, reason, "unusable mod id in manifest");
                entry_warnings.push(LoadWarning::InvalidId {
                    id: mod_entry.id.clone(),
                    reason,
                });
            }

            match catalog.index.get(&mod_entry.id) {
                Some(&slot) => {
                    warn!(id = %mod_entry.id, "duplicate mod id in manifest, overwriting previous entry");
                    // the replaced entry's own warnings no longer apply
                    warnings.retain(|warning| !warning.concerns_entry(&mod_entry.id));
                    warnings.push(LoadWarning::DuplicateId {
                        id: mod_entry.id.clone(),
                    });
                    warnings.extend(entry_warnings);
                    catalog.mods[slot] = mod_entry;
                }
                None => {
                    warnings.extend(entry_warnings);
                    catalog.push(mod_entry);
                }
            }
        }

        LoadOutcome { catalog, warnings }
    }

    pub fn to_raw(&self) -> Vec<RawModEntry> {
        self.mods.iter().map(Mod::to_raw).collect()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mod> {
        self.mods.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.mods.iter().map(|mod_entry| mod_entry.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Mod> {
        self.index.get(id).map(|&slot| &self.mods[slot])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn push(&mut self, mod_entry: Mod) {
        self.index.insert(mod_entry.id.clone(), self.mods.len());
        self.mods.push(mod_entry);
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn insert(&mut self, slot: usize, mod_entry: Mod) {
        let slot = slot.min(self.mods.len());
        self.mods.insert(slot, mod_entry);
        self.reindex();
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Mod> {
        let slot = self.index.remove(id)?;
        let removed = self.mods.remove(slot);
        self.reindex();
        Some(removed)
    }

    fn reindex(&mut self) {
        self.index = self
            .mods
            .iter()
            .enumerate()
            .map(|(slot, mod_entry)| (mod_entry.id.clone(), slot))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(id: &str) -> RawModEntry {
        RawModEntry {
            id: id.to_string(),
            name: None,
            description: None,
            image: None,
            downloads: Vec::new(),
            overrides: Vec::new(),
        }
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let outcome = Catalog::from_raw(vec![raw("plain")]);
        let entry = outcome.catalog.get("plain").unwrap();
        assert_eq!(entry.name, "plain");
        assert_eq!(entry.description, None);
        assert!(entry.download_files.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn duplicate_id_keeps_second_entry_in_first_position() {
        let mut first = raw("x");
        first.name = Some("First".to_string());
        let mut second = raw("x");
        second.name = Some("Second".to_string());

        let outcome = Catalog::from_raw(vec![first, raw("y"), second]);
        assert_eq!(outcome.catalog.len(), 2);
        assert_eq!(outcome.catalog.get("x").unwrap().name, "Second");
        assert_eq!(outcome.catalog.ids().collect::<Vec<_>>(), vec!["x", "y"]);
        assert!(outcome.has_duplicates());
        assert_eq!(
            outcome.warnings,
            vec![LoadWarning::DuplicateId {
                id: "x".to_string()
            }]
        );
    }

    #[test]
    fn incomplete_override_pairs_are_dropped() {
        let mut entry = raw("m");
        entry.overrides = vec![
            RawOverride {
                source: Some("m/a.iff".to_string()),
                target: None,
            },
            RawOverride {
                source: Some(String::new()),
                target: Some("GameData/b.iff".to_string()),
            },
            RawOverride::new("m/c.iff", "GameData/c.iff"),
        ];

        let outcome = Catalog::from_raw(vec![entry]);
        let m = outcome.catalog.get("m").unwrap();
        assert_eq!(m.override_files, vec![OverrideFile::new("m/c.iff", "GameData/c.iff")]);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(!outcome.has_duplicates());
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut catalog = Catalog::from_raw(vec![raw("a"), raw("b"), raw("c")]).catalog;
        assert_eq!(catalog.remove("a").unwrap().id, "a");
        assert_eq!(catalog.get("c").unwrap().id, "c");
        assert_eq!(catalog.get("b").unwrap().id, "b");
        assert!(catalog.remove("a").is_none());
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["b", "c"]);

        let a = Catalog::from_raw(vec![raw("a")]).catalog.remove("a").unwrap();
        catalog.insert(0, a);
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(catalog.position("c"), Some(2));
    }

    #[test]
    fn raw_round_trip_is_stable() {
        let mut entry = raw("full");
        entry.name = Some("Full".to_string());
        entry.description = Some("desc".to_string());
        entry.image = Some("cover.png".to_string());
        entry.downloads = vec!["full/a.bmp".to_string()];
        entry.overrides = vec![RawOverride::new("full/o.iff", "GameData/o.iff")];

        let first = Catalog::from_raw(vec![entry, raw("bare")]).catalog;
        let second = Catalog::from_raw(first.to_raw()).catalog;
        assert_eq!(first, second);
    }

    #[test]
    fn replaced_duplicate_takes_its_warnings_along() {
        let mut first = raw("x");
        first.overrides = vec![RawOverride::default()];
        let mut second = raw("x");
        second.overrides = vec![
            RawOverride::new("x/a.iff", "GameData/a.iff"),
            RawOverride::default(),
        ];

        let outcome = Catalog::from_raw(vec![first, second]);
        assert_eq!(
            outcome.warnings,
            vec![
                LoadWarning::DuplicateId {
                    id: "x".to_string()
                },
                LoadWarning::DroppedOverride {
                    mod_id: "x".to_string(),
                    index: 1
                },
            ]
        );
    }

    #[test]
    fn unusable_ids_are_flagged_but_kept() {
        let outcome = Catalog::from_raw(vec![raw("keep"), raw("."), raw("a/b")]);
        assert_eq!(outcome.catalog.len(), 3);
        let flagged: Vec<&str> = outcome
            .warnings
            .iter()
            .filter_map(|warning| match warning {
                LoadWarning::InvalidId { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(flagged, vec![".", "a/b"]);
    }
}
