use crate::{
    catalog::{Catalog, Mod},
    error::{RegistryError, Result},
    fsutil, lifecycle,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DOWNLOADS_DIR: &str = "Downloads";
pub const CACHE_DIR: &str = "mod_cache";

/// Where deployed files come from and where they go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPaths {
    pub game_root: PathBuf,
    pub cache_root: PathBuf,
}

impl DeployPaths {
    pub fn for_game_root(game_root: &Path) -> Self {
        Self {
            game_root: game_root.to_path_buf(),
            cache_root: game_root.join(CACHE_DIR),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.game_root.join(DOWNLOADS_DIR)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyKind {
    Download,
    Override,
}

impl CopyKind {
    pub fn label(self) -> &'static str {
        match self {
            CopyKind::Download => "download",
            CopyKind::Override => "override",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOp {
    pub mod_id: String,
    pub kind: CopyKind,
    pub source: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeployReport {
    pub mod_count: usize,
    pub download_count: usize,
    pub override_count: usize,
    pub bytes: u64,
    pub copies: Vec<CopyOp>,
}

impl DeployReport {
    pub fn file_count(&self) -> usize {
        self.download_count + self.override_count
    }

    fn absorb(&mut self, other: DeployReport) {
        self.mod_count += other.mod_count;
        self.download_count += other.download_count;
        self.override_count += other.override_count;
        self.bytes += other.bytes;
        self.copies.extend(other.copies);
    }
}

/// Lists the copies one mod needs, in declared order: downloads first, then
/// overrides.
pub fn plan_mod(paths: &DeployPaths, mod_entry: &Mod) -> Result<Vec<CopyOp>> {
    lifecycle::check_mod_id(&mod_entry.id)?;
    let mod_downloads = paths.downloads_dir().join(&mod_entry.id);
    let mut ops = Vec::with_capacity(mod_entry.file_count());

    for entry in &mod_entry.download_files {
        let source = fsutil::join_within(&paths.cache_root, entry)?;
        let tail = download_tail(&mod_entry.id, entry);
        let dest = fsutil::join_within(&mod_downloads, &tail)?;
        ops.push(CopyOp {
            mod_id: mod_entry.id.clone(),
            kind: CopyKind::Download,
            source,
            dest,
        });
    }

    for file in &mod_entry.override_files {
        let source = fsutil::join_within(&paths.cache_root, &file.source)?;
        let dest = fsutil::join_within(&paths.game_root, &file.target)?;
        ops.push(CopyOp {
            mod_id: mod_entry.id.clone(),
            kind: CopyKind::Override,
            source,
            dest,
        });
    }

    Ok(ops)
}

pub fn plan_all(paths: &DeployPaths, catalog: &Catalog) -> Result<Vec<CopyOp>> {
    let mut ops = Vec::new();
    for mod_entry in catalog.iter() {
        ops.extend(plan_mod(paths, mod_entry).map_err(|err| wrap(&mod_entry.id, err))?);
    }
    Ok(ops)
}

/// Copies every file of one mod into the game tree. Files already copied stay
/// in place if a later copy fails.
pub fn deploy_mod(paths: &DeployPaths, mod_entry: &Mod) -> Result<DeployReport> {
    run_mod(paths, mod_entry).map_err(|err| wrap(&mod_entry.id, err))
}

fn run_mod(paths: &DeployPaths, mod_entry: &Mod) -> Result<DeployReport> {
    let ops = plan_mod(paths, mod_entry)?;
    let mut report = DeployReport {
        mod_count: 1,
        ..DeployReport::default()
    };

    for op in ops {
        debug!(
            mod_id = %op.mod_id,
            kind = op.kind.label(),
            "copy {} -> {}",
            op.source.display(),
            op.dest.display()
        );
        report.bytes += fsutil::copy_file(&op.source, &op.dest)?;
        match op.kind {
            CopyKind::Download => report.download_count += 1,
            CopyKind::Override => report.override_count += 1,
        }
        report.copies.push(op);
    }

    Ok(report)
}

/// Deploys every mod in manifest order. Callers validate first.
pub fn deploy_all(paths: &DeployPaths, catalog: &Catalog) -> Result<DeployReport> {
    let mut report = DeployReport::default();
    for mod_entry in catalog.iter() {
        report.absorb(deploy_mod(paths, mod_entry)?);
    }
    info!(
        mods = report.mod_count,
        downloads = report.download_count,
        overrides = report.override_count,
        "deploy complete"
    );
    Ok(report)
}

/// Download entries are stored as `<id>/<file>`; the `<id>` component is
/// dropped so files land in `Downloads/<id>/<file>` rather than
/// `Downloads/<id>/<id>/<file>`.
fn download_tail(mod_id: &str, entry: &str) -> String {
    Path::new(entry)
        .strip_prefix(mod_id)
        .ok()
        .filter(|tail| !tail.as_os_str().is_empty())
        .map(|tail| tail.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string())
}

fn wrap(mod_id: &str, err: RegistryError) -> RegistryError {
    match err {
        RegistryError::Deploy { .. } => err,
        other => RegistryError::Deploy {
            mod_id: mod_id.to_string(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::OverrideFile,
        manifest::{RawModEntry, RawOverride},
    };
    use pretty_assertions::assert_eq;
    use std::fs;

    fn sample_mod() -> Mod {
        Mod {
            id: "skins".to_string(),
            name: "Skins".to_string(),
            description: None,
            image: None,
            download_files: vec![
                "skins/b001.bmp".to_string(),
                "skins/nested/b002.cmx".to_string(),
            ],
            override_files: vec![OverrideFile::new("skins/foo.iff", "GameData/foo.iff")],
        }
    }

    fn seed_cache(paths: &DeployPaths, files: &[&str]) {
        for file in files {
            let path = paths.cache_root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("contents of {file}")).unwrap();
        }
    }

    #[test]
    fn download_tail_strips_own_id_only() {
        assert_eq!(download_tail("skins", "skins/a.bmp"), "a.bmp");
        assert_eq!(download_tail("skins", "skins/x/a.bmp"), "x/a.bmp");
        assert_eq!(download_tail("skins", "other/a.bmp"), "other/a.bmp");
        assert_eq!(download_tail("skins", "skinsy/a.bmp"), "skinsy/a.bmp");
        assert_eq!(download_tail("skins", "skins"), "skins");
    }

    #[test]
    fn plan_maps_sources_to_both_layouts() {
        let paths = DeployPaths::for_game_root(Path::new("/game"));
        let ops = plan_mod(&paths, &sample_mod()).unwrap();
        let pairs: Vec<(CopyKind, PathBuf, PathBuf)> = ops
            .into_iter()
            .map(|op| (op.kind, op.source, op.dest))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    CopyKind::Download,
                    PathBuf::from("/game/mod_cache/skins/b001.bmp"),
                    PathBuf::from("/game/Downloads/skins/b001.bmp"),
                ),
                (
                    CopyKind::Download,
                    PathBuf::from("/game/mod_cache/skins/nested/b002.cmx"),
                    PathBuf::from("/game/Downloads/skins/nested/b002.cmx"),
                ),
                (
                    CopyKind::Override,
                    PathBuf::from("/game/mod_cache/skins/foo.iff"),
                    PathBuf::from("/game/GameData/foo.iff"),
                ),
            ]
        );
    }

    #[test]
    fn plan_rejects_targets_outside_game_root() {
        let paths = DeployPaths::for_game_root(Path::new("/game"));
        let mut entry = sample_mod();
        entry.override_files = vec![OverrideFile::new("skins/foo.iff", "../escape.iff")];
        assert!(matches!(
            plan_mod(&paths, &entry),
            Err(RegistryError::UnsafePath(_))
        ));
    }

    #[test]
    fn plan_rejects_ids_that_leave_downloads() {
        let paths = DeployPaths::for_game_root(Path::new("/game"));
        for id in [".", "..", "a/b"] {
            let mut entry = sample_mod();
            entry.id = id.to_string();
            assert!(
                matches!(plan_mod(&paths, &entry), Err(RegistryError::InvalidId { .. })),
                "{id:?} planned"
            );
        }
    }

    #[test]
    fn deploy_copies_files_and_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        seed_cache(
            &paths,
            &["skins/b001.bmp", "skins/nested/b002.cmx", "skins/foo.iff"],
        );

        let report = deploy_mod(&paths, &sample_mod()).unwrap();
        assert_eq!(report.download_count, 2);
        assert_eq!(report.override_count, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("Downloads/skins/nested/b002.cmx")).unwrap(),
            "contents of skins/nested/b002.cmx"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("GameData/foo.iff")).unwrap(),
            "contents of skins/foo.iff"
        );

        fs::write(dir.path().join("GameData/foo.iff"), "tampered").unwrap();
        let again = deploy_mod(&paths, &sample_mod()).unwrap();
        assert_eq!(again.file_count(), 3);
        assert_eq!(
            fs::read_to_string(dir.path().join("GameData/foo.iff")).unwrap(),
            "contents of skins/foo.iff"
        );
    }

    #[test]
    fn missing_source_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        seed_cache(&paths, &["skins/b001.bmp"]);

        let err = deploy_mod(&paths, &sample_mod()).unwrap_err();
        match &err {
            RegistryError::Deploy { mod_id, .. } => assert_eq!(mod_id, "skins"),
            other => panic!("unexpected error: {other}"),
        }
        let message = format!("{err}: {}", std::error::Error::source(&err).unwrap());
        assert!(message.contains("b002.cmx"));
        // no rollback of the copy that already happened
        assert!(dir.path().join("Downloads/skins/b001.bmp").exists());
    }

    #[test]
    fn deploy_all_counts_every_file_in_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        let catalog = Catalog::from_raw(vec![
            RawModEntry {
                id: "a".to_string(),
                name: None,
                description: None,
                image: None,
                downloads: vec!["a/one.bmp".to_string(), "a/two.bmp".to_string()],
                overrides: vec![RawOverride::new("a/x.iff", "GameData/x.iff")],
            },
            RawModEntry {
                id: "b".to_string(),
                name: None,
                description: None,
                image: None,
                downloads: Vec::new(),
                overrides: vec![RawOverride::new("b/y.iff", "GameData/Sub/y.iff")],
            },
        ])
        .catalog;
        seed_cache(&paths, &["a/one.bmp", "a/two.bmp", "a/x.iff", "b/y.iff"]);

        let report = deploy_all(&paths, &catalog).unwrap();
        assert_eq!(report.mod_count, 2);
        assert_eq!(report.copies.len(), 4);
        let order: Vec<&str> = report.copies.iter().map(|op| op.mod_id.as_str()).collect();
        assert_eq!(order, vec!["a", "a", "a", "b"]);
        assert_eq!(plan_all(&paths, &catalog).unwrap(), report.copies);
        assert!(dir.path().join("GameData/Sub/y.iff").exists());
    }
}
