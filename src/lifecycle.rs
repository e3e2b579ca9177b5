use crate::{
    catalog::{Catalog, Mod, OverrideFile},
    config::Settings,
    deploy::DeployPaths,
    error::{IoContext, RegistryError, Result},
    fsutil,
    manifest::{ManifestStore, MANIFEST_FILE},
};
use std::{
    collections::HashSet,
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::{info, warn};
use walkdir::WalkDir;

/// A local file picked for a new mod, and the name it gets in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    pub file_name: String,
}

impl StagedFile {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { source, file_name }
    }

    pub fn named(source: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            file_name: file_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedOverride {
    pub file: StagedFile,
    /// Path relative to the game root.
    pub target: String,
}

/// Everything needed to add a mod, collected before anything touches disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModDraft {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<StagedFile>,
    pub downloads: Vec<StagedFile>,
    pub overrides: Vec<StagedOverride>,
}

impl ModDraft {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn image(mut self, source: impl Into<PathBuf>) -> Self {
        self.image = Some(StagedFile::new(source));
        self
    }

    pub fn download(mut self, source: impl Into<PathBuf>) -> Self {
        self.downloads.push(StagedFile::new(source));
        self
    }

    pub fn download_as(mut self, source: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        self.downloads.push(StagedFile::named(source, file_name));
        self
    }

    /// Stages every file below `dir`, keeping its path relative to `dir`.
    pub fn download_dir(mut self, dir: &Path) -> Result<Self> {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(dir).to_path_buf();
                RegistryError::io("walk", path, err.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| RegistryError::UnsafePath(entry.path().display().to_string()))?;
            found.push(StagedFile::named(entry.path(), slash_path(rel)));
        }
        self.downloads.extend(found);
        Ok(self)
    }

    pub fn override_file(mut self, source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        self.overrides.push(StagedOverride {
            file: StagedFile::new(source),
            target: target.into(),
        });
        self
    }

    pub fn override_as(
        mut self,
        source: impl Into<PathBuf>,
        file_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.overrides.push(StagedOverride {
            file: StagedFile::named(source, file_name),
            target: target.into(),
        });
        self
    }

    fn staged_files(&self) -> impl Iterator<Item = &StagedFile> {
        self.image
            .iter()
            .chain(self.downloads.iter())
            .chain(self.overrides.iter().map(|item| &item.file))
    }
}

/// Removes the new cache directory unless the add completes.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

pub fn check_mod_id(id: &str) -> Result<()> {
    match id_problem(id) {
        Some(reason) => Err(RegistryError::InvalidId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Why `id` cannot name a directory under `mod_cache/`, if it can't.
pub(crate) fn id_problem(id: &str) -> Option<&'static str> {
    if id.trim().is_empty() {
        return Some("empty");
    }
    if id != id.trim() {
        return Some("leading or trailing whitespace");
    }
    if id.contains(['/', '\\']) {
        return Some("contains a path separator");
    }
    let mut components = Path::new(id).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Some("not a plain directory name");
    }
    if id.eq_ignore_ascii_case(MANIFEST_FILE) {
        return Some("reserved name");
    }
    None
}

fn check_draft(draft: &ModDraft, catalog: &Catalog) -> Result<()> {
    check_mod_id(&draft.id)?;
    if catalog.contains(&draft.id) {
        return Err(RegistryError::AlreadyExists(draft.id.clone()));
    }
    let mut seen = HashSet::new();
    for staged in draft.staged_files() {
        if !fsutil::is_relative_file_name(&staged.file_name) {
            return Err(RegistryError::UnsafePath(staged.file_name.clone()));
        }
        if !seen.insert(fsutil::normalized_key(&staged.file_name)) {
            return Err(RegistryError::DuplicateFile {
                id: draft.id.clone(),
                file_name: staged.file_name.clone(),
            });
        }
    }
    for item in &draft.overrides {
        if !fsutil::is_relative_file_name(&item.target) {
            return Err(RegistryError::UnsafePath(item.target.clone()));
        }
    }
    Ok(())
}

/// Copies the draft's files into `cache_root/<id>/`, appends the mod and
/// rewrites the manifest. Nothing is left behind when it fails.
pub(crate) fn add_mod(
    paths: &DeployPaths,
    store: &ManifestStore,
    catalog: &mut Catalog,
    draft: ModDraft,
) -> Result<()> {
    check_draft(&draft, catalog)?;

    let mod_dir = paths.cache_root.join(&draft.id);
    fs::create_dir_all(&mod_dir).io_context("create mod cache dir", &mod_dir)?;
    let mut guard = StagingGuard::new(mod_dir.clone());

    let stage = |staged: &StagedFile| -> Result<String> {
        fsutil::copy_file(&staged.source, &mod_dir.join(&staged.file_name))?;
        Ok(format!("{}/{}", draft.id, staged.file_name))
    };

    let mut download_files = Vec::with_capacity(draft.downloads.len());
    for staged in &draft.downloads {
        download_files.push(stage(staged)?);
    }
    let mut override_files = Vec::with_capacity(draft.overrides.len());
    for item in &draft.overrides {
        override_files.push(OverrideFile::new(stage(&item.file)?, &item.target));
    }
    let image = match &draft.image {
        Some(staged) => {
            stage(staged)?;
            Some(staged.file_name.clone())
        }
        None => None,
    };

    let mod_entry = Mod {
        name: draft.name.clone().unwrap_or_else(|| draft.id.clone()),
        id: draft.id.clone(),
        description: draft.description.clone(),
        image,
        download_files,
        override_files,
    };
    let file_count = mod_entry.file_count();
    catalog.push(mod_entry);
    if let Err(err) = store.save(&catalog.to_raw()) {
        catalog.remove(&draft.id);
        return Err(err);
    }

    guard.disarm();
    info!(id = %draft.id, files = file_count, "added mod");
    Ok(())
}

/// Deletes a mod's cached files and its catalog entry. Files already deployed
/// into the game tree are not touched.
pub(crate) fn remove_mod(
    paths: &DeployPaths,
    store: &ManifestStore,
    catalog: &mut Catalog,
    id: &str,
    settings: &Settings,
) -> Result<Mod> {
    let slot = catalog
        .position(id)
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
    if settings.is_mod_locked(id) {
        return Err(RegistryError::Locked(id.to_string()));
    }
    // an id that is not a plain directory name owns no cache dir
    let mod_dir = match id_problem(id) {
        None => Some(paths.cache_root.join(id)),
        Some(reason) => {
            warn!(id = ?id, reason, "unusable id, leaving the cache untouched");
            None
        }
    };

    let removed = catalog
        .remove(id)
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
    if let Err(err) = store.save(&catalog.to_raw()) {
        catalog.insert(slot, removed);
        return Err(err);
    }

    if let Some(mod_dir) = mod_dir.filter(|dir| dir.is_dir()) {
        if let Err(err) = fs::remove_dir_all(&mod_dir) {
            warn!(id, "cache dir left behind: {err}");
            return Err(RegistryError::io("remove mod cache dir", mod_dir, err));
        }
    }
    info!(id, "removed mod");
    Ok(removed)
}

/// Cache subdirectories that no catalog entry owns.
pub(crate) fn orphaned_cache_dirs(paths: &DeployPaths, catalog: &Catalog) -> Result<Vec<PathBuf>> {
    if !paths.cache_root.exists() {
        return Ok(Vec::new());
    }
    let mut orphans = Vec::new();
    for entry in fs::read_dir(&paths.cache_root).io_context("read dir", &paths.cache_root)? {
        let entry = entry.io_context("read dir", &paths.cache_root)?;
        let is_dir = entry
            .file_type()
            .io_context("stat", &entry.path())?
            .is_dir();
        if !is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !catalog.contains(&name) {
            orphans.push(entry.path());
        }
    }
    orphans.sort();
    Ok(orphans)
}

pub(crate) fn prune_orphans(paths: &DeployPaths, catalog: &Catalog) -> Result<Vec<PathBuf>> {
    let orphans = orphaned_cache_dirs(paths, catalog)?;
    for dir in &orphans {
        fs::remove_dir_all(dir).io_context("remove orphaned cache dir", dir)?;
        info!(path = %dir.display(), "pruned orphaned cache dir");
    }
    Ok(orphans)
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mod_ids_must_be_plain_directory_names() {
        assert!(check_mod_id("hair-pack_01").is_ok());
        for bad in ["", "  ", " pad", "a/b", "a\\b", ".", "..", "manifest.json"] {
            assert!(
                matches!(check_mod_id(bad), Err(RegistryError::InvalidId { .. })),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn draft_builder_derives_file_names() {
        let draft = ModDraft::new("m")
            .name("Mod")
            .download("/tmp/picked/skin.bmp")
            .override_file("/tmp/picked/foo.iff", "GameData/foo.iff")
            .image("/tmp/picked/cover.png");
        assert_eq!(draft.downloads[0].file_name, "skin.bmp");
        assert_eq!(draft.overrides[0].file.file_name, "foo.iff");
        assert_eq!(draft.image.as_ref().unwrap().file_name, "cover.png");
        assert_eq!(draft.staged_files().count(), 3);
    }

    #[test]
    fn download_dir_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Skins/Heads")).unwrap();
        fs::write(dir.path().join("Skins/Heads/c001.bmp"), "h").unwrap();
        fs::write(dir.path().join("readme.txt"), "r").unwrap();

        let draft = ModDraft::new("m").download_dir(dir.path()).unwrap();
        let names: Vec<&str> = draft
            .downloads
            .iter()
            .map(|staged| staged.file_name.as_str())
            .collect();
        assert_eq!(names, vec!["Skins/Heads/c001.bmp", "readme.txt"]);
    }

    #[test]
    fn unsafe_names_are_rejected_before_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        let store = ManifestStore::new(&paths.cache_root);
        let mut catalog = Catalog::default();

        let draft = ModDraft::new("m").override_as("/nowhere", "x.iff", "../../etc/x");
        let err = add_mod(&paths, &store, &mut catalog, draft).unwrap_err();
        assert!(matches!(err, RegistryError::UnsafePath(_)));
        assert!(!paths.cache_root.join("m").exists());
        assert!(!store.path().exists());
    }

    #[test]
    fn failed_copy_leaves_no_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        let store = ManifestStore::new(&paths.cache_root);
        let mut catalog = Catalog::default();
        let good = dir.path().join("good.bmp");
        fs::write(&good, "ok").unwrap();

        let draft = ModDraft::new("m")
            .download(&good)
            .download(dir.path().join("missing.bmp"));
        assert!(add_mod(&paths, &store, &mut catalog, draft).is_err());
        assert!(!paths.cache_root.join("m").exists());
        assert!(catalog.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn orphans_are_listed_and_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        fs::create_dir_all(paths.cache_root.join("ghost")).unwrap();
        let store = ManifestStore::new(&paths.cache_root);
        store.load().unwrap();
        let catalog = Catalog::default();

        let orphans = orphaned_cache_dirs(&paths, &catalog).unwrap();
        assert_eq!(orphans, vec![paths.cache_root.join("ghost")]);
        assert_eq!(prune_orphans(&paths, &catalog).unwrap().len(), 1);
        assert!(orphaned_cache_dirs(&paths, &catalog).unwrap().is_empty());
        assert!(store.path().exists());
    }

    #[test]
    fn colliding_staged_names_are_rejected_before_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        let store = ManifestStore::new(&paths.cache_root);
        let mut catalog = Catalog::default();
        for folder in ["one", "two"] {
            fs::create_dir_all(dir.path().join(folder)).unwrap();
            fs::write(dir.path().join(folder).join("readme.txt"), folder).unwrap();
        }

        let draft = ModDraft::new("m")
            .download(dir.path().join("one/readme.txt"))
            .download(dir.path().join("two/readme.txt"));
        let err = add_mod(&paths, &store, &mut catalog, draft).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateFile { ref file_name, .. } if file_name == "readme.txt"
        ));
        assert!(!paths.cache_root.join("m").exists());

        let draft = ModDraft::new("m")
            .download_as(dir.path().join("one/readme.txt"), "docs/readme.txt")
            .override_as(dir.path().join("two/readme.txt"), "docs//readme.txt", "readme.txt");
        assert!(matches!(
            add_mod(&paths, &store, &mut catalog, draft),
            Err(RegistryError::DuplicateFile { .. })
        ));
        assert!(catalog.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn removing_an_unusable_id_never_touches_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DeployPaths::for_game_root(dir.path());
        let store = ManifestStore::new(&paths.cache_root);
        fs::create_dir_all(paths.cache_root.join("keep")).unwrap();
        fs::write(paths.cache_root.join("keep/a.bmp"), "a").unwrap();
        fs::write(
            store.path(),
            r#"{"mods":[{"id":"keep","downloads":["keep/a.bmp"]},{"id":"."}]}"#,
        )
        .unwrap();
        let mut catalog = Catalog::from_raw(store.load().unwrap()).catalog;
        let settings = Settings::default();

        let removed = remove_mod(&paths, &store, &mut catalog, ".", &settings).unwrap();
        assert_eq!(removed.id, ".");
        assert!(paths.cache_root.join("keep/a.bmp").is_file());
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["keep"]);
        let reloaded = Catalog::from_raw(store.load().unwrap()).catalog;
        assert_eq!(reloaded, catalog);
    }
}
