use crate::{
    catalog::{Catalog, LoadWarning, Mod},
    config::Settings,
    deploy::{self, CopyOp, DeployPaths, DeployReport},
    error::{IoContext, RegistryError, Result, ValidationError},
    lifecycle::{self, ModDraft},
    manifest::ManifestStore,
    validate::{self, Conflict},
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// The mods installed for one game directory.
#[derive(Debug)]
pub struct ModRegistry {
    paths: DeployPaths,
    store: ManifestStore,
    catalog: Catalog,
    warnings: Vec<LoadWarning>,
}

impl ModRegistry {
    /// Opens the registry for the configured game path, creating
    /// `mod_cache/manifest.json` on first use.
    pub fn open(settings: &Settings) -> Result<Self> {
        let game_root = settings.game_path().ok_or(RegistryError::GamePathUnset)?;
        Self::open_at(game_root)
    }

    pub fn open_at(game_root: &Path) -> Result<Self> {
        if !game_root.is_dir() {
            return Err(RegistryError::GamePathMissing(game_root.to_path_buf()));
        }
        let paths = DeployPaths::for_game_root(game_root);
        fs::create_dir_all(&paths.cache_root).io_context("create dir", &paths.cache_root)?;
        let store = ManifestStore::new(&paths.cache_root);

        let mut registry = Self {
            paths,
            store,
            catalog: Catalog::default(),
            warnings: Vec::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Rebuilds the catalog from disk, replacing any earlier load warnings.
    pub fn reload(&mut self) -> Result<()> {
        let outcome = Catalog::from_raw(self.store.load()?);
        self.catalog = outcome.catalog;
        self.warnings = outcome.warnings;
        info!(
            mods = self.catalog.len(),
            warnings = self.warnings.len(),
            "loaded mods from manifest"
        );
        Ok(())
    }

    pub fn game_root(&self) -> &Path {
        &self.paths.game_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.paths.cache_root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.paths.downloads_dir()
    }

    pub fn manifest_path(&self) -> &Path {
        self.store.path()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn mods(&self) -> impl Iterator<Item = &Mod> {
        self.catalog.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Mod> {
        self.catalog.get(id)
    }

    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate(&self.catalog, &self.warnings)
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        validate::scan_conflicts(&self.catalog)
    }

    pub fn plan_all(&self) -> Result<Vec<CopyOp>> {
        deploy::plan_all(&self.paths, &self.catalog)
    }

    pub fn deploy_mod(&self, id: &str) -> Result<DeployReport> {
        let mod_entry = self
            .catalog
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        deploy::deploy_mod(&self.paths, mod_entry)
    }

    /// Copies every mod into the game tree. Does not validate; see
    /// [`ModRegistry::validate_and_deploy`].
    pub fn deploy_all(&self) -> Result<DeployReport> {
        deploy::deploy_all(&self.paths, &self.catalog)
    }

    pub fn validate_and_deploy(&self) -> Result<DeployReport> {
        self.validate()?;
        self.deploy_all()
    }

    pub fn add(&mut self, draft: ModDraft) -> Result<()> {
        lifecycle::add_mod(&self.paths, &self.store, &mut self.catalog, draft)
    }

    /// Removes a mod unless `settings` has it locked.
    pub fn remove(&mut self, id: &str, settings: &Settings) -> Result<Mod> {
        lifecycle::remove_mod(&self.paths, &self.store, &mut self.catalog, id, settings)
    }

    pub fn orphaned_cache_dirs(&self) -> Result<Vec<PathBuf>> {
        lifecycle::orphaned_cache_dirs(&self.paths, &self.catalog)
    }

    pub fn prune_orphans(&self) -> Result<Vec<PathBuf>> {
        lifecycle::prune_orphans(&self.paths, &self.catalog)
    }
}
