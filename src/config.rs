use crate::fsutil;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;

pub const SETTINGS_FILE: &str = "settings.json";

/// User settings: where the game lives, when it was last played, and which
/// mods that session locked in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub game_path: Option<PathBuf>,
    #[serde(default)]
    pub last_played: Option<String>,
    #[serde(default)]
    pub locked_mods: Vec<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl Settings {
    pub fn default_path() -> Result<PathBuf> {
        Ok(base_data_dir()?.join(SETTINGS_FILE))
    }

    pub fn load_default() -> Result<Self> {
        Ok(Self::load(Self::default_path()?))
    }

    /// Reads settings from `path`. A missing or unreadable file yields empty
    /// settings bound to the same path.
    pub fn load(path: PathBuf) -> Self {
        if !path.exists() {
            return Self::empty(path);
        }

        let parsed = fs::read_to_string(&path)
            .context("read settings")
            .and_then(|raw| serde_json::from_str::<Settings>(&raw).context("parse settings"));
        match parsed {
            Ok(mut settings) => {
                settings.path = path;
                settings
            }
            Err(err) => {
                warn!(path = %path.display(), "settings ignored: {err:#}");
                Self::empty(path)
            }
        }
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn save(&self) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize settings")?;
        fsutil::write_atomic(&self.path, &raw).context("write settings")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn game_path(&self) -> Option<&Path> {
        self.game_path.as_deref()
    }

    pub fn set_game_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.game_path = Some(path.into());
        self.save()
    }

    pub fn last_played(&self) -> Option<&str> {
        self.last_played.as_deref()
    }

    pub fn set_last_played(&mut self, timestamp: impl Into<String>) -> Result<()> {
        self.last_played = Some(timestamp.into());
        self.save()
    }

    pub fn mark_played_now(&mut self) -> Result<()> {
        let stamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("format timestamp")?;
        self.set_last_played(stamp)
    }

    pub fn last_played_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(self.last_played.as_deref()?, &Rfc3339).ok()
    }

    /// Marks `ids` as deployed into a played game. Existing locks keep their
    /// order; new ones are appended once.
    pub fn lock_mods<I, S>(&mut self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            let id = id.as_ref();
            if !self.is_mod_locked(id) {
                self.locked_mods.push(id.to_string());
            }
        }
        self.save()
    }

    pub fn is_mod_locked(&self, id: &str) -> bool {
        self.locked_mods.iter().any(|locked| locked == id)
    }

    pub fn locked_mods(&self) -> &[String] {
        &self.locked_mods
    }

    /// Returns whether `id` was locked.
    pub fn unlock_mod(&mut self, id: &str) -> Result<bool> {
        let before = self.locked_mods.len();
        self.locked_mods.retain(|locked| locked != id);
        if before == self.locked_mods.len() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn clear_locks(&mut self) -> Result<usize> {
        let count = self.locked_mods.len();
        self.locked_mods.clear();
        self.save()?;
        Ok(count)
    }
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("ts1-modloader"))
}
