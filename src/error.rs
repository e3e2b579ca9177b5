use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("game path is not configured")]
    GamePathUnset,

    #[error("game path is not a directory: {}", .0.display())]
    GamePathMissing(PathBuf),

    #[error("mod not found: {0}")]
    NotFound(String),

    #[error("mod with id '{0}' already exists")]
    AlreadyExists(String),

    #[error("mod '{0}' is locked by a played game and cannot be removed")]
    Locked(String),

    #[error("invalid mod id '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("path escapes its root: {0}")]
    UnsafePath(String),

    #[error("mod '{id}' stages two files as '{file_name}'")]
    DuplicateFile { id: String, file_name: String },

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("deploy {mod_id}: {source}")]
    Deploy {
        mod_id: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RegistryError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        RegistryError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Reasons a catalog is not safe to deploy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate mod id in manifest: {0}")]
    DuplicateId(String),

    #[error("unusable mod id in manifest '{id}': {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("conflict detected: {target} is overridden by multiple mods ({first_mod}, {second_mod})")]
    Conflict {
        target: String,
        first_mod: String,
        second_mod: String,
    },
}

pub(crate) trait IoContext<T> {
    fn io_context(self, action: &'static str, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, action: &'static str, path: &std::path::Path) -> Result<T> {
        self.map_err(|source| RegistryError::io(action, path, source))
    }
}
