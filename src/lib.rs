//! Mod registry for The Sims 1: tracks which cached files belong to which
//! mod, rejects override collisions, and copies mods into the game tree.

pub mod catalog;
pub mod config;
pub mod deploy;
pub mod error;
mod fsutil;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod validate;

pub use catalog::{Catalog, LoadOutcome, LoadWarning, Mod, OverrideFile};
pub use config::Settings;
pub use deploy::{CopyKind, CopyOp, DeployPaths, DeployReport};
pub use error::{RegistryError, Result, ValidationError};
pub use lifecycle::{ModDraft, StagedFile, StagedOverride};
pub use manifest::{ManifestStore, RawModEntry, RawOverride};
pub use registry::ModRegistry;
pub use validate::Conflict;
