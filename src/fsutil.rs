use crate::error::{IoContext, RegistryError, Result};
use filetime::{set_file_mtime, FileTime};
use std::{
    ffi::OsString,
    fs,
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Writes `contents` next to `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| RegistryError::UnsafePath(path.display().to_string()))?;
    fs::create_dir_all(parent).io_context("create dir", parent)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| RegistryError::UnsafePath(path.display().to_string()))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if temp_path.exists() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }
    fs::write(&temp_path, contents).io_context("write", &temp_path)?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(RegistryError::io("replace", path, err));
    }
    Ok(())
}

/// Copies one file, creating parent directories. Permissions come along with
/// `fs::copy`; the modification time is restored afterwards.
pub(crate) fn copy_file(source: &Path, dest: &Path) -> Result<u64> {
    if !source.is_file() {
        return Err(RegistryError::io(
            "copy",
            source,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source file missing"),
        ));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).io_context("create dir", parent)?;
    }
    let bytes = fs::copy(source, dest).io_context("copy", source)?;
    preserve_mtime(source, dest);
    Ok(bytes)
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = set_file_mtime(dest, mtime);
}

/// Joins a manifest-relative path onto `root`, refusing anything that would
/// land outside it.
pub(crate) fn join_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if relative.trim().is_empty() || !is_contained(rel) {
        return Err(RegistryError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(rel))
}

fn is_contained(rel: &Path) -> bool {
    rel.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// The `/`-joined normal components of a relative path. `./a//b` and `a/b`
/// share a key because they resolve to the same file under any root.
pub(crate) fn normalized_key(relative: &str) -> String {
    Path::new(relative)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn is_relative_file_name(name: &str) -> bool {
    !name.trim().is_empty() && is_contained(Path::new(name))
}
