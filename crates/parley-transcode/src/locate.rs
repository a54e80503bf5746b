//! Finding the transcoder binary on the host.
//!
//! Services started by an init system often run with a minimal `PATH`, so
//! besides `PATH` the usual package-manager install directories are
//! searched as well.

use crate::error::TranscodeError;
use std::path::{Path, PathBuf};

/// Base name of the default transcoder.
pub const FFMPEG: &str = "ffmpeg";

/// Adds the platform executable suffix to `base`.
pub fn binary_name(base: &str) -> String {
    if cfg!(windows) && !base.ends_with(".exe") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// Install directories checked after `PATH`.
pub fn well_known_dirs() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\ffmpeg\bin"),
            PathBuf::from(r"C:\Program Files\ffmpeg\bin"),
        ]
    } else {
        vec![
            PathBuf::from("/usr/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/snap/bin"),
        ]
    }
}

/// Searches `PATH` for `name`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| find_in_dirs(name, std::env::split_paths(&paths)))
}

fn find_in_dirs(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    dirs.into_iter().find_map(|dir| {
        let full = dir.join(name);
        if full.is_file() {
            Some(full)
        } else {
            None
        }
    })
}

/// Resolves the transcoder binary.
///
/// An explicit path wins and must exist. Otherwise `PATH` is searched,
/// then [`well_known_dirs`].
pub fn locate_binary(explicit: Option<&Path>, base: &str) -> Result<PathBuf, TranscodeError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(TranscodeError::BinaryNotFound(path.display().to_string()));
    }

    let name = binary_name(base);
    if let Some(path) = find_in_path(&name) {
        tracing::debug!(path = %path.display(), "found transcoder in PATH");
        return Ok(path);
    }

    if let Some(path) = find_in_dirs(&name, well_known_dirs()) {
        tracing::debug!(path = %path.display(), "found transcoder in install directory");
        return Ok(path);
    }

    Err(TranscodeError::BinaryNotFound(name))
}
