//! Current working directory tracking.
//!
//! The shell session keeps its own notion of the working directory instead of
//! mutating the process-wide one, so `cd` only affects commands dispatched by
//! this session.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

#[derive(Clone, Default, Debug)]
pub struct CurrentDir {
    pub path: String,
}

impl CurrentDir {
    /// Capture the current working directory from the process.
    pub fn capture() -> Option<Self> {
        let path = env::current_dir().ok()?.to_string_lossy().to_string();
        Some(Self { path })
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Change to `target`, resolved against the current directory.
    ///
    /// `~` and `~/...` expand to the home directory. The target must exist and
    /// be a directory; the stored path is left untouched on error.
    pub fn change_to(&mut self, target: &str) -> Result<&str> {
        let expanded = shellexpand::tilde(target);
        let candidate = PathBuf::from(expanded.as_ref());
        let resolved = if candidate.is_absolute() {
            candidate
        } else {
            self.as_path().join(candidate)
        };

        let canonical = resolved
            .canonicalize()
            .with_context(|| format!("cd: {}: No such file or directory", target))?;
        if !canonical.is_dir() {
            bail!("cd: {}: Not a directory", target);
        }

        self.path = canonical.to_string_lossy().to_string();
        Ok(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_to_relative_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();
        let root = dir.path().canonicalize().unwrap();

        let mut cwd = CurrentDir::from_path(root.to_string_lossy().to_string());
        let new_path = cwd.change_to("child").unwrap().to_string();

        assert_eq!(PathBuf::from(new_path), root.join("child"));
    }

    #[test]
    fn test_change_to_missing_directory_keeps_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();

        let mut cwd = CurrentDir::from_path(root.clone());
        assert!(cwd.change_to("does-not-exist").is_err());
        assert_eq!(cwd.path, root);
    }

    #[test]
    fn test_change_to_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();

        let mut cwd = CurrentDir::from_path(dir.path().to_string_lossy().to_string());
        let err = cwd.change_to("file.txt").unwrap_err();
        assert!(err.to_string().contains("Not a directory"));
    }
}
