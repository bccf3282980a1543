//! Central path resolution for hostbridge data files.
//!
//! Resolved once at startup from: CLI `--data-dir` (or `HOSTBRIDGE_DATA_DIR`,
//! which clap folds into the same flag) > `~/.hostbridge`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

const DEFAULT_DIR_NAME: &str = ".hostbridge";

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Resolve the data directory. Fails only when no explicit directory was
    /// given and the home directory cannot be determined.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => dirs::home_dir()
                .context("home directory not found; pass --data-dir")?
                .join(DEFAULT_DIR_NAME),
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("storage.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn secure_key_path(&self) -> PathBuf {
        self.root.join("secure-value.key")
    }

    pub fn secure_value_path(&self) -> PathBuf {
        self.root.join("secure-value.bin")
    }

    /// Create the data directory and its subdirectories.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        std::fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let paths = DataPaths::resolve(Some(Path::new("/srv/hostbridge"))).unwrap();
        assert_eq!(paths.root(), Path::new("/srv/hostbridge"));
        assert_eq!(paths.db_path(), Path::new("/srv/hostbridge/storage.db"));
        assert_eq!(
            paths.secure_value_path(),
            Path::new("/srv/hostbridge/secure-value.bin")
        );
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(&tmp.path().join("data"))).unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.log_dir().is_dir());
        assert!(paths.downloads_dir().is_dir());
    }
}
