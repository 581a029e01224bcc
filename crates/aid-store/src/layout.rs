use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of an aid home.
///
/// ```text
/// <home>/config.toml
/// <home>/models/<vendor>/<package>/   package sources and generated artifacts
/// <home>/templates/                   optional template overrides
/// <home>/store/{images,containers,solvers,envs}/<uid>
/// <home>/store/logs/<hash>
/// <home>/store/locks/
/// ```
///
/// Subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    #[inline]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    #[inline]
    pub fn package_dir(&self, vendor: &str, package: &str) -> PathBuf {
        self.models_dir().join(vendor).join(package)
    }

    #[inline]
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    #[inline]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    #[inline]
    pub fn images_dir(&self) -> PathBuf {
        self.store_dir().join("images")
    }

    #[inline]
    pub fn containers_dir(&self) -> PathBuf {
        self.store_dir().join("containers")
    }

    #[inline]
    pub fn solvers_dir(&self) -> PathBuf {
        self.store_dir().join("solvers")
    }

    #[inline]
    pub fn envs_dir(&self) -> PathBuf {
        self.store_dir().join("envs")
    }

    #[inline]
    pub fn logs_dir(&self) -> PathBuf {
        self.store_dir().join("logs")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.store_dir().join("locks")
    }

    /// Lock file guarding one identifier, e.g. `container-4f1c2a9be0`.
    #[inline]
    pub fn lock_file(&self, key: &str) -> PathBuf {
        self.locks_dir().join(format!("{key}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.models_dir())?;
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.containers_dir())?;
        fs::create_dir_all(self.solvers_dir())?;
        fs::create_dir_all(self.envs_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        fs::create_dir_all(self.locks_dir())?;

        let version_path = self.store_dir().join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let store_dir = self.store_dir();
            let mut tmp = NamedTempFile::new_in(&store_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&store_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.store_dir().join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
