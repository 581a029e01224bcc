use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_DAEMON_PORT: u16 = 10590;
pub const DEFAULT_CONTAINER_PORT: &str = "8081";

/// Contents of `<home>/config.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AidConfig {
    /// Runtime client name: `docker` or `mock`.
    pub runtime: String,
    /// Docker-compatible CLI binary.
    pub docker_bin: String,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DaemonConfig {
    pub bind: String,
    pub port: u16,
    pub workers: usize,
    /// Host port used when a create request names none.
    pub default_container_port: String,
}

impl Default for AidConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_owned(),
            docker_bin: "docker".to_owned(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_owned(),
            port: DEFAULT_DAEMON_PORT,
            workers: 4,
            default_container_port: DEFAULT_CONTAINER_PORT.to_owned(),
        }
    }
}

impl AidConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or defaults if it does not exist. Environment overrides
    /// are applied on top.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
                .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env(std::env::var("AID_RUNTIME").ok());
        Ok(config)
    }

    pub fn apply_env(&mut self, runtime: Option<String>) {
        if let Some(runtime) = runtime.filter(|r| !r.trim().is_empty()) {
            self.runtime = runtime.trim().to_owned();
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.daemon.workers == 0 {
            return Err(CoreError::Config("daemon.workers must be at least 1".to_owned()));
        }
        if self.docker_bin.trim().is_empty() {
            return Err(CoreError::Config("docker_bin must not be empty".to_owned()));
        }
        crate::engine::validate_port(&self.daemon.default_container_port)
            .map_err(|e| CoreError::Config(format!("daemon.default_container_port: {e}")))?;
        Ok(())
    }
}

/// The aid home: `flag`, else `AID_HOME`, else `~/.aid`.
pub fn resolve_home(flag: Option<&Path>) -> PathBuf {
    resolve_home_from(
        flag,
        std::env::var_os("AID_HOME"),
        std::env::var_os("HOME"),
    )
}

fn resolve_home_from(
    flag: Option<&Path>,
    aid_home: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(flag) = flag {
        return flag.to_path_buf();
    }
    if let Some(dir) = aid_home.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    match home {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".aid"),
        _ => PathBuf::from(".aid"),
    }
}
