//! Engine configuration and destination addressing
//!
//! This module provides the settings shared by every run (sandbox root,
//! staging location, compression level) and the parser that turns a
//! destination string into a local or sandboxed host directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::{sandbox_path, HOST_SCHEME};
use crate::{BackupError, Result};

/// Default sandbox root for `host://` destinations
pub const DEFAULT_HOST_ROOT: &str = "/tmp";

/// Default gzip compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

pub const ENV_HOST_ROOT: &str = "CLUSTERBACKUP_HOST_ROOT";
pub const ENV_STAGING_DIR: &str = "CLUSTERBACKUP_STAGING_DIR";
pub const ENV_COMPRESSION_LEVEL: &str = "CLUSTERBACKUP_COMPRESSION_LEVEL";

/// Settings shared by backup, restore and cleanup runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory every `host://` destination is re-rooted under
    pub host_root: PathBuf,
    /// Parent directory for temporary staging trees (system temp dir if unset)
    pub staging_dir: Option<PathBuf>,
    /// Gzip compression level, 0-9
    pub compression_level: u32,
}

impl EngineConfig {
    /// Configuration with a custom sandbox root and default everything else
    pub fn with_host_root<P: Into<PathBuf>>(host_root: P) -> Self {
        Self {
            host_root: host_root.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from `CLUSTERBACKUP_*` environment variables,
    /// falling back to defaults for unset ones
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let mut config = Self::default();
        if let Some(root) = lookup(ENV_HOST_ROOT).filter(|v| !v.trim().is_empty()) {
            config.host_root = PathBuf::from(root.trim());
        }
        if let Some(dir) = lookup(ENV_STAGING_DIR).filter(|v| !v.trim().is_empty()) {
            config.staging_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(level) = lookup(ENV_COMPRESSION_LEVEL).filter(|v| !v.trim().is_empty()) {
            config.compression_level = level.trim().parse().map_err(|_| {
                BackupError::validation(format!(
                    "{ENV_COMPRESSION_LEVEL} must be an integer between 0 and 9, got {level:?}"
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.host_root.is_absolute() {
            return Err(BackupError::validation(format!(
                "host root must be an absolute path, got {}",
                self.host_root.display()
            )));
        }
        if self.compression_level > 9 {
            return Err(BackupError::validation(format!(
                "compression level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_root: PathBuf::from(DEFAULT_HOST_ROOT),
            staging_dir: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// A parsed destination string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Literal filesystem directory
    Local(PathBuf),
    /// Path under the sandbox root, from a `host://` destination
    Host(String),
}

impl Destination {
    /// Parse a destination string
    ///
    /// Supports formats:
    /// - `host:///var/backups` for a sandboxed host directory
    /// - `/local/path` or `./relative/path` for a literal directory
    ///
    /// Other `scheme://` prefixes (such as `s3://`) are rejected.
    pub fn parse(destination: &str) -> Result<Self> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(BackupError::validation("destination must not be empty"));
        }
        if let Some(path) = destination.strip_prefix(HOST_SCHEME) {
            return Ok(Destination::Host(path.to_string()));
        }
        if let Some((scheme, _)) = destination.split_once("://") {
            return Err(BackupError::validation(format!(
                "unsupported destination scheme {scheme:?}; use a local path or {HOST_SCHEME}"
            )));
        }
        Ok(Destination::Local(PathBuf::from(destination)))
    }

    /// Concrete directory for this destination, sandboxing host paths under `host_root`
    pub fn resolve(&self, host_root: &Path) -> PathBuf {
        match self {
            Destination::Local(path) => path.clone(),
            Destination::Host(path) => sandbox_path(host_root, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.host_root, PathBuf::from("/tmp"));
        assert!(config.staging_dir.is_none());
        assert_eq!(config.compression_level, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_environment() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_HOST_ROOT, "/host-mounts"),
            (ENV_STAGING_DIR, "/var/tmp/staging"),
            (ENV_COMPRESSION_LEVEL, " 9 "),
        ]))
        .unwrap();

        assert_eq!(config.host_root, PathBuf::from("/host-mounts"));
        assert_eq!(config.staging_dir, Some(PathBuf::from("/var/tmp/staging")));
        assert_eq!(config.compression_level, 9);
    }

    #[test]
    fn test_invalid_environment_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_COMPRESSION_LEVEL, "max")])).unwrap_err();
        assert!(err.to_string().contains(ENV_COMPRESSION_LEVEL));

        assert!(EngineConfig::from_lookup(lookup(&[(ENV_COMPRESSION_LEVEL, "10")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[(ENV_HOST_ROOT, "relative/root")])).is_err());
    }

    #[test]
    fn test_parse_destinations() {
        assert_eq!(
            Destination::parse("host:///var/backups").unwrap(),
            Destination::Host("/var/backups".to_string())
        );
        assert_eq!(
            Destination::parse("/data/backups").unwrap(),
            Destination::Local(PathBuf::from("/data/backups"))
        );
        assert_eq!(
            Destination::parse("./relative").unwrap(),
            Destination::Local(PathBuf::from("./relative"))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_schemes() {
        for destination in ["", "   ", "s3://bucket/prefix", "gs://bucket"] {
            let err = Destination::parse(destination).unwrap_err();
            assert!(matches!(err, BackupError::Validation(_)), "{destination:?}");
        }
    }

    #[test]
    fn test_resolve_sandboxes_host_paths() {
        let root = Path::new("/tmp");
        assert_eq!(
            Destination::parse("host:///var/backups").unwrap().resolve(root),
            PathBuf::from("/tmp/var/backups")
        );
        assert_eq!(
            Destination::parse("host:///../etc").unwrap().resolve(root),
            Destination::parse("host:///etc").unwrap().resolve(root)
        );
        assert_eq!(
            Destination::parse("/srv/backups").unwrap().resolve(root),
            PathBuf::from("/srv/backups")
        );
    }
}
