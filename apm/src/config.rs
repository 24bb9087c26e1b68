// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Daemon and CLI configuration: a YAML file with environment overrides.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PATH: &str = "/etc/apm/config.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// TCP listen address of the HTTP surface
    pub address: String,
    /// Unix socket listener, used instead of TCP when set
    pub unix_socket: Option<PathBuf>,
    /// Shared API secret; empty means unauthenticated local use
    pub api_token: Option<String>,
    /// Active declarative image config
    pub image_file: PathBuf,
    /// Staged (pending) package intent
    pub staged_file: PathBuf,
    /// Prefix for privileged external commands, e.g. `sudo`
    pub command_prefix: Option<String>,
    /// Where generated build recipes land
    pub resource_dir: PathBuf,
    /// The single-file package/history store
    pub db_path: PathBuf,
    /// HTTP read timeout, seconds
    pub read_timeout: u64,
    /// HTTP write timeout, seconds
    pub write_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8081".to_owned(),
            unix_socket: None,
            api_token: None,
            image_file: PathBuf::from("/etc/apm/image.yml"),
            staged_file: PathBuf::from("/etc/apm/staged.yml"),
            command_prefix: None,
            resource_dir: PathBuf::from("/var/lib/apm"),
            db_path: PathBuf::from("/var/lib/apm/apm.db"),
            read_timeout: 30,
            write_timeout: 60,
        }
    }
}

impl Config {
    /// Load from the given path (or the default location), then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self, Error> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_PATH));

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(address) = std::env::var("APM_ADDRESS") {
            self.address = address;
        }
        if let Ok(socket) = std::env::var("APM_UNIX_SOCKET") {
            self.unix_socket = Some(PathBuf::from(socket));
        }
        if let Ok(token) = std::env::var("APM_API_TOKEN") {
            self.api_token = (!token.is_empty()).then_some(token);
        }
        if let Ok(image) = std::env::var("APM_IMAGE_FILE") {
            self.image_file = PathBuf::from(image);
        }
        if let Ok(staged) = std::env::var("APM_STAGED_FILE") {
            self.staged_file = PathBuf::from(staged);
        }
        if let Ok(prefix) = std::env::var("APM_COMMAND_PREFIX") {
            self.command_prefix = (!prefix.is_empty()).then_some(prefix);
        }
        if let Ok(dir) = std::env::var("APM_RESOURCE_DIR") {
            self.resource_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("APM_DB_PATH") {
            self.db_path = PathBuf::from(db);
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("yaml")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_missing_file_defaults() {
        let config = Config::load(Some(PathBuf::from("/nonexistent/apm.yml"))).unwrap();
        assert_eq!(config.address, "127.0.0.1:8081");
        assert_eq!(config.read_timeout, 30);
        assert_eq!(config.write_timeout, 60);
    }

    #[test]
    fn load_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "address: 0.0.0.0:9000\napiToken: manage-secret\nimageFile: /tmp/image.yml\n",
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.address, "0.0.0.0:9000");
        assert_eq!(config.api_token.as_deref(), Some("manage-secret"));
        assert_eq!(config.image_file, PathBuf::from("/tmp/image.yml"));
        // untouched keys keep their defaults
        assert_eq!(config.db_path, PathBuf::from("/var/lib/apm/apm.db"));
    }
}
