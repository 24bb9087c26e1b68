// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Pending install/remove intent accumulated between package operations
//! and `image apply`. On an atomic host a package mutation lands here
//! first; nothing touches the booted system until apply commits.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedPackages {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedConfig {
    #[serde(default)]
    pub packages: StagedPackages,
}

impl StagedConfig {
    pub fn is_empty(&self) -> bool {
        self.packages.install.is_empty() && self.packages.remove.is_empty()
    }

    /// Stage a name for installation, withdrawing any pending removal
    pub fn add_install(&mut self, name: &str) {
        self.packages.remove.retain(|existing| existing != name);
        if !self.packages.install.iter().any(|existing| existing == name) {
            self.packages.install.push(name.to_owned());
        }
    }

    /// Stage a name for removal, withdrawing any pending install
    pub fn add_remove(&mut self, name: &str) {
        self.packages.install.retain(|existing| existing != name);
        if !self.packages.remove.iter().any(|existing| existing == name) {
            self.packages.remove.push(name.to_owned());
        }
    }
}

/// Mutex-guarded YAML store for the staged file
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load pending intent; a missing file is an empty document
    pub async fn load(&self) -> Result<StagedConfig, Error> {
        let _guard = self.lock.lock().await;

        match fs_err::tokio::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(StagedConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, staged: &StagedConfig) -> Result<(), Error> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        fs_err::tokio::write(&self.path, serde_yaml::to_string(staged)?).await?;

        Ok(())
    }

    /// Drop the staged file after a successful apply. Already absent is fine.
    pub async fn reset(&self) -> Result<(), Error> {
        let _guard = self.lock.lock().await;

        match fs_err::tokio::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
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

    #[tokio::test]
    async fn accumulate_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("staged.yml"));

        let mut staged = store.load().await.unwrap();
        assert!(staged.is_empty());

        staged.add_install("curl");
        staged.add_remove("nano");
        store.save(&staged).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.packages.install, vec!["curl"]);
        assert_eq!(loaded.packages.remove, vec!["nano"]);

        store.reset().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        // double reset is fine
        store.reset().await.unwrap();
    }

    #[test]
    fn install_withdraws_pending_remove() {
        let mut staged = StagedConfig::default();
        staged.add_remove("curl");
        staged.add_install("curl");
        assert_eq!(staged.packages.install, vec!["curl"]);
        assert!(staged.packages.remove.is_empty());
    }
}
