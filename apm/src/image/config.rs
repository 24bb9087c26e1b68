// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The declarative image configuration and its on-disk store.
//!
//! The active config is the source of truth for what the host image should
//! contain. Composed (`include`) configs are resolved at build time only;
//! saving a composed document is rejected so includes stay authoritative.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// One build step of the image configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
pub enum Module {
    Packages {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        install: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        remove: Vec<String>,
    },
    Shell {
        commands: String,
    },
    Include {
        #[serde(rename = "ref")]
        reference: String,
    },
}

/// Declarative description of the host image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Module>,
}

impl ImageConfig {
    /// A fresh config tracking the given base image
    pub fn default_for(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            modules: vec![],
        }
    }

    /// Base image must be set before the config can be activated
    pub fn check_image(&self) -> Result<(), Error> {
        if self.image.trim().is_empty() {
            Err(Error::MissingBaseImage)
        } else {
            Ok(())
        }
    }

    pub fn has_includes(&self) -> bool {
        self.modules
            .iter()
            .any(|module| matches!(module, Module::Include { .. }))
    }

    /// Whether any module contributes build instructions beyond the base
    pub fn has_build_steps(&self) -> bool {
        self.modules.iter().any(|module| match module {
            Module::Packages { install, remove } => !install.is_empty() || !remove.is_empty(),
            Module::Shell { .. } | Module::Include { .. } => true,
        })
    }

    /// First packages module, created on demand
    fn packages_module(&mut self) -> (&mut Vec<String>, &mut Vec<String>) {
        let position = self
            .modules
            .iter()
            .position(|module| matches!(module, Module::Packages { .. }));

        let index = match position {
            Some(index) => index,
            None => {
                self.modules.push(Module::Packages {
                    install: vec![],
                    remove: vec![],
                });
                self.modules.len() - 1
            }
        };

        match &mut self.modules[index] {
            Module::Packages { install, remove } => (install, remove),
            _ => unreachable!("position matched a packages module"),
        }
    }

    /// Mark a package for installation. If the name sits in the remove set
    /// it moves; re-adding is a no-op.
    pub fn add_install_package(&mut self, name: &str) {
        let (install, remove) = self.packages_module();
        remove.retain(|existing| existing != name);
        if !install.iter().any(|existing| existing == name) {
            install.push(name.to_owned());
        }
    }

    /// Mark a package for removal, the mirror image of
    /// [`Self::add_install_package`].
    pub fn add_remove_package(&mut self, name: &str) {
        let (install, remove) = self.packages_module();
        install.retain(|existing| existing != name);
        if !remove.iter().any(|existing| existing == name) {
            remove.push(name.to_owned());
        }
    }

    /// Install/remove sets of a single packages module never overlap
    pub fn check_disjoint(&self) -> Result<(), Error> {
        for module in &self.modules {
            if let Module::Packages { install, remove } = module {
                let install: HashSet<_> = install.iter().collect();
                if let Some(name) = remove.iter().find(|name| install.contains(name)) {
                    return Err(Error::InstallRemoveOverlap((*name).clone()));
                }
            }
        }
        Ok(())
    }
}

/// Mutex-guarded YAML store for the active configuration
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

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the config. A missing file yields `None`; the caller decides
    /// whether to generate a default.
    pub async fn load(&self) -> Result<Option<ImageConfig>, Error> {
        let _guard = self.lock.lock().await;

        match fs_err::tokio::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(serde_yaml::from_str(&text)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Persist the config. Composed configs and configs violating module
    /// invariants are rejected.
    pub async fn save(&self, config: &ImageConfig) -> Result<(), Error> {
        if config.has_includes() {
            return Err(Error::SaveComposed);
        }
        config.check_image()?;
        config.check_disjoint()?;

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        let text = serde_yaml::to_string(config)?;
        fs_err::tokio::write(&self.path, text).await?;

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("image configuration has no base image")]
    MissingBaseImage,
    #[error("refusing to save a composed configuration, includes are the source of truth")]
    SaveComposed,
    #[error("package {0} listed for both install and remove")]
    InstallRemoveOverlap(String),
    #[error("include cycle via {0}")]
    IncludeCycle(String),
    #[error("unresolved include {0}")]
    UnresolvedInclude(String),
    #[error("yaml")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("image.yml"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let (_dir, store) = store();

        let mut config = ImageConfig::default_for("registry.altlinux.org/sisyphus/base:latest");
        config.add_install_package("curl");
        config.modules.push(Module::Shell {
            commands: "echo done".into(),
        });

        store.save(&config).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let (_dir, store) = store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn composed_config_rejected() {
        let (_dir, store) = store();

        let config = ImageConfig {
            image: "base:latest".into(),
            modules: vec![Module::Include {
                reference: "extra.yml".into(),
            }],
        };

        assert!(matches!(
            store.save(&config).await,
            Err(Error::SaveComposed)
        ));
    }

    #[tokio::test]
    async fn empty_base_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.save(&ImageConfig::default()).await,
            Err(Error::MissingBaseImage)
        ));
    }

    #[test]
    fn install_remove_moves() {
        let mut config = ImageConfig::default_for("base");

        config.add_remove_package("nano");
        config.add_install_package("nano");

        let Module::Packages { install, remove } = &config.modules[0] else {
            panic!("expected packages module");
        };
        assert_eq!(install, &vec!["nano".to_owned()]);
        assert!(remove.is_empty());

        config.add_remove_package("nano");
        let Module::Packages { install, remove } = &config.modules[0] else {
            panic!("expected packages module");
        };
        assert!(install.is_empty());
        assert_eq!(remove, &vec!["nano".to_owned()]);

        // duplicates are no-ops
        config.add_remove_package("nano");
        let Module::Packages { remove, .. } = &config.modules[0] else {
            panic!("expected packages module");
        };
        assert_eq!(remove.len(), 1);
    }

    #[test]
    fn yaml_shape() {
        let mut config = ImageConfig::default_for("base:latest");
        config.add_install_package("curl");

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("image: base:latest"));
        assert!(yaml.contains("type: packages"));
        assert!(yaml.contains("body:"));
        assert!(yaml.contains("- curl"));
    }
}
