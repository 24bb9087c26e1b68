// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory backend used by tests and dry development hosts. Mirrors the
//! apt capability surface over a synthetic catalogue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BackendError, Simulation};
use crate::package::{Changes, Package};

/// A recorded mutation, for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Update,
    Commit {
        install: Vec<String>,
        remove: Vec<String>,
        purge: bool,
        autoremove: bool,
    },
    Reinstall(Vec<String>),
    DistUpgrade,
}

#[derive(Debug, Clone, Default)]
pub struct Mock {
    catalogue: Arc<Mutex<Vec<Package>>>,
    installed: Arc<Mutex<HashMap<String, String>>>,
    upgradable: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    fail_next: Arc<Mutex<Option<BackendError>>>,
}

impl Mock {
    pub fn with_catalogue(packages: Vec<Package>) -> Self {
        let mock = Self::default();
        *mock.catalogue.lock().expect("mock lock") = packages;
        mock
    }

    pub fn mark_installed(&self, name: &str, version: &str) {
        self.installed
            .lock()
            .expect("mock lock")
            .insert(name.to_owned(), version.to_owned());
    }

    pub fn mark_upgradable(&self, name: &str) {
        self.upgradable.lock().expect("mock lock").push(name.to_owned());
    }

    /// Arrange for the next mutation to fail
    pub fn fail_next(&self, error: BackendError) {
        *self.fail_next.lock().expect("mock lock") = Some(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("mock lock").clone()
    }

    fn take_failure(&self) -> Result<(), BackendError> {
        match self.fail_next.lock().expect("mock lock").take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn version_of(&self, name: &str) -> String {
        self.catalogue
            .lock()
            .expect("mock lock")
            .iter()
            .find(|package| package.name == name)
            .map(|package| package.version.clone())
            .unwrap_or_else(|| "1.0".to_owned())
    }

    pub fn update(&self) -> Result<Vec<Package>, BackendError> {
        self.take_failure()?;
        self.calls.lock().expect("mock lock").push(Call::Update);
        Ok(self.catalogue.lock().expect("mock lock").clone())
    }

    pub fn simulate(&self, install: &[String], remove: &[String]) -> Result<Simulation, BackendError> {
        let installed = self.installed.lock().expect("mock lock");

        let mut changes = Changes::default();
        for name in install {
            if !installed.contains_key(name) {
                changes.new_installed_packages.push(name.clone());
            }
        }
        for name in remove {
            if installed.contains_key(name) {
                changes.removed_packages.push(name.clone());
            }
        }
        changes.newly_installed_count = changes.new_installed_packages.len();
        changes.removed_count = changes.removed_packages.len();

        Ok(Simulation { changes })
    }

    pub fn simulate_reinstall(&self, packages: &[String]) -> Result<Simulation, BackendError> {
        let installed = self.installed.lock().expect("mock lock");

        let mut changes = Changes::default();
        changes.upgraded_packages = packages
            .iter()
            .filter(|name| installed.contains_key(*name))
            .cloned()
            .collect();
        changes.upgraded_count = changes.upgraded_packages.len();

        Ok(Simulation { changes })
    }

    pub fn simulate_dist_upgrade(&self) -> Result<Simulation, BackendError> {
        let upgradable = self.upgradable.lock().expect("mock lock");

        let mut changes = Changes::default();
        changes.upgraded_packages = upgradable.clone();
        changes.upgraded_count = upgradable.len();

        Ok(Simulation { changes })
    }

    pub fn simulate_autoremove(&self) -> Result<Simulation, BackendError> {
        Ok(Simulation::default())
    }

    pub fn commit(
        &self,
        install: &[String],
        remove: &[String],
        purge: bool,
        autoremove: bool,
    ) -> Result<(), BackendError> {
        self.take_failure()?;

        self.calls.lock().expect("mock lock").push(Call::Commit {
            install: install.to_vec(),
            remove: remove.to_vec(),
            purge,
            autoremove,
        });

        let versions: Vec<(String, String)> = install
            .iter()
            .map(|name| (name.clone(), self.version_of(name)))
            .collect();

        let mut installed = self.installed.lock().expect("mock lock");
        for (name, version) in versions {
            installed.insert(name, version);
        }
        for name in remove {
            installed.remove(name);
        }

        Ok(())
    }

    pub fn reinstall(&self, packages: &[String]) -> Result<(), BackendError> {
        self.take_failure()?;
        self.calls
            .lock()
            .expect("mock lock")
            .push(Call::Reinstall(packages.to_vec()));
        Ok(())
    }

    pub fn dist_upgrade(&self) -> Result<(), BackendError> {
        self.take_failure()?;
        self.calls.lock().expect("mock lock").push(Call::DistUpgrade);
        self.upgradable.lock().expect("mock lock").clear();
        Ok(())
    }

    pub fn installed(&self) -> Result<HashMap<String, String>, BackendError> {
        Ok(self.installed.lock().expect("mock lock").clone())
    }
}
