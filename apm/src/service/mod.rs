// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Uniform front to the native package tool.
//!
//! All mutations acquire a process-wide lock: at most one native package
//! transaction runs at a time, whichever transport initiated it. Read-only
//! mirror queries bypass the lock.

use std::collections::{HashMap, HashSet};

use log::info;
use thiserror::Error;
use tokio::sync::Mutex;

pub use self::apt::Apt;
pub use self::mock::Mock;
pub use self::progress::Translator;

pub mod apt;
pub mod mock;
pub mod progress;

use crate::db::mirror;
use crate::events::{Events, Phase, TaskName};
use crate::package::{Changes, Package, Request};

/// The one native transaction slot for the whole process
static NATIVE_LOCK: Mutex<()> = Mutex::const_new(());

/// Outcome of a simulation
#[derive(Debug, Clone, Default)]
pub struct Simulation {
    pub changes: Changes,
}

/// Errors surfaced by the native capability
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn {0}")]
    Spawn(String, #[source] std::io::Error),
    #[error("package repositories need a refresh: {0}")]
    NeedsRefresh(String),
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Classify native tool stderr; fetch failures want an index refresh
    pub fn classify(stderr: String) -> Self {
        const REFRESH_MARKERS: &[&str] = &[
            "Failed to fetch",
            "Unable to fetch",
            "apt-get update",
            "repomd.xml",
        ];

        let stderr = stderr.trim().to_owned();
        if REFRESH_MARKERS.iter().any(|marker| stderr.contains(marker)) {
            Self::NeedsRefresh(stderr)
        } else {
            Self::Failed(stderr)
        }
    }

    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::NeedsRefresh(_))
    }
}

/// Enum dispatch keeps the mock reachable from integration tests
#[derive(Debug, Clone)]
pub enum Backend {
    Apt(Apt),
    Mock(Mock),
}

impl Backend {
    pub async fn update(&self) -> Result<Vec<Package>, BackendError> {
        match self {
            Self::Apt(apt) => apt.update().await,
            Self::Mock(mock) => mock.update(),
        }
    }

    pub async fn simulate(
        &self,
        install: &[String],
        remove: &[String],
    ) -> Result<Simulation, BackendError> {
        match self {
            Self::Apt(apt) => apt.simulate(install, remove).await,
            Self::Mock(mock) => mock.simulate(install, remove),
        }
    }

    pub async fn simulate_reinstall(&self, packages: &[String]) -> Result<Simulation, BackendError> {
        match self {
            Self::Apt(apt) => {
                // --reinstall simulation shares the install entry point
                let mut args: Vec<String> = packages.to_vec();
                args.dedup();
                apt.simulate(&args, &[]).await
            }
            Self::Mock(mock) => mock.simulate_reinstall(packages),
        }
    }

    pub async fn simulate_dist_upgrade(&self) -> Result<Simulation, BackendError> {
        match self {
            Self::Apt(apt) => apt.simulate_dist_upgrade().await,
            Self::Mock(mock) => mock.simulate_dist_upgrade(),
        }
    }

    pub async fn simulate_autoremove(&self) -> Result<Simulation, BackendError> {
        match self {
            Self::Apt(apt) => apt.simulate_autoremove().await,
            Self::Mock(mock) => mock.simulate_autoremove(),
        }
    }

    pub async fn commit(
        &self,
        install: &[String],
        remove: &[String],
        purge: bool,
        autoremove: bool,
        translator: &mut Translator<'_>,
    ) -> Result<(), BackendError> {
        match self {
            Self::Apt(apt) => apt.commit(install, remove, purge, autoremove, translator).await,
            Self::Mock(mock) => {
                let result = mock.commit(install, remove, purge, autoremove);
                translator.finish();
                result
            }
        }
    }

    pub async fn reinstall(
        &self,
        packages: &[String],
        translator: &mut Translator<'_>,
    ) -> Result<(), BackendError> {
        match self {
            Self::Apt(apt) => apt.reinstall(packages, translator).await,
            Self::Mock(mock) => {
                let result = mock.reinstall(packages);
                translator.finish();
                result
            }
        }
    }

    pub async fn dist_upgrade(&self, translator: &mut Translator<'_>) -> Result<(), BackendError> {
        match self {
            Self::Apt(apt) => apt.dist_upgrade(translator).await,
            Self::Mock(mock) => {
                let result = mock.dist_upgrade();
                translator.finish();
                result
            }
        }
    }

    pub async fn installed(&self) -> Result<HashMap<String, String>, BackendError> {
        match self {
            Self::Apt(apt) => apt.installed().await,
            Self::Mock(mock) => mock.installed(),
        }
    }
}

/// The package action service
#[derive(Debug, Clone)]
pub struct Service {
    backend: Backend,
    mirror: mirror::Database,
    events: Events,
}

impl Service {
    pub fn new(backend: Backend, mirror: mirror::Database, events: Events) -> Self {
        Self {
            backend,
            mirror,
            events,
        }
    }

    pub fn mirror(&self) -> &mirror::Database {
        &self.mirror
    }

    /// Expand user tokens into concrete (install, remove) sets.
    ///
    /// Expansion is additive: original tokens stay in user order, expanded
    /// names dedupe against them, and the `+`/`-` suffix of the original
    /// token carries over to every expansion.
    pub async fn prepare_requests(
        &self,
        requests: Vec<Request>,
    ) -> Result<(Vec<String>, Vec<String>), Error> {
        let mut expanded = Vec::new();
        let mut seen = HashSet::new();

        for request in requests {
            if seen.insert(request.clone()) {
                expanded.push(request.clone());
            }

            if !request.is_wildcard() {
                continue;
            }

            for package in self.mirror.search_like(request.name()).await? {
                let inherited = request.with_name(package.name);
                if seen.insert(inherited.clone()) {
                    expanded.push(inherited);
                }
            }
        }

        let mut install = Vec::new();
        let mut remove = Vec::new();
        for request in expanded {
            match request {
                Request::Install(name) => install.push(name),
                Request::Remove(name) => remove.push(name),
            }
        }

        Ok((install, remove))
    }

    /// Simulate and fetch full mirror records for every affected package
    pub async fn find_packages(
        &self,
        install: &[String],
        remove: &[String],
    ) -> Result<(Changes, Vec<Package>), Error> {
        let simulation = self.backend.simulate(install, remove).await?;
        let records = self.records_for(&simulation.changes).await?;

        Ok((simulation.changes, records))
    }

    /// Full mirror records for every package a change set touches, sorted
    /// and deduped by name for presentation.
    pub async fn records_for(&self, changes: &Changes) -> Result<Vec<Package>, Error> {
        let mut records = Vec::new();
        for name in changes.affected() {
            records.extend(self.mirror.packages_by_name(name).await?);
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records.dedup_by(|a, b| a.name == b.name);
        Ok(records)
    }

    pub async fn check_install(
        &self,
        install: &[String],
        remove: &[String],
    ) -> Result<Changes, Error> {
        Ok(self.backend.simulate(install, remove).await?.changes)
    }

    pub async fn check_remove(&self, packages: &[String]) -> Result<Changes, Error> {
        Ok(self.backend.simulate(&[], packages).await?.changes)
    }

    pub async fn check_reinstall(&self, packages: &[String]) -> Result<Changes, Error> {
        Ok(self.backend.simulate_reinstall(packages).await?.changes)
    }

    pub async fn check_upgrade(&self) -> Result<Changes, Error> {
        Ok(self.backend.simulate_dist_upgrade().await?.changes)
    }

    pub async fn check_autoremove(&self) -> Result<Changes, Error> {
        Ok(self.backend.simulate_autoremove().await?.changes)
    }

    /// Combined install/remove mutation under the native lock
    pub async fn commit(
        &self,
        install: &[String],
        remove: &[String],
        purge: bool,
        autoremove: bool,
        transaction: Option<String>,
    ) -> Result<(), Error> {
        let _native = NATIVE_LOCK.lock().await;

        let mut translator = Translator::new(&self.events, transaction);
        self.backend
            .commit(install, remove, purge, autoremove, &mut translator)
            .await?;

        Ok(())
    }

    pub async fn reinstall(
        &self,
        packages: &[String],
        transaction: Option<String>,
    ) -> Result<(), Error> {
        let _native = NATIVE_LOCK.lock().await;

        let mut translator = Translator::new(&self.events, transaction);
        self.backend.reinstall(packages, &mut translator).await?;

        Ok(())
    }

    pub async fn dist_upgrade(&self, transaction: Option<String>) -> Result<(), Error> {
        let _native = NATIVE_LOCK.lock().await;

        let mut translator = Translator::new(&self.events, transaction);
        self.backend.dist_upgrade(&mut translator).await?;

        Ok(())
    }

    /// Refresh the native indices and rebuild the mirror from the result
    pub async fn update(&self, transaction: Option<String>) -> Result<u64, Error> {
        let _native = NATIVE_LOCK.lock().await;

        self.events.notify(
            TaskName::AptUpdate,
            "Refreshing package indices",
            Phase::Before,
            transaction.clone(),
        );
        let result = self.backend.update().await;
        self.events.notify(
            TaskName::AptUpdate,
            "Refreshing package indices",
            Phase::After,
            transaction.clone(),
        );
        let catalogue = result?;

        self.events.notify(
            TaskName::UpdateAllPackagesDb,
            "Rebuilding package database",
            Phase::Before,
            transaction.clone(),
        );
        let count = catalogue.len() as u64;
        let save = self.mirror.save_packages(&catalogue).await;
        self.events.notify(
            TaskName::UpdateAllPackagesDb,
            "Rebuilding package database",
            Phase::After,
            transaction,
        );
        save?;

        self.sync_installed_state().await?;

        info!("mirror refreshed with {count} packages");
        Ok(count)
    }

    pub async fn installed_packages(&self) -> Result<HashMap<String, String>, Error> {
        Ok(self.backend.installed().await?)
    }

    /// Re-align mirror presence flags with the live system
    pub async fn sync_installed_state(&self) -> Result<(), Error> {
        let installed = self.backend.installed().await?;
        self.mirror.sync_installed(&installed).await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("native tool")]
    Backend(#[from] BackendError),
    #[error("mirror db")]
    Mirror(#[from] mirror::Error),
}

impl Error {
    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::Backend(err) if err.needs_refresh())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn service_with(packages: Vec<Package>) -> (Mock, Service) {
        let mirror = mirror::Database::new(crate::db::memory_pool().await);
        mirror.save_packages(&packages).await.unwrap();

        let mock = Mock::with_catalogue(packages);
        let service = Service::new(Backend::Mock(mock.clone()), mirror, Events::default());
        (mock, service)
    }

    fn named(name: &str) -> Package {
        Package {
            name: name.to_owned(),
            version: "1.0-alt1".to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn wildcard_expansion_inherits_suffix() {
        let (_mock, service) = service_with(vec![
            named("vim-console"),
            named("vim-gtk"),
            named("emacs"),
        ])
        .await;

        let requests = vec![
            Request::parse_for_install("vim*-"),
            Request::parse_for_install("emacs"),
        ];
        let (install, remove) = service.prepare_requests(requests).await.unwrap();

        // `vim*-` expands as removals, inheriting the `-` suffix
        assert_eq!(remove, vec!["vim*", "vim-console", "vim-gtk"]);
        assert_eq!(install, vec!["emacs"]);
    }

    #[tokio::test]
    async fn expansion_dedupes_against_originals() {
        let (_mock, service) = service_with(vec![named("vim-console")]).await;

        let requests = vec![
            Request::parse_for_install("vim-console"),
            Request::parse_for_install("vim*"),
        ];
        let (install, _remove) = service.prepare_requests(requests).await.unwrap();
        assert_eq!(install, vec!["vim-console", "vim*"]);
    }

    #[tokio::test]
    async fn affected_records_sorted_and_deduped() {
        let (_mock, service) = service_with(vec![named("zlib"), named("acl")]).await;

        let mut changes = Changes::default();
        changes.new_installed_packages = vec!["zlib".into(), "acl".into(), "zlib".into()];

        let records = service.records_for(&changes).await.unwrap();
        let names: Vec<_> = records.iter().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["acl", "zlib"]);
    }

    #[tokio::test]
    async fn update_rebuilds_mirror_and_syncs() {
        let (mock, service) = service_with(vec![named("hello"), named("world")]).await;
        mock.mark_installed("hello", "1.0-alt1");

        let count = service.update(None).await.unwrap();
        assert_eq!(count, 2);

        let record = &service.mirror().packages_by_name("hello").await.unwrap()[0];
        assert!(record.installed);
        let record = &service.mirror().packages_by_name("world").await.unwrap()[0];
        assert!(!record.installed);
    }

    #[tokio::test]
    async fn installed_map_and_autoremove() {
        let (mock, service) = service_with(vec![named("hello")]).await;
        mock.mark_installed("hello", "1.0-alt1");

        let installed = service.installed_packages().await.unwrap();
        assert_eq!(installed.get("hello").unwrap(), "1.0-alt1");
        assert!(service.check_autoremove().await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn classify_refresh_errors() {
        let err = BackendError::classify("E: Failed to fetch http://mirror/...".into());
        assert!(err.needs_refresh());
        let err = BackendError::classify("E: Unable to locate package zzz".into());
        assert!(!err.needs_refresh());
    }
}
