// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The operation dispatcher.
//!
//! Every transport funnels into one method set here. Mutating operations
//! share the pre-check sequence (overlay on atomic hosts, transparent
//! mirror rebuild for privileged callers) and the simulate-confirm-commit
//! pattern; on atomic hosts package mutations additionally accumulate into
//! the staged config until `image apply` commits them.

use futures_util::future::BoxFuture;
use itertools::Itertools;
use log::info;
use thiserror::Error;

pub use self::dialog::Outcome;

pub mod dialog;

use crate::config::Config;
use crate::context::Context;
use crate::db::{history, mirror, Order};
use crate::events::{Events, Phase, TaskName};
use crate::image;
use crate::package::Request;
use crate::response::{Data, FilterField, FilterKind, Response};
use crate::service;
use crate::transaction;

/// Paging and filtering arguments of `List`
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// Repeated `key=value` filters
    pub filters: Vec<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Refresh the mirror before querying; needs manage rights
    pub force_update: bool,
}

#[derive(Clone)]
pub struct Actions {
    app: Config,
    /// Whether the host boots from a container image
    atomic: bool,
    mirror: mirror::Database,
    history: history::Database,
    image_store: image::config::Store,
    staged_store: image::staged::Store,
    image: image::Service,
    service: service::Service,
    events: Events,
}

impl Actions {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        app: Config,
        atomic: bool,
        mirror: mirror::Database,
        history: history::Database,
        image_store: image::config::Store,
        staged_store: image::staged::Store,
        image: image::Service,
        service: service::Service,
        events: Events,
    ) -> Self {
        Self {
            app,
            atomic,
            mirror,
            history,
            image_store,
            staged_store,
            image,
            service,
            events,
        }
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    pub fn mirror(&self) -> &mirror::Database {
        &self.mirror
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// Probe the boot switcher once at startup
    pub async fn detect_atomic(image: &image::Service) -> bool {
        image
            .host_image()
            .await
            .map(|host| !host.booted_image.is_empty())
            .unwrap_or(false)
    }

    // -- shared plumbing ---------------------------------------------------

    /// Promote the operation into a background task, answering immediately
    /// with an accepted envelope carrying the transaction id. The inner
    /// context and the envelope share one id.
    fn promote(
        &self,
        transaction: String,
        name: TaskName,
        operation: BoxFuture<'static, Result<Response, Error>>,
    ) -> Response {
        transaction::spawn_background(self.events.clone(), name, transaction, operation)
    }

    fn background_context(&self, ctx: &Context) -> (Context, String) {
        let transaction = ctx
            .transaction
            .clone()
            .filter(|transaction| !transaction.is_empty())
            .unwrap_or_else(transaction::generate_id);

        let mut inner = ctx.clone().foreground();
        inner.transaction = Some(transaction.clone());
        (inner, transaction)
    }

    /// Overlay + mirror pre-checks shared by every mutating operation
    async fn pre_check(&self, ctx: &Context) -> Result<(), Error> {
        if self.atomic {
            self.image.enable_overlay().await?;
        }

        if !self.mirror.exists().await? {
            if !ctx.privileged {
                return Err(Error::Permission(
                    "package database is missing and rebuilding it requires manage rights".into(),
                ));
            }
            info!("mirror missing, rebuilding transparently");
            self.service.update(ctx.transaction.clone()).await?;
        }

        Ok(())
    }

    /// Stage the delta on an atomic host instead of touching the boot image
    async fn stage_delta(&self, install: &[String], remove: &[String]) -> Result<(), Error> {
        let mut staged = self.staged_store.load().await?;
        for name in install {
            staged.add_install(name);
        }
        for name in remove {
            staged.add_remove(name);
        }
        self.staged_store.save(&staged).await?;
        Ok(())
    }

    /// One implicit refresh on classified fetch failures, then guidance
    async fn commit_or_refresh(
        &self,
        ctx: &Context,
        result: Result<(), service::Error>,
    ) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.needs_refresh() => {
                self.service.update(ctx.transaction.clone()).await?;
                Err(Error::External(
                    "package indices were stale and have been refreshed, run the operation again"
                        .into(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    // -- package operations ------------------------------------------------

    pub fn install(&self, ctx: Context, packages: Vec<String>) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::Install,
                    Box::pin(async move { this.install(inner, packages).await }),
                ));
            }

            require_packages(&packages)?;

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::Working,
                "Installing packages",
                Phase::Before,
                transaction.clone(),
            );
            let result = self.install_inner(&ctx, packages).await;
            self.events.notify(
                TaskName::Working,
                "Installing packages",
                Phase::After,
                transaction,
            );
            result.map(|response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    async fn install_inner(&self, ctx: &Context, packages: Vec<String>) -> Result<Response, Error> {
        self.pre_check(ctx).await?;

        let requests = packages
            .iter()
            .map(|token| Request::parse_for_install(token))
            .collect();
        let (install, remove) = self.service.prepare_requests(requests).await?;

        let (changes, records) = self.service.find_packages(&install, &remove).await?;
        if changes.is_noop() {
            return Ok(Response::noop("nothing to do, requested packages are already installed"));
        }

        let (install, remove) = match dialog::confirm_changes(ctx, &self.events, &changes, &records)? {
            Outcome::Approve => (install, remove),
            Outcome::Edit(kept) => narrow(install, remove, &kept),
            Outcome::Abort => return Err(Error::Cancelled),
        };

        if ctx.simulate {
            return Ok(Response::ok(Data::Changes {
                message: Some("Simulation only, nothing was changed".into()),
                changes,
            }));
        }

        let commit = self
            .service
            .commit(&install, &remove, false, false, ctx.transaction.clone())
            .await;
        self.commit_or_refresh(ctx, commit).await?;

        self.service.sync_installed_state().await?;

        if self.atomic {
            self.stage_delta(&install, &remove).await?;
            return Ok(Response::message(format!(
                "{} staged; the booted image is unchanged until you run: apm s image apply",
                count_phrase(changes.newly_installed_count, "package"),
            )));
        }

        Ok(Response::message(format!(
            "{} successfully installed",
            count_phrase(changes.newly_installed_count, "package"),
        )))
    }

    pub fn remove(
        &self,
        ctx: Context,
        packages: Vec<String>,
        purge: bool,
        depends: bool,
    ) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::Remove,
                    Box::pin(async move { this.remove(inner, packages, purge, depends).await }),
                ));
            }

            require_packages(&packages)?;

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::Working,
                "Removing packages",
                Phase::Before,
                transaction.clone(),
            );
            let result = self.remove_inner(&ctx, packages, purge, depends).await;
            self.events.notify(
                TaskName::Working,
                "Removing packages",
                Phase::After,
                transaction,
            );
            result.map(|response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    async fn remove_inner(
        &self,
        ctx: &Context,
        packages: Vec<String>,
        purge: bool,
        depends: bool,
    ) -> Result<Response, Error> {
        self.pre_check(ctx).await?;

        let requests = packages
            .iter()
            .map(|token| Request::parse_for_remove(token))
            .collect();
        let (install, remove) = self.service.prepare_requests(requests).await?;

        let (changes, records) = self.service.find_packages(&install, &remove).await?;
        if changes.is_noop() {
            return Ok(Response::noop("nothing to do, requested packages are not installed"));
        }

        let (install, remove) = match dialog::confirm_changes(ctx, &self.events, &changes, &records)? {
            Outcome::Approve => (install, remove),
            Outcome::Edit(kept) => narrow(install, remove, &kept),
            Outcome::Abort => return Err(Error::Cancelled),
        };

        if ctx.simulate {
            return Ok(Response::ok(Data::Changes {
                message: Some("Simulation only, nothing was changed".into()),
                changes,
            }));
        }

        let commit = self
            .service
            .commit(&install, &remove, purge, depends, ctx.transaction.clone())
            .await;
        self.commit_or_refresh(ctx, commit).await?;

        self.service.sync_installed_state().await?;

        if self.atomic {
            self.stage_delta(&install, &remove).await?;
            return Ok(Response::message(format!(
                "{} staged for removal; the booted image is unchanged until you run: apm s image apply",
                count_phrase(changes.removed_count, "package"),
            )));
        }

        Ok(Response::message(format!(
            "{} successfully removed",
            count_phrase(changes.removed_count, "package"),
        )))
    }

    pub fn reinstall(&self, ctx: Context, packages: Vec<String>) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::Reinstall,
                    Box::pin(async move { this.reinstall(inner, packages).await }),
                ));
            }

            require_packages(&packages)?;

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::Working,
                "Reinstalling packages",
                Phase::Before,
                transaction.clone(),
            );
            let result = self.reinstall_inner(&ctx, packages).await;
            self.events.notify(
                TaskName::Working,
                "Reinstalling packages",
                Phase::After,
                transaction,
            );
            result.map(|response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    async fn reinstall_inner(&self, ctx: &Context, packages: Vec<String>) -> Result<Response, Error> {
        self.pre_check(ctx).await?;

        let changes = self.service.check_reinstall(&packages).await?;
        if changes.is_noop() {
            return Ok(Response::noop("nothing to do, requested packages are not installed"));
        }

        let records = self.service.records_for(&changes).await?;
        if let Outcome::Abort = dialog::confirm_changes(ctx, &self.events, &changes, &records)? {
            return Err(Error::Cancelled);
        }

        if ctx.simulate {
            return Ok(Response::ok(Data::Changes {
                message: Some("Simulation only, nothing was changed".into()),
                changes,
            }));
        }

        let commit = self
            .service
            .reinstall(&packages, ctx.transaction.clone())
            .await;
        self.commit_or_refresh(ctx, commit).await?;
        self.service.sync_installed_state().await?;

        Ok(Response::message(format!(
            "{} successfully reinstalled",
            count_phrase(changes.upgraded_count, "package"),
        )))
    }

    /// Refresh native indices and rebuild the mirror
    pub fn update(&self, ctx: Context) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::Update,
                    Box::pin(async move { this.update(inner).await }),
                ));
            }

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::Working,
                "Updating package database",
                Phase::Before,
                transaction.clone(),
            );
            let result = async {
                if self.atomic {
                    self.image.enable_overlay().await?;
                }
                let count = self.service.update(ctx.transaction.clone()).await?;
                Ok(Response::message(format!(
                    "package database updated, {count} packages available"
                )))
            }
            .await;
            self.events.notify(
                TaskName::Working,
                "Updating package database",
                Phase::After,
                transaction,
            );
            result.map(|response: Response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    pub fn upgrade(&self, ctx: Context) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::Upgrade,
                    Box::pin(async move { this.upgrade(inner).await }),
                ));
            }

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::Working,
                "Upgrading system",
                Phase::Before,
                transaction.clone(),
            );
            let result = self.upgrade_inner(&ctx).await;
            self.events.notify(
                TaskName::Working,
                "Upgrading system",
                Phase::After,
                transaction,
            );
            result.map(|response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    async fn upgrade_inner(&self, ctx: &Context) -> Result<Response, Error> {
        self.pre_check(ctx).await?;

        let changes = self.service.check_upgrade().await?;
        if changes.is_noop() {
            return Ok(Response::noop("nothing to do, all packages are up to date"));
        }

        let records = self.service.records_for(&changes).await?;
        if let Outcome::Abort = dialog::confirm_changes(ctx, &self.events, &changes, &records)? {
            return Err(Error::Cancelled);
        }

        if ctx.simulate {
            return Ok(Response::ok(Data::Changes {
                message: Some("Simulation only, nothing was changed".into()),
                changes,
            }));
        }

        let commit = self.service.dist_upgrade(ctx.transaction.clone()).await;
        self.commit_or_refresh(ctx, commit).await?;
        self.service.sync_installed_state().await?;

        if self.atomic {
            return Ok(Response::message(format!(
                "{} upgraded in the running system only; to persist across reboots run: apm s image update",
                count_phrase(changes.upgraded_count, "package"),
            )));
        }

        Ok(Response::message(format!(
            "{} successfully upgraded",
            count_phrase(changes.upgraded_count, "package"),
        )))
    }

    // -- simulations -------------------------------------------------------

    pub async fn check_install(&self, _ctx: Context, packages: Vec<String>) -> Result<Response, Error> {
        require_packages(&packages)?;

        let requests = packages
            .iter()
            .map(|token| Request::parse_for_install(token))
            .collect();
        let (install, remove) = self.service.prepare_requests(requests).await?;
        let changes = self.service.check_install(&install, &remove).await?;

        Ok(Response::ok(Data::Changes {
            message: None,
            changes,
        }))
    }

    pub async fn check_remove(&self, _ctx: Context, packages: Vec<String>) -> Result<Response, Error> {
        require_packages(&packages)?;

        let requests = packages
            .iter()
            .map(|token| Request::parse_for_remove(token))
            .collect();
        let (_install, remove) = self.service.prepare_requests(requests).await?;
        let changes = self.service.check_remove(&remove).await?;

        Ok(Response::ok(Data::Changes {
            message: None,
            changes,
        }))
    }

    pub async fn check_reinstall(&self, _ctx: Context, packages: Vec<String>) -> Result<Response, Error> {
        require_packages(&packages)?;
        let changes = self.service.check_reinstall(&packages).await?;
        Ok(Response::ok(Data::Changes {
            message: None,
            changes,
        }))
    }

    pub async fn check_upgrade(&self, _ctx: Context) -> Result<Response, Error> {
        let changes = self.service.check_upgrade().await?;
        Ok(Response::ok(Data::Changes {
            message: None,
            changes,
        }))
    }

    // -- queries -----------------------------------------------------------

    pub async fn info(&self, _ctx: Context, name: String, full: bool) -> Result<Response, Error> {
        if name.trim().is_empty() {
            return Err(Error::Argument("package name must not be empty".into()));
        }

        let mut matches = self.mirror.packages_by_name(&name).await?;

        if matches.is_empty() {
            matches = self.mirror.packages_by_provider(&name).await?;
            match matches.len() {
                0 => return Err(Error::NotFound(format!("package {name} not found"))),
                1 => {}
                _ => {
                    let candidates = matches
                        .iter()
                        .map(|package| package.name.as_str())
                        .sorted()
                        .join(", ");
                    return Err(Error::NotFound(format!(
                        "{name} is provided by several packages: {candidates}"
                    )));
                }
            }
        }

        let mut package = matches.remove(0);
        if !full {
            package.changelog = String::new();
            package.aliases = vec![];
        }

        Ok(Response::ok(Data::Info { package }))
    }

    pub async fn list(&self, ctx: Context, params: ListParams) -> Result<Response, Error> {
        if params.force_update {
            if !ctx.privileged {
                return Err(Error::Permission(
                    "refreshing the package database requires manage rights".into(),
                ));
            }
            self.service.update(ctx.transaction.clone()).await?;
        }

        let filters = parse_filters(&params.filters)?;
        let order = Order::parse(params.order.as_deref().unwrap_or_default());

        let packages = self
            .mirror
            .query_packages(
                &filters,
                params.sort.as_deref(),
                order,
                params.limit,
                params.offset,
            )
            .await?;
        let total_count = self.mirror.count_packages(&filters).await?;

        Ok(Response::ok(Data::Packages {
            message: None,
            packages,
            total_count,
        }))
    }

    pub async fn search(
        &self,
        _ctx: Context,
        query: String,
        installed: bool,
    ) -> Result<Response, Error> {
        if query.trim().is_empty() {
            return Err(Error::Argument("search query must not be empty".into()));
        }

        let mut packages = self.mirror.search_like(&format!("*{query}*")).await?;
        if installed {
            packages.retain(|package| package.installed);
        }
        let total_count = packages.len() as u64;

        Ok(Response::ok(Data::Packages {
            message: None,
            packages,
            total_count,
        }))
    }

    /// Catalogue of filterable fields with UI annotations
    pub fn get_filter_fields(&self) -> Response {
        let fields = mirror::ALLOWED_FILTER_FIELDS
            .iter()
            .map(|&name| {
                let (label, kind, values) = match name {
                    "name" => ("Package name", FilterKind::String, vec![]),
                    "section" => ("Section", FilterKind::String, vec![]),
                    "installed" => ("Installed", FilterKind::Bool, vec![]),
                    "maintainer" => ("Maintainer", FilterKind::String, vec![]),
                    "architecture" => ("Architecture", FilterKind::String, vec![]),
                    "typePackage" => (
                        "Package type",
                        FilterKind::Enum,
                        vec!["system".to_owned(), "third-party".to_owned()],
                    ),
                    "isApp" => ("Desktop application", FilterKind::Bool, vec![]),
                    "provides" => ("Provides", FilterKind::String, vec![]),
                    _ => (name, FilterKind::String, vec![]),
                };
                FilterField {
                    name: name.to_owned(),
                    label: label.to_owned(),
                    kind,
                    values,
                }
            })
            .collect();

        Response::ok(Data::FilterFields { fields })
    }

    // -- image operations --------------------------------------------------

    fn require_atomic(&self) -> Result<(), Error> {
        if self.atomic {
            Ok(())
        } else {
            Err(Error::Argument(
                "image operations require a host booted from a container image".into(),
            ))
        }
    }

    pub async fn image_status(&self, _ctx: Context) -> Result<Response, Error> {
        self.require_atomic()?;

        let status = self.image.host_image().await?;
        Ok(Response::ok(Data::ImageStatus {
            message: None,
            status,
        }))
    }

    pub async fn image_history(
        &self,
        _ctx: Context,
        name: Option<String>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Response, Error> {
        self.require_atomic()?;

        let (histories, total_count) = self
            .history
            .histories_filtered(name.as_deref(), limit, offset)
            .await?;

        if histories.is_empty() {
            return Err(Error::NotFound("image history is empty".into()));
        }

        Ok(Response::ok(Data::Histories {
            histories,
            total_count,
        }))
    }

    /// Load the active config, generating and saving a default on first use
    pub async fn image_get_config(&self, _ctx: Context) -> Result<Response, Error> {
        self.require_atomic()?;

        let config = self.load_or_default_config().await?;
        Ok(Response::ok(Data::Config { config }))
    }

    pub async fn image_save_config(
        &self,
        _ctx: Context,
        config: image::ImageConfig,
    ) -> Result<Response, Error> {
        self.require_atomic()?;

        self.image_store.save(&config).await?;
        Ok(Response::message("image configuration saved"))
    }

    async fn load_or_default_config(&self) -> Result<image::ImageConfig, Error> {
        match self.image_store.load().await? {
            Some(config) => Ok(config),
            None => {
                let config = self.image.generate_default_config().await?;
                self.image_store.save(&config).await?;
                Ok(config)
            }
        }
    }

    /// Commit staged intent into the active config, rebuild and switch
    pub fn image_apply(&self, ctx: Context) -> BoxFuture<'_, Result<Response, Error>> {
        Box::pin(async move {
            self.require_atomic()?;

            if ctx.background {
                let (inner, transaction) = self.background_context(&ctx);
                let this = self.clone();
                return Ok(self.promote(
                    transaction,
                    TaskName::ImageApply,
                    Box::pin(async move { this.image_apply(inner).await }),
                ));
            }

            let transaction = ctx.transaction.clone();
            self.events.notify(
                TaskName::ImageApply,
                "Applying image configuration",
                Phase::Before,
                transaction.clone(),
            );
            let result = self.image_apply_inner(&ctx).await;
            self.events.notify(
                TaskName::ImageApply,
                "Applying image configuration",
                Phase::After,
                transaction,
            );
            result.map(|response| response.with_transaction(ctx.transaction.clone()))
        })
    }

    async fn image_apply_inner(&self, ctx: &Context) -> Result<Response, Error> {
        let mut active = self.load_or_default_config().await?;
        active.check_image().map_err(Error::from)?;

        let staged = self.staged_store.load().await?;
        if !staged.is_empty() {
            let (chosen_install, chosen_remove) = dialog::select_staged(
                ctx,
                &self.events,
                &staged.packages.install,
                &staged.packages.remove,
            )?;

            for name in &chosen_install {
                active.add_install_package(name);
            }
            for name in &chosen_remove {
                active.add_remove_package(name);
            }

            self.image_store.save(&active).await?;
        }

        let image_name = if active.has_build_steps() {
            let resolved = self.resolve_config(&active)?;
            self.image.build_and_switch(&resolved).await?;
            crate::environment::LOCAL_IMAGE_TAG.to_owned()
        } else {
            self.image.switch_image(&active.image).await?;
            active.image.clone()
        };

        if !self.history.is_latest_config_same(&active).await? {
            self.history.save_image(&image_name, &active).await?;
        }

        self.staged_store.reset().await?;

        let status = self.image.host_image().await?;
        Ok(Response::ok(Data::ImageStatus {
            message: Some("image rebuilt and staged for boot, reboot to apply".into()),
            status,
        }))
    }

    /// Re-resolve the booted image from its source
    pub async fn image_update(&self, ctx: Context) -> Result<Response, Error> {
        self.require_atomic()?;

        if ctx.background {
            let (inner, transaction) = self.background_context(&ctx);
            let this = self.clone();
            return Ok(self.promote(
                transaction,
                TaskName::ImageUpdate,
                Box::pin(async move { this.image_update(inner).await }),
            ));
        }

        let transaction = ctx.transaction.clone();
        self.events.notify(
            TaskName::ImageUpdate,
            "Updating host image",
            Phase::Before,
            transaction.clone(),
        );
        let result = async {
            let active = self.load_or_default_config().await?;
            let resolved = self.resolve_config(&active)?;
            self.image.check_and_update_base_image(&resolved).await?;

            if !self.history.is_latest_config_same(&active).await? {
                self.history
                    .save_image(crate::environment::LOCAL_IMAGE_TAG, &active)
                    .await?;
            }

            let status = self.image.host_image().await?;
            Ok(Response::ok(Data::ImageStatus {
                message: Some("host image updated, reboot to apply".into()),
                status,
            }))
        }
        .await;
        self.events.notify(
            TaskName::ImageUpdate,
            "Updating host image",
            Phase::After,
            transaction,
        );
        result.map(|response: Response| response.with_transaction(ctx.transaction.clone()))
    }

    /// Resolve include modules relative to the active config directory
    fn resolve_config(&self, config: &image::ImageConfig) -> Result<image::ImageConfig, Error> {
        let base_dir = self
            .image_store
            .path()
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_default();

        let resolved = image::dockerfile::resolve_includes(config, &|reference| {
            let path = base_dir.join(reference);
            let text = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&text)?)
        })?;

        Ok(resolved)
    }

    pub fn app_config(&self) -> &Config {
        &self.app
    }
}

fn require_packages(packages: &[String]) -> Result<(), Error> {
    if packages.iter().all(|token| token.trim().is_empty()) {
        Err(Error::Argument("at least one package name is required".into()))
    } else {
        Ok(())
    }
}

/// Narrow install/remove sets to the names kept in an edit dialog
fn narrow(install: Vec<String>, remove: Vec<String>, kept: &[String]) -> (Vec<String>, Vec<String>) {
    (
        install
            .into_iter()
            .filter(|name| kept.contains(name))
            .collect(),
        remove
            .into_iter()
            .filter(|name| kept.contains(name))
            .collect(),
    )
}

/// `key=value` filter tokens into a validated-later map
fn parse_filters(
    tokens: &[String],
) -> Result<std::collections::HashMap<String, String>, Error> {
    let mut filters = std::collections::HashMap::new();
    for token in tokens {
        let Some((key, value)) = token.split_once('=') else {
            return Err(Error::Argument(format!(
                "invalid filter `{token}`, expected key=value"
            )));
        };
        filters.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(filters)
}

fn count_phrase(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// The error taxonomy every transport maps from
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    Argument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    External(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Fatal(String),
}

impl From<mirror::Error> for Error {
    fn from(err: mirror::Error) -> Self {
        match err {
            mirror::Error::UnknownFilterField { .. } | mirror::Error::UnknownSortField { .. } => {
                Error::Argument(err.to_string())
            }
            mirror::Error::RowNotFound => Error::NotFound("package not found".into()),
            other => Error::External(other.to_string()),
        }
    }
}

impl From<service::Error> for Error {
    fn from(err: service::Error) -> Self {
        match err {
            service::Error::Mirror(inner) => inner.into(),
            service::Error::Backend(inner) => Error::External(inner.to_string()),
        }
    }
}

impl From<image::Error> for Error {
    fn from(err: image::Error) -> Self {
        match err {
            image::Error::Overlay(_) => Error::Fatal(err.to_string()),
            image::Error::NotAtomicHost => Error::Argument(err.to_string()),
            image::Error::Config(inner) => inner.into(),
            other => Error::External(other.to_string()),
        }
    }
}

impl From<image::config::Error> for Error {
    fn from(err: image::config::Error) -> Self {
        match err {
            image::config::Error::SaveComposed
            | image::config::Error::InstallRemoveOverlap(_)
            | image::config::Error::IncludeCycle(_)
            | image::config::Error::UnresolvedInclude(_) => Error::Conflict(err.to_string()),
            image::config::Error::MissingBaseImage => Error::Argument(err.to_string()),
            other => Error::External(other.to_string()),
        }
    }
}

impl From<image::staged::Error> for Error {
    fn from(err: image::staged::Error) -> Self {
        Error::External(err.to_string())
    }
}

impl From<history::Error> for Error {
    fn from(err: history::Error) -> Self {
        Error::External(err.to_string())
    }
}

impl Error {
    /// HTTP status mapping shared by the REST surface
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Permission(_) => 401,
            Error::Argument(_) | Error::Conflict(_) | Error::NotFound(_) | Error::Cancelled => 400,
            Error::External(_) | Error::Fatal(_) => 500,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::events::Events;
    use crate::image::{ImageConfig, MockRunner, Runner};
    use crate::package::Package;
    use crate::service::{mock::Call, Backend, BackendError, Mock, Service};

    const STATUS_REGISTRY: &str = r#"
    {"status":{"booted":{"image":{"image":{"image":"reg/base:latest","transport":"registry"},
    "imageDigest":"sha256:22"},"pinned":false}}}
    "#;

    struct Bed {
        _dir: tempfile::TempDir,
        mock: Mock,
        runner: MockRunner,
        actions: Actions,
    }

    fn named(name: &str) -> Package {
        Package {
            name: name.to_owned(),
            version: "1.0-alt1".to_owned(),
            ..Default::default()
        }
    }

    async fn testbed(atomic: bool) -> Bed {
        let dir = tempfile::tempdir().unwrap();

        let pool = crate::db::memory_pool().await;
        let mirror = mirror::Database::new(pool.clone());
        let history = history::Database::new(pool);

        let catalogue = vec![named("hello"), named("curl"), named("nano")];
        mirror.save_packages(&catalogue).await.unwrap();

        let mock = Mock::with_catalogue(catalogue);
        mock.mark_installed("nano", "1.0-alt1");
        mirror
            .sync_installed(&mock.installed().unwrap())
            .await
            .unwrap();

        let events = Events::default();
        let service = Service::new(Backend::Mock(mock.clone()), mirror.clone(), events.clone());

        let runner = MockRunner::default();
        runner.respond("bootc status", STATUS_REGISTRY);

        // overlay already mounted so no bootc call is needed
        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "overlay /usr overlay rw 0 0\n").unwrap();
        let image = image::Service::new(Runner::Mock(runner.clone()), dir.path().join("resources"))
            .with_mounts(&mounts);

        let image_store = image::config::Store::new(dir.path().join("image.yml"));
        let staged_store = image::staged::Store::new(dir.path().join("staged.yml"));

        let actions = Actions::new(
            Config::default(),
            atomic,
            mirror,
            history,
            image_store,
            staged_store,
            image,
            service,
            events,
        );

        Bed {
            _dir: dir,
            mock,
            runner,
            actions,
        }
    }

    fn ctx() -> Context {
        Context {
            assume_yes: true,
            privileged: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn classical_install_updates_mirror() {
        let bed = testbed(false).await;

        let response = bed
            .actions
            .install(ctx(), vec!["hello".into()])
            .await
            .unwrap();

        assert!(!response.error);
        let json = crate::response::render_json(&response);
        assert!(json.contains("1 package successfully installed"));

        let record = &bed.actions.mirror().packages_by_name("hello").await.unwrap()[0];
        assert!(record.installed);

        assert!(matches!(bed.mock.calls().last(), Some(Call::Commit { .. })));
        assert_eq!(bed.actions.events().open_tasks(), 0);
    }

    #[tokio::test]
    async fn atomic_install_stages_without_switching() {
        let bed = testbed(true).await;

        let response = bed
            .actions
            .install(ctx(), vec!["curl".into()])
            .await
            .unwrap();

        let json = crate::response::render_json(&response);
        assert!(json.contains("apm s image apply"));

        let staged = image::staged::Store::new(bed._dir.path().join("staged.yml"))
            .load()
            .await
            .unwrap();
        assert_eq!(staged.packages.install, vec!["curl"]);
        assert!(staged.packages.remove.is_empty());

        // no image switch happened
        assert!(bed
            .runner
            .invocations()
            .iter()
            .all(|invocation| invocation[1] != "switch"));
    }

    #[tokio::test]
    async fn image_apply_merges_staged_into_active() {
        let bed = testbed(true).await;

        // stage intent and seed an active config without those packages
        let staged_store = image::staged::Store::new(bed._dir.path().join("staged.yml"));
        let mut staged = staged_store.load().await.unwrap();
        staged.add_install("curl");
        staged.add_remove("nano");
        staged_store.save(&staged).await.unwrap();

        let image_store = image::config::Store::new(bed._dir.path().join("image.yml"));
        image_store
            .save(&ImageConfig::default_for("reg/base:latest"))
            .await
            .unwrap();

        let response = bed.actions.image_apply(ctx()).await.unwrap();
        assert!(!response.error);

        let active = image_store.load().await.unwrap().unwrap();
        let crate::image::Module::Packages { install, remove } = &active.modules[0] else {
            panic!("expected packages module");
        };
        assert_eq!(install, &vec!["curl".to_owned()]);
        assert_eq!(remove, &vec!["nano".to_owned()]);

        // staged file removed
        assert!(staged_store.load().await.unwrap().is_empty());

        // exactly one build+switch pair reached the runner
        let programs: Vec<String> = bed
            .runner
            .invocations()
            .into_iter()
            .map(|invocation| invocation[..2].join(" "))
            .collect();
        assert_eq!(
            programs
                .iter()
                .filter(|program| program.as_str() == "podman build")
                .count(),
            1
        );
        assert_eq!(
            programs
                .iter()
                .filter(|program| program.as_str() == "bootc switch")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn background_update_delivers_terminal_event() {
        let bed = testbed(false).await;
        let (_id, mut rx) = bed.actions.events().hub().register();

        let mut background = ctx();
        background.background = true;

        let response = bed.actions.update(background).await.unwrap();
        let transaction = response.transaction.clone().unwrap();
        assert!(!transaction.is_empty());

        // scan frames until the terminal system.Update event for our txn
        let deadline = std::time::Duration::from_secs(5);
        let found = tokio::time::timeout(deadline, async {
            loop {
                let frame = rx.recv().await.expect("event stream open");
                if frame.contains("\"name\":\"system.Update\"")
                    && frame.contains("\"state\":\"after\"")
                    && frame.contains(&transaction)
                {
                    return frame;
                }
            }
        })
        .await
        .expect("terminal event delivered");

        assert!(found.contains("packages available"));
    }

    #[tokio::test]
    async fn unknown_filter_is_argument_error() {
        let bed = testbed(false).await;

        let err = bed
            .actions
            .list(
                ctx(),
                ListParams {
                    filters: vec!["unknown=x".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Argument(_)));
        let message = err.to_string();
        assert!(message.contains("unknown"));
        assert!(message.contains("name"));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn noop_install_returns_sentinel() {
        let bed = testbed(false).await;

        let response = bed
            .actions
            .install(ctx(), vec!["nano".into()])
            .await
            .unwrap();

        assert!(response.error);
        let json = crate::response::render_json(&response);
        assert!(json.contains("Nothing to do"));
    }

    #[tokio::test]
    async fn refresh_classified_failure_updates_once_without_retry() {
        let bed = testbed(false).await;

        bed.mock
            .fail_next(BackendError::NeedsRefresh("Failed to fetch index".into()));

        let err = bed
            .actions
            .install(ctx(), vec!["hello".into()])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::External(_)));
        assert!(err.to_string().contains("refreshed"));

        // the refresh ran, the mutation was not retried
        let calls = bed.mock.calls();
        assert_eq!(calls, vec![Call::Update]);
    }

    #[tokio::test]
    async fn info_falls_back_to_providers() {
        let bed = testbed(false).await;

        let mut provider = named("vim-console");
        provider.provides = vec!["vim".into()];
        bed.actions
            .mirror()
            .save_packages(&[provider, named("hello")])
            .await
            .unwrap();

        let response = bed
            .actions
            .info(ctx(), "vim".into(), false)
            .await
            .unwrap();
        let json = crate::response::render_json(&response);
        assert!(json.contains("vim-console"));

        let err = bed
            .actions
            .info(ctx(), "missing".into(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_arguments_rejected() {
        let bed = testbed(false).await;

        let err = bed.actions.install(ctx(), vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));

        let err = bed
            .actions
            .remove(ctx(), vec!["".into()], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[tokio::test]
    async fn image_ops_rejected_on_classical_host() {
        let bed = testbed(false).await;

        let err = bed.actions.image_status(ctx()).await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }
}
