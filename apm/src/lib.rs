// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! apm, an atomic package manager for dual-mode hosts.
//!
//! One operation set served over CLI, HTTP/WebSocket and D-Bus. On a
//! classical host mutations go straight to the native package layer; on an
//! atomic host they accumulate into a staged config that `image apply`
//! materialises by rebuilding the host image and switching the boot target.

use thiserror::Error;

pub mod actions;
pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod dbus;
pub mod environment;
pub mod events;
pub mod image;
pub mod package;
pub mod response;
pub mod service;
pub mod transaction;

pub use self::actions::Actions;
pub use self::config::Config;
pub use self::context::{Context, Format};
pub use self::events::Events;
pub use self::package::Package;
pub use self::response::Response;

/// Wire the full application from configuration. Database open failure is
/// fatal; atomic mode is probed once from the boot switcher.
pub async fn bootstrap(app: Config) -> Result<Actions, BootstrapError> {
    let events = Events::default();

    let pool = db::connect(&app.db_path).await?;
    let mirror = db::mirror::Database::new(pool.clone());
    let history = db::history::Database::new(pool);

    let runner = image::Runner::host(app.command_prefix.clone());
    let image_service = image::Service::new(runner, app.resource_dir.clone());
    let atomic = Actions::detect_atomic(&image_service).await;

    let backend = service::Backend::Apt(service::Apt::new(app.command_prefix.clone()));
    let package_service = service::Service::new(backend, mirror.clone(), events.clone());

    let image_store = image::config::Store::new(app.image_file.clone());
    let staged_store = image::staged::Store::new(app.staged_file.clone());

    Ok(Actions::new(
        app,
        atomic,
        mirror,
        history,
        image_store,
        staged_store,
        image_service,
        package_service,
        events,
    ))
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database")]
    Database(#[from] db::ConnectError),
}
