// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;
use log::warn;

use apm::{api, bootstrap, dbus, Config};

use super::Error;

#[derive(Debug, Args)]
pub struct Command {
    #[arg(long, help = "Listen address, overrides the configuration")]
    address: Option<String>,
}

/// Start the daemon: D-Bus object plus HTTP/WebSocket listener
pub async fn handle(command: Command, mut app: Config) -> Result<(), Error> {
    if let Some(address) = command.address {
        app.address = address;
    }

    let actions = bootstrap(app.clone()).await?;

    // The bus is optional: development hosts may not carry the policy
    // stack, the HTTP surface still works without it.
    let _bus = match dbus::serve(actions.clone()).await {
        Ok(connection) => Some(connection),
        Err(err) => {
            warn!("D-Bus export unavailable: {err}");
            None
        }
    };

    api::serve(actions, &app).await?;

    Ok(())
}
