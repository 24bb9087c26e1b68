// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser};
use thiserror::Error;

use apm::{bootstrap, Actions, Config, Context, Format};

mod serve;
mod system;

#[derive(Debug, Parser)]
#[command(name = "apm", about = "Atomic package manager", version)]
pub struct Command {
    #[command(flatten)]
    pub global: Global,
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, Args)]
pub struct Global {
    #[arg(long, global = true, help = "Path to the configuration file")]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long = "yes",
        global = true,
        help = "Assume yes for all questions"
    )]
    pub yes: bool,
    #[arg(short, long, global = true, help = "Simulate only, change nothing")]
    pub simulate: bool,
    #[arg(
        short,
        long,
        global = true,
        default_value = "text",
        help = "Output format: text, json or dbus"
    )]
    pub format: String,
    #[arg(short, long, global = true, help = "Transaction identifier")]
    pub transaction: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// System package and image management
    #[command(alias = "s")]
    System(system::Command),
    /// Run the HTTP and D-Bus daemon
    Serve(serve::Command),
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Package name completion helper, used by the shell scripts
    #[command(name = "_complete", hide = true)]
    Complete { prefix: String },
}

/// Parse and dispatch the CLI
pub async fn process() -> Result<(), Error> {
    let Command { global, subcommand } = Command::parse();

    let app = Config::load(global.config.clone())?;

    match subcommand {
        Subcommand::Completions { shell } => {
            let mut command = Command::command();
            clap_complete::generate(shell, &mut command, "apm", &mut std::io::stdout());
            Ok(())
        }
        Subcommand::Complete { prefix } => {
            let actions = bootstrap(app).await?;
            for name in actions.mirror().search_multi_limit(&prefix, 50).await? {
                println!("{name}");
            }
            Ok(())
        }
        Subcommand::Serve(command) => serve::handle(command, app).await,
        Subcommand::System(command) => {
            let actions = bootstrap(app).await?;
            let ctx = build_context(&global, &actions);

            // dbus format mirrors every event onto the session bus
            if ctx.format == Format::Dbus {
                match zbus::Connection::session().await {
                    Ok(connection) => actions.events().attach_dbus(connection),
                    Err(err) => log::warn!("cannot attach session bus: {err}"),
                }
            }

            system::handle(command, actions, ctx).await
        }
    }
}

/// Context for a terminal-origin request
fn build_context(global: &Global, actions: &Actions) -> Context {
    let format = Format::parse(&global.format);
    let interactive = tui::is_interactive() && format == Format::Text;

    if interactive {
        let spinner = Arc::new(tui::Spinner::create(true));
        actions.events().attach_spinner(spinner);
    }

    Context {
        transaction: global.transaction.clone(),
        format,
        assume_yes: global.yes,
        background: false,
        // the process uid is the CLI permission model; unprivileged runs
        // surface native tool errors directly
        privileged: true,
        interactive,
        simulate: global.simulate,
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration")]
    Config(#[from] apm::config::Error),

    #[error("startup")]
    Bootstrap(#[from] apm::BootstrapError),

    #[error("mirror db")]
    Mirror(#[from] apm::db::mirror::Error),

    #[error("operation failed")]
    Operation,

    #[error("serve")]
    Serve(#[from] apm::api::ServeError),

    #[error("io")]
    Io(#[from] std::io::Error),
}
