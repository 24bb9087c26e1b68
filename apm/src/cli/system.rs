// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Args;

use apm::actions::ListParams;
use apm::response::{render_json, render_text, Style};
use apm::{Actions, Context, Format, Response};

use super::Error;

#[derive(Debug, Args)]
pub struct Command {
    #[command(subcommand)]
    command: Sub,
}

#[derive(Debug, clap::Subcommand)]
enum Sub {
    /// Install packages. `name-` marks a package for removal instead
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove packages. `name+` marks a package for installation instead
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
        #[arg(short, long, help = "Also drop configuration files")]
        purge: bool,
        #[arg(short, long, help = "Also remove automatically installed dependencies")]
        depends: bool,
    },
    /// Reinstall packages
    Reinstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Refresh package indices and rebuild the local database
    Update,
    /// Upgrade every installed package
    Upgrade,
    /// Show detailed package information
    Info {
        name: String,
        #[arg(long, help = "Include changelog and aliases")]
        full: bool,
    },
    /// Search packages by name
    Search {
        query: String,
        #[arg(long, help = "Only show installed packages")]
        installed: bool,
    },
    /// List packages from the local database
    List {
        #[arg(long = "filter", help = "Repeatable key=value filter")]
        filters: Vec<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long, help = "ASC or DESC")]
        order: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Filterable field catalogue
    FilterFields,
    /// Host image lifecycle
    Image(Image),
}

#[derive(Debug, Args)]
struct Image {
    #[command(subcommand)]
    command: ImageSub,
}

#[derive(Debug, clap::Subcommand)]
enum ImageSub {
    /// Commit staged changes: rebuild the image and switch the boot target
    Apply,
    /// Show the booted and staged images
    Status,
    /// Re-resolve the booted image from its source
    Update,
    /// List materialised image configurations
    History {
        #[arg(long, help = "Filter by image name substring")]
        name: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Print the active declarative configuration
    Config,
}

/// Run one system operation and render its envelope
pub async fn handle(command: Command, actions: Actions, ctx: Context) -> Result<(), Error> {
    let result = match command.command {
        Sub::Install { packages } => actions.install(ctx.clone(), packages).await,
        Sub::Remove {
            packages,
            purge,
            depends,
        } => actions.remove(ctx.clone(), packages, purge, depends).await,
        Sub::Reinstall { packages } => actions.reinstall(ctx.clone(), packages).await,
        Sub::Update => actions.update(ctx.clone()).await,
        Sub::Upgrade => actions.upgrade(ctx.clone()).await,
        Sub::Info { name, full } => actions.info(ctx.clone(), name, full).await,
        Sub::Search { query, installed } => actions.search(ctx.clone(), query, installed).await,
        Sub::List {
            filters,
            sort,
            order,
            limit,
            offset,
        } => {
            actions
                .list(
                    ctx.clone(),
                    ListParams {
                        filters,
                        sort,
                        order,
                        limit,
                        offset,
                        force_update: false,
                    },
                )
                .await
        }
        Sub::FilterFields => Ok(actions.get_filter_fields()),
        Sub::Image(image) => match image.command {
            ImageSub::Apply => actions.image_apply(ctx.clone()).await,
            ImageSub::Status => actions.image_status(ctx.clone()).await,
            ImageSub::Update => actions.image_update(ctx.clone()).await,
            ImageSub::History {
                name,
                limit,
                offset,
            } => actions.image_history(ctx.clone(), name, limit, offset).await,
            ImageSub::Config => actions.image_get_config(ctx.clone()).await,
        },
    };

    if let Some(spinner) = actions.events().spinner() {
        spinner.stop();
        actions.events().detach_spinner();
    }

    render(result, &ctx)
}

/// Text or JSON to stdout; errors to stderr with exit status 1
fn render(result: Result<Response, apm::actions::Error>, ctx: &Context) -> Result<(), Error> {
    match result {
        Ok(response) => {
            match ctx.format {
                Format::Text => {
                    let style = Style {
                        color: tui::is_interactive(),
                    };
                    print!("{}", render_text(&response, style));
                }
                Format::Json | Format::Dbus => println!("{}", render_json(&response)),
            }
            // the no-op sentinel renders as a message but exits cleanly
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", tui::pretty::sentence_case(&err.to_string()));
            Err(Error::Operation)
        }
    }
}
