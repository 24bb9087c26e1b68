// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Interactive confirmation for mutating operations.
//!
//! At most one dialog is open per process; the spinner is suspended before
//! the modal is drawn and resumed afterwards.

use tui::dialoguer::{theme::ColorfulTheme, MultiSelect, Select};
use tui::pretty::print_to_columns;

use super::Error;
use crate::context::Context;
use crate::events::Events;
use crate::package::{Changes, Package};

/// Three-way result of the confirmation dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Approve,
    /// User narrowed the affected set to these names
    Edit(Vec<String>),
    Abort,
}

/// Ask the user to confirm a simulated change set, listing the affected
/// packages first. Non-interactive callers and `--yes` approve implicitly.
pub fn confirm_changes(
    ctx: &Context,
    events: &Events,
    changes: &Changes,
    packages: &[Package],
) -> Result<Outcome, Error> {
    if ctx.assume_yes || !ctx.interactive {
        return Ok(Outcome::Approve);
    }

    let spinner = events.spinner();
    if let Some(spinner) = &spinner {
        spinner.suspend_for_dialog();
    }

    if !packages.is_empty() {
        println!("The following packages will be affected:");
        println!();
        print_to_columns(packages);
        println!();
    }

    let result = run_dialog(changes);

    if let Some(spinner) = &spinner {
        spinner.resume();
    }

    result
}

fn run_dialog(changes: &Changes) -> Result<Outcome, Error> {
    let summary = format!(
        "{} to install, {} to upgrade, {} to remove. Continue?",
        changes.newly_installed_count, changes.upgraded_count, changes.removed_count,
    );

    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(summary)
        .items(&["Apply", "Edit selection", "Abort"])
        .default(0)
        .interact()
        .map_err(|_| Error::Cancelled)?;

    match choice {
        0 => Ok(Outcome::Approve),
        1 => {
            let names: Vec<&String> = changes.affected().collect();
            let defaults = vec![true; names.len()];

            let picked = MultiSelect::with_theme(&ColorfulTheme::default())
                .with_prompt("Select packages to keep in this operation")
                .items(&names)
                .defaults(&defaults)
                .interact()
                .map_err(|_| Error::Cancelled)?;

            Ok(Outcome::Edit(
                picked.into_iter().map(|index| names[index].clone()).collect(),
            ))
        }
        _ => Ok(Outcome::Abort),
    }
}

/// Let the user opt staged packages in or out before an apply
pub fn select_staged(
    ctx: &Context,
    events: &Events,
    install: &[String],
    remove: &[String],
) -> Result<(Vec<String>, Vec<String>), Error> {
    if ctx.assume_yes || !ctx.interactive {
        return Ok((install.to_vec(), remove.to_vec()));
    }

    let spinner = events.spinner();
    if let Some(spinner) = &spinner {
        spinner.suspend_for_dialog();
    }

    let mut items: Vec<String> = install.iter().map(|name| format!("install {name}")).collect();
    items.extend(remove.iter().map(|name| format!("remove {name}")));
    let defaults = vec![true; items.len()];

    let result = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Apply these staged changes?")
        .items(&items)
        .defaults(&defaults)
        .interact()
        .map_err(|_| Error::Cancelled);

    if let Some(spinner) = &spinner {
        spinner.resume();
    }

    let picked = result?;

    let chosen_install = install
        .iter()
        .enumerate()
        .filter(|(index, _)| picked.contains(index))
        .map(|(_, name)| name.clone())
        .collect();
    let chosen_remove = remove
        .iter()
        .enumerate()
        .filter(|(index, _)| picked.contains(&(install.len() + index)))
        .map(|(_, name)| name.clone())
        .collect();

    Ok((chosen_install, chosen_remove))
}
