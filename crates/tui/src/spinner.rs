// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Spinner lifecycle for long running operations.
//!
//! The spinner is a sink only: it renders task updates pushed in by the
//! event plane and owns no state of its own beyond the indicatif handle.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::Stylize;

const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// A single-line spinner shown while an operation is in flight.
///
/// Only one spinner exists per process; dialogs must call
/// [`Spinner::suspend_for_dialog`] so the modal renders on a clean line.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    /// Create a live spinner. Pass `enabled = false` to get an inert
    /// handle, used for non-interactive sessions and non-text formats.
    pub fn create(enabled: bool) -> Self {
        if !enabled {
            return Self { bar: None };
        }

        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template(" {spinner} {wide_msg}")
                .expect("valid template")
                .tick_chars("--=≡■≡=--"),
        );
        bar.enable_steady_tick(TICK_INTERVAL);

        Self { bar: Some(bar) }
    }

    /// Replace the message line
    pub fn set_message(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.into());
        }
    }

    /// Render one task update. Progress tasks show their percentage,
    /// notifications just the view text.
    pub fn update(&self, view: &str, percent: Option<u8>) {
        if let Some(bar) = &self.bar {
            match percent {
                Some(pct) => bar.set_message(format!("{view} {}", format!("{pct:>3}%").dim())),
                None => bar.set_message(view.to_owned()),
            }
        }
    }

    /// Print a completion line above the spinner without disturbing it
    pub fn println(&self, line: impl AsRef<str>) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{}", line.as_ref()),
        }
    }

    /// Emit the final success line for a finished task
    pub fn finish_task(&self, done_text: &str) {
        self.println(format!("{} {done_text}", "✓".green()));
    }

    /// Clear the line before a modal dialog is drawn. The caller re-creates
    /// the spinner once the dialog closes.
    pub fn suspend_for_dialog(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.set_message(String::new());
            bar.tick();
        }
    }

    /// Resume ticking after a dialog closed
    pub fn resume(&self) {
        if let Some(bar) = &self.bar {
            bar.enable_steady_tick(TICK_INTERVAL);
        }
    }

    /// Tear the spinner down, clearing its line
    pub fn stop(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Spinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spinner")
            .field("enabled", &self.bar.is_some())
            .finish()
    }
}
