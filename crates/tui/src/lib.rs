// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::IsTerminal;

pub use self::reexport::*;
pub use self::spinner::Spinner;

pub mod pretty;
pub mod spinner;

const DEFAULT_TERM_SIZE: (u16, u16) = (80, 24);

/// Terminal dimensions the column renderer lays out against
pub struct TermSize {
    pub width: usize,
    pub height: usize,
}

/// Current terminal size, falling back to 80x24 off-terminal
pub fn term_size() -> TermSize {
    let size = crossterm::terminal::size().unwrap_or(DEFAULT_TERM_SIZE);
    let mapped = if size.0 < 1 || size.1 < 1 {
        DEFAULT_TERM_SIZE
    } else {
        size
    };
    TermSize {
        width: mapped.0 as usize,
        height: mapped.1 as usize,
    }
}

/// Whether stdout is attached to an interactive terminal.
///
/// Spinners and dialogs are suppressed when this is false, e.g. when apm
/// runs under a pipe or as a service.
pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

mod reexport {
    pub use crossterm::style::Stylize;
    pub use dialoguer;
    pub use indicatif::*;
}
