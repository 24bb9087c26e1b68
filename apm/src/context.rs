// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-request context threaded from the transport into the dispatcher.

use serde::{Deserialize, Serialize};

/// Output rendering selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Text,
    Json,
    Dbus,
}

impl Format {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => Self::Json,
            "dbus" => Self::Dbus,
            _ => Self::Text,
        }
    }
}

/// Request context carried through every operation
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Correlates events with their originating request; generated when
    /// absent and background work is requested
    pub transaction: Option<String>,
    pub format: Format,
    /// Skip confirmation dialogs
    pub assume_yes: bool,
    /// Promote the operation to a background task
    pub background: bool,
    /// Whether the caller holds `manage` rights; transports adapt their
    /// own scheme (Bearer token, polkit, uid) into this
    pub privileged: bool,
    /// Dialogs can only be raised on an interactive terminal
    pub interactive: bool,
    /// Simulate only, never mutate
    pub simulate: bool,
}

impl Context {
    /// Context for a transport without a terminal: dialogs auto-approve
    pub fn service(transaction: Option<String>, background: bool, privileged: bool) -> Self {
        Self {
            transaction,
            format: Format::Json,
            assume_yes: true,
            background,
            privileged,
            interactive: false,
            simulate: false,
        }
    }

    /// Strip the background flag for the inner run of a promoted task
    pub fn foreground(mut self) -> Self {
        self.background = false;
        self
    }
}
