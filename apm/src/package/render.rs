// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::io::Write;

use tui::{
    pretty::{Column, ColumnDisplay},
    Stylize,
};

use super::Package;

/// Column cells for the pre-confirmation package listing
impl ColumnDisplay for Package {
    fn get_display_width(&self) -> usize {
        self.name.len() + self.version.len() + 3
    }

    fn display_column(&self, writer: &mut impl Write, col: Column, width: usize) {
        let gap = match col {
            Column::Last => "",
            _ => "   ",
        };
        let _ = write!(
            writer,
            "{} {:width$}{}{gap}",
            self.name.as_str().bold(),
            " ",
            self.version.as_str().dim(),
        );
    }
}
