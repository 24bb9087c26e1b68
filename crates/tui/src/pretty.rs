// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Pretty printing for the apm CLI

use std::{
    cmp::max,
    io::{stdout, Write},
};

use crate::term_size;

/// Render position of a display column
pub enum Column {
    First,
    Nth(usize),
    Last,
}

/// A cell in the column layout driven by [`print_to_columns`]. Callers
/// pre-sort their items so every column reads top to bottom.
pub trait ColumnDisplay: Sized {
    /// Full width of the rendered cell, used to size the columns
    fn get_display_width(&self) -> usize;

    /// Write the cell, padding out to `width`
    fn display_column(&self, writer: &mut impl Write, col: Column, width: usize);
}

/// Lay the items out in vertical columns sized to the terminal
pub fn print_to_columns<T: ColumnDisplay>(items: &[T]) {
    let Some(largest) = items.iter().map(|i| i.get_display_width() + 6).max() else {
        return;
    };

    let terminal_width = term_size().width;
    let num_columns = max(1, terminal_width / largest);
    let height = items.len().div_ceil(num_columns);

    let mut stdout = stdout().lock();

    for y in 0..height {
        for x in 0..num_columns {
            if let Some(item) = items.get(y + x * height) {
                let column = match x {
                    0 => Column::First,
                    n if n == num_columns - 1 => Column::Last,
                    n => Column::Nth(n),
                };
                item.display_column(&mut stdout, column, largest - item.get_display_width());
            }
        }
        let _ = writeln!(stdout);
    }
}

/// Uppercase the first character of a user visible message.
///
/// Messages assembled from translated fragments can arrive with a lowercase
/// head; every renderer normalises through here before display.
pub fn sentence_case(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod test {
    use super::sentence_case;

    #[test]
    fn sentence_case_first_rune() {
        assert_eq!(sentence_case("nothing to do"), "Nothing to do");
        assert_eq!(sentence_case("Уже установлено"), "Уже установлено");
        assert_eq!(sentence_case(""), "");
    }
}
