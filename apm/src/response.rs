// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The response envelope shared by every transport, plus its renderers.
//!
//! One payload type per operation family; the text renderer walks the
//! tagged shape by case analysis, never by reflection.

use serde::Serialize;
use tui::pretty::sentence_case;
use tui::Stylize;

use crate::db::history;
use crate::image::{HostImage, ImageConfig};
use crate::package::{Changes, Package};

/// Field catalogue entry returned by `GetFilterFields`
#[derive(Debug, Clone, Serialize)]
pub struct FilterField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FilterKind,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    String,
    Integer,
    Bool,
    Enum,
}

/// Operation specific payloads
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Data {
    Message {
        message: String,
    },
    Packages {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        packages: Vec<Package>,
        #[serde(rename = "totalCount")]
        total_count: u64,
    },
    Info {
        package: Package,
    },
    Changes {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        changes: Changes,
    },
    ImageStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        status: HostImage,
    },
    Histories {
        histories: Vec<history::Entry>,
        #[serde(rename = "totalCount")]
        total_count: u64,
    },
    Config {
        config: ImageConfig,
    },
    FilterFields {
        fields: Vec<FilterField>,
    },
}

impl Data {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: sentence_case(&message.into()),
        }
    }
}

/// The envelope every adapter returns
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub data: Data,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

impl Response {
    pub fn ok(data: Data) -> Self {
        Self {
            data,
            error: false,
            transaction: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::ok(Data::message(message))
    }

    /// "Nothing to do" sentinel: a message with the error flag raised
    pub fn noop(message: impl Into<String>) -> Self {
        Self {
            data: Data::message(message),
            error: true,
            transaction: None,
        }
    }

    /// Background acceptance carrying the transaction id
    pub fn accepted(transaction: String) -> Self {
        Self {
            data: Data::message("task started in background"),
            error: false,
            transaction: Some(transaction),
        }
    }

    pub fn with_transaction(mut self, transaction: Option<String>) -> Self {
        self.transaction = transaction;
        self
    }
}

/// Rendering policy for the text walker
#[derive(Debug, Clone, Copy, Default)]
pub struct Style {
    pub color: bool,
}

impl Style {
    fn title(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.bold())
        } else {
            text.to_owned()
        }
    }

    fn dim(&self, text: &str) -> String {
        if self.color {
            format!("{}", text.dim())
        } else {
            text.to_owned()
        }
    }
}

/// Serialise for machine consumers. `message` is advisory and dropped on
/// success so scripted callers only parse real payload fields.
pub fn render_json(response: &Response) -> String {
    let mut value = serde_json::to_value(response).unwrap_or_default();

    if !response.error {
        if let Some(data) = value.get_mut("data").and_then(|data| data.as_object_mut()) {
            if data.len() > 1 {
                data.remove("message");
            }
        }
    }

    value.to_string()
}

/// Render the payload as an indented tree for terminal consumption
pub fn render_text(response: &Response, style: Style) -> String {
    let mut out = String::new();

    match &response.data {
        Data::Message { message } => {
            out.push_str(&sentence_case(message));
            out.push('\n');
        }
        Data::Packages {
            message,
            packages,
            total_count,
        } => {
            if let Some(message) = message {
                out.push_str(&sentence_case(message));
                out.push('\n');
            }
            out.push_str(&style.title(&format!("Packages ({total_count})")));
            out.push('\n');
            for (index, package) in packages.iter().enumerate() {
                let elbow = if index + 1 == packages.len() {
                    "└─"
                } else {
                    "├─"
                };
                let installed = if package.installed {
                    style.dim(" [installed]")
                } else {
                    String::new()
                };
                out.push_str(&format!(
                    "{elbow} {} {}{installed}\n",
                    package.name,
                    style.dim(&package.version),
                ));
            }
        }
        Data::Info { package } => {
            render_titled(&mut out, style, "Name", &package.name);
            render_titled(&mut out, style, "Version", &package.version);
            render_titled(&mut out, style, "Section", &package.section);
            render_titled(&mut out, style, "Maintainer", &package.maintainer);
            render_titled(&mut out, style, "Architecture", &package.architecture);
            render_titled(
                &mut out,
                style,
                "Installed",
                package
                    .installed_version
                    .as_deref()
                    .unwrap_or("no"),
            );
            render_titled(
                &mut out,
                style,
                "Installed size",
                &human_bytes(package.installed_size),
            );
            render_titled(
                &mut out,
                style,
                "Download size",
                &human_bytes(package.download_size),
            );
            render_titled(&mut out, style, "Description", &package.description);
            if !package.depends.is_empty() {
                render_titled(&mut out, style, "Depends", &package.depends.join(", "));
            }
            if !package.provides.is_empty() {
                render_titled(&mut out, style, "Provides", &package.provides.join(", "));
            }
        }
        Data::Changes { message, changes } => {
            if let Some(message) = message {
                out.push_str(&sentence_case(message));
                out.push('\n');
            }
            render_name_list(&mut out, style, "Newly installed", &changes.new_installed_packages);
            render_name_list(&mut out, style, "Upgraded", &changes.upgraded_packages);
            render_name_list(&mut out, style, "Removed", &changes.removed_packages);
            out.push_str(&format!(
                "{} upgraded, {} newly installed, {} removed, {} not upgraded\n",
                changes.upgraded_count,
                changes.newly_installed_count,
                changes.removed_count,
                changes.not_upgraded_count,
            ));
        }
        Data::ImageStatus { message, status } => {
            if let Some(message) = message {
                out.push_str(&sentence_case(message));
                out.push('\n');
            }
            render_titled(&mut out, style, "Booted image", &status.booted_image);
            if let Some(staged) = &status.staged_image {
                render_titled(&mut out, style, "Staged image", staged);
            }
            render_titled(&mut out, style, "Transport", &status.transport);
            render_titled(&mut out, style, "Digest", &status.digest);
            render_titled(&mut out, style, "Pinned", if status.pinned { "yes" } else { "no" });
        }
        Data::Histories {
            histories,
            total_count,
        } => {
            out.push_str(&style.title(&format!("History ({total_count})")));
            out.push('\n');
            for (index, entry) in histories.iter().enumerate() {
                let elbow = if index + 1 == histories.len() {
                    "└─"
                } else {
                    "├─"
                };
                out.push_str(&format!(
                    "{elbow} {} {} {}\n",
                    entry.date.format("%Y-%m-%d %H:%M:%S"),
                    style.title(&entry.image_name),
                    style.dim(&entry.config.image),
                ));
            }
        }
        Data::Config { config } => {
            out.push_str(&serde_yaml::to_string(config).unwrap_or_default());
        }
        Data::FilterFields { fields } => {
            for (index, field) in fields.iter().enumerate() {
                let elbow = if index + 1 == fields.len() {
                    "└─"
                } else {
                    "├─"
                };
                let values = if field.values.is_empty() {
                    String::new()
                } else {
                    style.dim(&format!(" [{}]", field.values.join(", ")))
                };
                out.push_str(&format!(
                    "{elbow} {} {}{values}\n",
                    style.title(&field.name),
                    field.label,
                ));
            }
        }
    }

    out
}

const TITLE_WIDTH: usize = 16;

fn render_titled(out: &mut String, style: Style, title: &str, value: &str) {
    let pad = TITLE_WIDTH.saturating_sub(title.len());
    out.push_str(&format!("{}{:pad$} {value}\n", style.title(title), ""));
}

fn render_name_list(out: &mut String, style: Style, title: &str, names: &[String]) {
    if names.is_empty() {
        return;
    }
    out.push_str(&style.title(title));
    out.push('\n');
    for (index, name) in names.iter().enumerate() {
        let elbow = if index + 1 == names.len() { "└─" } else { "├─" };
        out.push_str(&format!("{elbow} {name}\n"));
    }
}

/// Human readable byte sizes, binary units
pub fn human_bytes(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_strips_message_on_success() {
        let response = Response::ok(Data::Packages {
            message: Some("listing".into()),
            packages: vec![],
            total_count: 0,
        });

        let json = render_json(&response);
        assert!(!json.contains("listing"));
        assert!(json.contains("totalCount"));

        let failure = Response::noop("nothing to do");
        let json = render_json(&failure);
        assert!(json.contains("Nothing to do"));
        assert!(json.contains("\"error\":true"));
    }

    #[test]
    fn message_capitalised() {
        let response = Response::message("1 package successfully installed");
        match &response.data {
            Data::Message { message } => assert_eq!(message, "1 package successfully installed"),
            _ => panic!("expected message"),
        }
        let response = Response::message("package removed");
        match &response.data {
            Data::Message { message } => assert_eq!(message, "Package removed"),
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn human_sizes() {
        assert_eq!(human_bytes(100), "100 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn text_tree_lists_packages() {
        let response = Response::ok(Data::Packages {
            message: None,
            packages: vec![
                Package {
                    name: "hello".into(),
                    version: "1.0".into(),
                    installed: true,
                    ..Default::default()
                },
                Package {
                    name: "world".into(),
                    version: "2.0".into(),
                    ..Default::default()
                },
            ],
            total_count: 2,
        });

        let text = render_text(&response, Style::default());
        assert!(text.contains("Packages (2)"));
        assert!(text.contains("├─ hello 1.0 [installed]"));
        assert!(text.contains("└─ world 2.0"));
    }
}
