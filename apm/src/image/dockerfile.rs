// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Build recipe generation from the declarative configuration.
//!
//! Modules contribute instructions in declaration order. Includes must be
//! resolved before generation; the generator refuses composed input.

use std::collections::HashSet;

use super::config::{Error, ImageConfig, Module};

/// Wrap column for long package commands
const WRAP_COLUMN: usize = 80;
const LINE_CONT: &str = " \\";

/// Render a Dockerfile for the given resolved configuration
pub fn generate(config: &ImageConfig) -> Result<String, Error> {
    config.check_image()?;

    let mut lines = vec![format!("FROM {}", config.image)];

    for module in &config.modules {
        match module {
            Module::Packages { install, remove } => {
                if !install.is_empty() {
                    lines.push(wrap_command(
                        "RUN apt-get update && apt-get install -y",
                        install,
                    ));
                }
                if !remove.is_empty() {
                    lines.push(wrap_command("RUN apt-get remove -y", remove));
                }
            }
            Module::Shell { commands } => {
                for command in commands.lines().filter(|line| !line.trim().is_empty()) {
                    lines.push(format!("RUN {}", command.trim()));
                }
            }
            Module::Include { reference } => {
                return Err(Error::UnresolvedInclude(reference.clone()));
            }
        }
    }

    Ok(lines.join("\n") + "\n")
}

/// Resolve include modules depth-first through the loader, detecting cycles
pub fn resolve_includes(
    config: &ImageConfig,
    load: &impl Fn(&str) -> Result<ImageConfig, Error>,
) -> Result<ImageConfig, Error> {
    let mut visited = HashSet::new();
    resolve_inner(config, load, &mut visited)
}

fn resolve_inner(
    config: &ImageConfig,
    load: &impl Fn(&str) -> Result<ImageConfig, Error>,
    visited: &mut HashSet<String>,
) -> Result<ImageConfig, Error> {
    let mut resolved = ImageConfig {
        image: config.image.clone(),
        modules: vec![],
    };

    for module in &config.modules {
        match module {
            Module::Include { reference } => {
                if !visited.insert(reference.clone()) {
                    return Err(Error::IncludeCycle(reference.clone()));
                }
                let included = load(reference)?;
                let inner = resolve_inner(&included, load, visited)?;
                resolved.modules.extend(inner.modules);
            }
            other => resolved.modules.push(other.clone()),
        }
    }

    Ok(resolved)
}

/// Join command words, breaking at the wrap column with continuations
fn wrap_command(prefix: &str, words: &[String]) -> String {
    let mut out = String::from(prefix);
    let mut column = prefix.len();

    for word in words {
        if column + 1 + word.len() > WRAP_COLUMN {
            out.push_str(LINE_CONT);
            out.push_str("\n    ");
            column = 4;
        } else {
            out.push(' ');
            column += 1;
        }
        out.push_str(word);
        column += word.len();
    }

    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modules_render_in_order() {
        let config = ImageConfig {
            image: "base:latest".into(),
            modules: vec![
                Module::Shell {
                    commands: "echo first".into(),
                },
                Module::Packages {
                    install: vec!["curl".into()],
                    remove: vec!["nano".into()],
                },
            ],
        };

        let recipe = generate(&config).unwrap();
        let lines: Vec<_> = recipe.lines().collect();
        assert_eq!(lines[0], "FROM base:latest");
        assert_eq!(lines[1], "RUN echo first");
        assert_eq!(lines[2], "RUN apt-get update && apt-get install -y curl");
        assert_eq!(lines[3], "RUN apt-get remove -y nano");
    }

    #[test]
    fn long_install_wraps_with_continuations() {
        let install = (0..30).map(|i| format!("package-name-{i:02}")).collect();
        let config = ImageConfig {
            image: "base".into(),
            modules: vec![Module::Packages {
                install,
                remove: vec![],
            }],
        };

        let recipe = generate(&config).unwrap();
        assert!(recipe.contains(" \\\n    "));
        for line in recipe.lines() {
            assert!(line.len() <= WRAP_COLUMN + LINE_CONT.len() + 20);
        }
        // continuation lines are indented
        let continuations = recipe
            .lines()
            .filter(|line| line.starts_with("    "))
            .count();
        assert!(continuations > 0);
    }

    #[test]
    fn include_resolution_flattens() {
        let inner = ImageConfig {
            image: String::new(),
            modules: vec![Module::Packages {
                install: vec!["htop".into()],
                remove: vec![],
            }],
        };
        let outer = ImageConfig {
            image: "base".into(),
            modules: vec![Module::Include {
                reference: "inner.yml".into(),
            }],
        };

        let resolved = resolve_includes(&outer, &|reference| {
            assert_eq!(reference, "inner.yml");
            Ok(inner.clone())
        })
        .unwrap();

        assert_eq!(resolved.modules.len(), 1);
        assert!(matches!(&resolved.modules[0], Module::Packages { install, .. } if install == &vec!["htop".to_owned()]));
    }

    #[test]
    fn include_cycle_detected() {
        let looping = ImageConfig {
            image: "base".into(),
            modules: vec![Module::Include {
                reference: "self.yml".into(),
            }],
        };

        let result = resolve_includes(&looping, &|_| Ok(looping.clone()));
        assert!(matches!(result, Err(Error::IncludeCycle(_))));
    }
}
