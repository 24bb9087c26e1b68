// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Native package tool capability backed by the apt family.
//!
//! Commands run with the configured prefix and surface a machine status
//! stream that [`Translator`](super::progress::Translator) turns into
//! event-plane updates.

use std::collections::HashMap;
use std::process::Stdio;

use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::progress::Translator;
use super::{BackendError, Simulation};
use crate::package::{Changes, Package, PackageType};

/// Multi-arch name prefixes collapsed during installed-map construction
const ARCH_PREFIXES: &[&str] = &["i586-", "i686-"];

#[derive(Debug, Clone, Default)]
pub struct Apt {
    command_prefix: Option<String>,
}

impl Apt {
    pub fn new(command_prefix: Option<String>) -> Self {
        Self { command_prefix }
    }

    fn command(&self, program: &str) -> Command {
        match self.command_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                let mut command = Command::new(prefix);
                command.arg(program);
                command
            }
            _ => Command::new(program),
        }
    }

    async fn capture(&self, program: &str, args: &[&str]) -> Result<String, BackendError> {
        debug!("running {program} {args:?}");

        let output = self
            .command(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| BackendError::Spawn(program.to_owned(), err))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(BackendError::classify(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a mutating apt command, streaming its status lines through the
    /// progress translator.
    async fn stream(
        &self,
        args: &[&str],
        translator: &mut Translator<'_>,
    ) -> Result<(), BackendError> {
        debug!("running apt-get {args:?}");

        let mut child = self
            .command("apt-get")
            .args(args)
            .args(["-o", "APT::Status-Fd=1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| BackendError::Spawn("apt-get".to_owned(), err))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                translator.feed(&line);
            }
        }

        let mut stderr_text = String::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_text.push_str(&line);
                stderr_text.push('\n');
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|err| BackendError::Spawn("apt-get".to_owned(), err))?;

        if !status.success() {
            return Err(BackendError::classify(stderr_text));
        }

        translator.finish();
        Ok(())
    }

    /// Refresh package indices and return the refreshed catalogue
    pub async fn update(&self) -> Result<Vec<Package>, BackendError> {
        self.capture("apt-get", &["update"]).await?;
        let dump = self.capture("apt-cache", &["dumpavail"]).await?;
        Ok(parse_dumpavail(&dump))
    }

    /// Simulate without mutating; tokens already carry their polarity
    pub async fn simulate(
        &self,
        install: &[String],
        remove: &[String],
    ) -> Result<Simulation, BackendError> {
        let mut args = vec![
            "install".to_owned(),
            "-s".to_owned(),
            "-q".to_owned(),
            "-y".to_owned(),
        ];
        args.extend(install.iter().cloned());
        args.extend(remove.iter().map(|name| format!("{name}-")));

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.capture("apt-get", &arg_refs).await?;

        Ok(parse_simulation(&output))
    }

    pub async fn simulate_dist_upgrade(&self) -> Result<Simulation, BackendError> {
        let output = self
            .capture("apt-get", &["dist-upgrade", "-s", "-q", "-y"])
            .await?;
        Ok(parse_simulation(&output))
    }

    pub async fn simulate_autoremove(&self) -> Result<Simulation, BackendError> {
        let output = self
            .capture("apt-get", &["autoremove", "-s", "-q", "-y"])
            .await?;
        Ok(parse_simulation(&output))
    }

    /// Combined install/remove mutation
    pub async fn commit(
        &self,
        install: &[String],
        remove: &[String],
        purge: bool,
        autoremove: bool,
        translator: &mut Translator<'_>,
    ) -> Result<(), BackendError> {
        let mut args = vec!["install".to_owned(), "-y".to_owned()];
        if purge {
            args.push("--purge".to_owned());
        }
        if autoremove {
            args.push("--auto-remove".to_owned());
        }
        args.extend(install.iter().cloned());
        args.extend(remove.iter().map(|name| format!("{name}-")));

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.stream(&arg_refs, translator).await
    }

    pub async fn reinstall(
        &self,
        packages: &[String],
        translator: &mut Translator<'_>,
    ) -> Result<(), BackendError> {
        let mut args = vec!["install".to_owned(), "--reinstall".to_owned(), "-y".to_owned()];
        args.extend(packages.iter().cloned());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.stream(&arg_refs, translator).await
    }

    pub async fn dist_upgrade(&self, translator: &mut Translator<'_>) -> Result<(), BackendError> {
        self.stream(&["dist-upgrade", "-y"], translator).await
    }

    /// Installed name → version map from the host package database
    pub async fn installed(&self) -> Result<HashMap<String, String>, BackendError> {
        let output = self
            .capture("rpm", &["-qa", "--queryformat", "%{NAME} %{VERSION}-%{RELEASE}\\n"])
            .await?;
        Ok(parse_installed(&output))
    }
}

/// Parse RFC822-style `apt-cache dumpavail` blocks
pub fn parse_dumpavail(dump: &str) -> Vec<Package> {
    let mut packages = Vec::new();

    for block in dump.split("\n\n").filter(|block| !block.trim().is_empty()) {
        let mut package = Package::default();
        let mut description_lines: Vec<String> = vec![];
        let mut in_description = false;

        for line in block.lines() {
            if in_description && line.starts_with(' ') {
                description_lines.push(line.trim().to_owned());
                continue;
            }
            in_description = false;

            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match field {
                "Package" => package.name = value.to_owned(),
                "Version" => package.version = value.to_owned(),
                "Section" => package.section = value.to_owned(),
                "Maintainer" => package.maintainer = value.to_owned(),
                "Architecture" => package.architecture = value.to_owned(),
                "Installed-Size" => {
                    package.installed_size = value.parse().unwrap_or_default();
                }
                "Size" => package.download_size = value.parse().unwrap_or_default(),
                "Filename" => package.filename = value.to_owned(),
                "Depends" => package.depends = parse_relation_list(value),
                "Provides" => package.provides = parse_relation_list(value),
                "Description" => {
                    description_lines.push(value.to_owned());
                    in_description = true;
                }
                _ => {}
            }
        }

        if package.name.is_empty() {
            continue;
        }
        package.description = description_lines.join("\n");
        package.package_type = PackageType::System;
        packages.push(package);
    }

    packages
}

/// `a (>= 1), b | c` → bare names
fn parse_relation_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .flat_map(|alternative| alternative.split('|'))
        .filter_map(|item| {
            let name = item.trim().split_whitespace().next()?;
            (!name.is_empty()).then(|| name.to_owned())
        })
        .collect()
}

/// Extract the changes summary and affected names from simulation output
pub fn parse_simulation(output: &str) -> Simulation {
    let mut changes = Changes::default();

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("Inst ") {
            if let Some(name) = rest.split_whitespace().next() {
                if rest.contains('[') {
                    changes.upgraded_packages.push(name.to_owned());
                } else {
                    changes.new_installed_packages.push(name.to_owned());
                }
            }
        } else if let Some(rest) = line.strip_prefix("Remv ") {
            if let Some(name) = rest.split_whitespace().next() {
                changes.removed_packages.push(name.to_owned());
            }
        } else if line.contains("upgraded") && line.contains("newly installed") {
            // "2 upgraded, 1 newly installed, 0 removed and 3 not upgraded."
            let numbers: Vec<usize> = line
                .split(|c: char| !c.is_ascii_digit())
                .filter(|chunk| !chunk.is_empty())
                .filter_map(|chunk| chunk.parse().ok())
                .collect();
            if numbers.len() >= 4 {
                changes.upgraded_count = numbers[0];
                changes.newly_installed_count = numbers[1];
                changes.removed_count = numbers[2];
                changes.not_upgraded_count = numbers[3];
            }
        }
    }

    if changes.upgraded_count == 0 && changes.newly_installed_count == 0 && changes.removed_count == 0
    {
        changes.upgraded_count = changes.upgraded_packages.len();
        changes.newly_installed_count = changes.new_installed_packages.len();
        changes.removed_count = changes.removed_packages.len();
    }

    Simulation { changes }
}

/// Build the name → version map, collapsing multi-arch name prefixes
pub fn parse_installed(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, version) = line.trim().split_once(' ')?;
            let name = ARCH_PREFIXES
                .iter()
                .find_map(|prefix| name.strip_prefix(prefix))
                .unwrap_or(name);
            Some((name.to_owned(), version.to_owned()))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dumpavail_blocks() {
        let dump = "\
Package: hello
Version: 2.10-alt1
Section: devel
Architecture: x86_64
Installed-Size: 150
Size: 52
Maintainer: Example <e@example.org>
Depends: libc (>= 2.17), libhello | libworld
Provides: greeter
Description: friendly greeter
 Prints a greeting.

Package: vim-console
Version: 9.0-alt2
Section: editors
Description: console vim
";

        let packages = parse_dumpavail(dump);
        assert_eq!(packages.len(), 2);

        let hello = &packages[0];
        assert_eq!(hello.name, "hello");
        assert_eq!(hello.version, "2.10-alt1");
        assert_eq!(hello.depends, vec!["libc", "libhello", "libworld"]);
        assert_eq!(hello.provides, vec!["greeter"]);
        assert_eq!(hello.description, "friendly greeter\nPrints a greeting.");
        assert_eq!(hello.download_size, 52);
    }

    #[test]
    fn simulation_summary() {
        let output = "\
Inst hello (2.10-alt1 Sisyphus)
Inst zlib [1.2-alt1] (1.3-alt1 Sisyphus)
Remv nano [7.2-alt1]
1 upgraded, 1 newly installed, 1 removed and 0 not upgraded.
";
        let simulation = parse_simulation(output);
        assert_eq!(simulation.changes.new_installed_packages, vec!["hello"]);
        assert_eq!(simulation.changes.upgraded_packages, vec!["zlib"]);
        assert_eq!(simulation.changes.removed_packages, vec!["nano"]);
        assert_eq!(simulation.changes.upgraded_count, 1);
        assert_eq!(simulation.changes.newly_installed_count, 1);
        assert_eq!(simulation.changes.removed_count, 1);
        assert_eq!(simulation.changes.not_upgraded_count, 0);
        assert!(!simulation.changes.is_noop());
    }

    #[test]
    fn installed_map_normalises_arch_prefixes() {
        let output = "\
hello 2.10-alt1
i586-wine 8.0-alt3
glibc 2.38-alt1
";
        let installed = parse_installed(output);
        assert_eq!(installed.get("hello").unwrap(), "2.10-alt1");
        assert_eq!(installed.get("wine").unwrap(), "8.0-alt3");
        assert!(!installed.contains_key("i586-wine"));
    }
}
