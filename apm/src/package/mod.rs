// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

mod render;

/// Origin of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    #[default]
    System,
    #[strum(serialize = "third-party")]
    #[serde(rename = "third-party")]
    ThirdParty,
}

/// A package known to the mirror.
///
/// Identity is (name, version). Presence fields are refreshed after every
/// mutation; everything else comes from the native package source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub section: String,
    pub maintainer: String,
    pub architecture: String,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    pub installed_size: u64,
    pub download_size: u64,
    pub filename: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub changelog: String,
    /// Application catalogue component, when the package ships a desktop app
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_component: Option<String>,
    #[serde(rename = "typePackage")]
    pub package_type: PackageType,
}

/// Simulation summary returned by the native tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub upgraded_count: usize,
    pub newly_installed_count: usize,
    pub removed_count: usize,
    pub not_upgraded_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgraded_packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_installed_packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_packages: Vec<String>,
}

impl Changes {
    /// True when the simulation found nothing to do
    pub fn is_noop(&self) -> bool {
        self.upgraded_count == 0 && self.newly_installed_count == 0 && self.removed_count == 0
    }

    /// Every package touched by this change set
    pub fn affected(&self) -> impl Iterator<Item = &String> {
        self.upgraded_packages
            .iter()
            .chain(&self.new_installed_packages)
            .chain(&self.removed_packages)
    }
}

/// A user supplied package token, split on its `+`/`-` suffix.
///
/// `name+` always means install and `name-` always means remove, whatever
/// operation the token arrived through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    Install(String),
    Remove(String),
}

impl Request {
    /// Interpret a raw token in the context of an install-like operation
    pub fn parse_for_install(token: &str) -> Self {
        match token.strip_suffix('-') {
            Some(name) if !name.is_empty() => Self::Remove(name.to_owned()),
            _ => Self::Install(token.trim_end_matches('+').to_owned()),
        }
    }

    /// Interpret a raw token in the context of a remove-like operation
    pub fn parse_for_remove(token: &str) -> Self {
        match token.strip_suffix('+') {
            Some(name) if !name.is_empty() => Self::Install(name.to_owned()),
            _ => Self::Remove(token.trim_end_matches('-').to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Install(name) | Self::Remove(name) => name,
        }
    }

    /// True when the name carries a glob wildcard
    pub fn is_wildcard(&self) -> bool {
        self.name().contains('*')
    }

    /// Rebuild a request with the same polarity for an expanded name
    pub fn with_name(&self, name: String) -> Self {
        match self {
            Self::Install(_) => Self::Install(name),
            Self::Remove(_) => Self::Remove(name),
        }
    }
}

/// Split a token list into disjoint (install, remove) name sets, preserving
/// user ordering and dropping duplicates.
pub fn split_requests(requests: impl IntoIterator<Item = Request>) -> (Vec<String>, Vec<String>) {
    let mut install = Vec::new();
    let mut remove = Vec::new();
    let mut seen = HashSet::new();

    for request in requests {
        if !seen.insert(request.clone()) {
            continue;
        }
        match request {
            Request::Install(name) => install.push(name),
            Request::Remove(name) => remove.push(name),
        }
    }

    (install, remove)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn suffix_resplit() {
        assert_eq!(
            Request::parse_for_install("vim-"),
            Request::Remove("vim".into())
        );
        assert_eq!(
            Request::parse_for_install("vim+"),
            Request::Install("vim".into())
        );
        assert_eq!(
            Request::parse_for_remove("curl+"),
            Request::Install("curl".into())
        );
        assert_eq!(
            Request::parse_for_remove("curl"),
            Request::Remove("curl".into())
        );
        // A bare `-` is not a suffix
        assert_eq!(Request::parse_for_install("-"), Request::Install("-".into()));
    }

    #[test]
    fn split_dedupes_but_keeps_order() {
        let (install, remove) = split_requests([
            Request::Install("b".into()),
            Request::Install("a".into()),
            Request::Install("b".into()),
            Request::Remove("c".into()),
        ]);
        assert_eq!(install, vec!["b", "a"]);
        assert_eq!(remove, vec!["c"]);
    }

    #[test]
    fn noop_changes() {
        let mut changes = Changes::default();
        assert!(changes.is_noop());
        changes.newly_installed_count = 1;
        assert!(!changes.is_noop());
    }
}
