// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Read-only view of the bootable-container state, parsed from the
//! switcher's JSON status output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `image: transport` pair as reported by the switcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub image: String,
    pub transport: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageState {
    pub image: ImageReference,
    #[serde(default)]
    pub image_digest: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootEntry {
    #[serde(default)]
    pub image: Option<ImageState>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub staged: Option<BootEntry>,
    #[serde(default)]
    pub booted: Option<BootEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub status: Status,
}

/// Flattened snapshot used by status responses and change detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostImage {
    pub booted_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_image: Option<String>,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    pub transport: String,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HostImage {
    /// Extract the snapshot from raw `status --json` output
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let document: StatusDocument = serde_json::from_str(json)?;

        let booted = document.status.booted.unwrap_or_default();
        let image = booted.image.unwrap_or_default();
        let staged_image = document
            .status
            .staged
            .and_then(|entry| entry.image)
            .map(|state| state.image.image);

        Ok(Self {
            booted_image: image.image.image,
            staged_image,
            pinned: booted.pinned,
            store: booted.store,
            transport: image.image.transport,
            digest: image.image_digest,
            timestamp: image.timestamp,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STATUS: &str = r#"
    {
      "status": {
        "staged": null,
        "booted": {
          "image": {
            "image": {
              "image": "registry.altlinux.org/sisyphus/base:latest",
              "transport": "registry"
            },
            "imageDigest": "sha256:cafe",
            "timestamp": "2025-05-01T10:00:00Z"
          },
          "pinned": false,
          "store": "ostreeContainer"
        }
      }
    }
    "#;

    #[test]
    fn parse_booted_snapshot() {
        let host = HostImage::parse(STATUS).unwrap();
        assert_eq!(host.booted_image, "registry.altlinux.org/sisyphus/base:latest");
        assert_eq!(host.transport, "registry");
        assert_eq!(host.digest, "sha256:cafe");
        assert_eq!(host.staged_image, None);
        assert!(!host.pinned);
    }

    #[test]
    fn parse_tolerates_missing_entries() {
        let host = HostImage::parse(r#"{"status":{}}"#).unwrap();
        assert!(host.booted_image.is_empty());
    }
}
