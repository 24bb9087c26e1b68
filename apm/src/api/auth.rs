// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Bearer-token authentication for the HTTP surface.
//!
//! One shared secret, two permission levels. The token wire format is
//! `perm:secret`, so `manage:<secret>` unlocks mutations while
//! `read:<secret>` only unlocks queries. An unset secret means the daemon
//! trusts its local callers entirely.

use axum::http::HeaderMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Manage,
}

/// Successful authentication: what the caller may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub manage: bool,
}

/// Check the `Authorization` header against the configured secret
pub fn authorize(
    configured: Option<&str>,
    headers: &HeaderMap,
    required: Permission,
) -> Result<Grant, Denied> {
    let Some(secret) = configured.filter(|secret| !secret.is_empty()) else {
        // unauthenticated local use
        return Ok(Grant { manage: true });
    };

    let header = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or(Denied)?;
    let token = header.strip_prefix("Bearer ").ok_or(Denied)?;

    let (level, presented) = token.split_once(':').ok_or(Denied)?;
    if presented != secret {
        return Err(Denied);
    }

    let grant = match level {
        "manage" => Grant { manage: true },
        "read" => Grant { manage: false },
        _ => return Err(Denied),
    };

    if required == Permission::Manage && !grant.manage {
        return Err(Denied);
    }

    Ok(grant)
}

/// 401 with `WWW-Authenticate: Bearer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied;

#[cfg(test)]
mod test {
    use super::*;

    fn headers(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert("Authorization", value.parse().unwrap());
        }
        headers
    }

    #[test]
    fn unset_secret_trusts_caller() {
        let grant = authorize(None, &headers(None), Permission::Manage).unwrap();
        assert!(grant.manage);
    }

    #[test]
    fn missing_header_denied() {
        assert_eq!(
            authorize(Some("s3cret"), &headers(None), Permission::Read),
            Err(Denied)
        );
    }

    #[test]
    fn read_token_cannot_manage() {
        let headers = headers(Some("Bearer read:s3cret"));
        assert!(authorize(Some("s3cret"), &headers, Permission::Read).is_ok());
        assert_eq!(
            authorize(Some("s3cret"), &headers, Permission::Manage),
            Err(Denied)
        );
    }

    #[test]
    fn manage_token_grants_both() {
        let headers = headers(Some("Bearer manage:s3cret"));
        let grant = authorize(Some("s3cret"), &headers, Permission::Read).unwrap();
        assert!(grant.manage);
        assert!(authorize(Some("s3cret"), &headers, Permission::Manage).is_ok());
    }

    #[test]
    fn wrong_secret_denied() {
        let headers = headers(Some("Bearer manage:other"));
        assert_eq!(
            authorize(Some("s3cret"), &headers, Permission::Read),
            Err(Denied)
        );
    }
}
