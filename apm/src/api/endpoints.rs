// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Declarative endpoint catalogue.
//!
//! Routes are registered explicitly in the router; this table is the
//! single source for OpenAPI generation, permission documentation and the
//! API metadata listing.

use super::auth::Permission;

/// Where a parameter is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum In {
    Path,
    Query,
    Body,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub location: In,
    /// OpenAPI primitive type name
    pub kind: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub name: &'static str,
    pub method: &'static str,
    pub path: &'static str,
    pub permission: Permission,
    pub tags: &'static [&'static str],
    /// Whether `background=true` promotes the call
    pub background: bool,
    pub params: &'static [Param],
    /// Response payload schema name
    pub response: &'static str,
}

const fn query(name: &'static str, kind: &'static str) -> Param {
    Param {
        name,
        location: In::Query,
        kind,
        required: false,
    }
}

const fn body(name: &'static str, kind: &'static str, required: bool) -> Param {
    Param {
        name,
        location: In::Body,
        kind,
        required,
    }
}

pub const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        name: "Health",
        method: "GET",
        path: "/api/v1/health",
        permission: Permission::Read,
        tags: &["system"],
        background: false,
        params: &[],
        response: "Health",
    },
    Endpoint {
        name: "List",
        method: "GET",
        path: "/api/v1/packages",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[
            query("sort", "string"),
            query("order", "string"),
            query("limit", "integer"),
            query("offset", "integer"),
            query("filters", "array"),
            query("forceUpdate", "boolean"),
        ],
        response: "Packages",
    },
    Endpoint {
        name: "Info",
        method: "GET",
        path: "/api/v1/packages/{name}",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[
            Param {
                name: "name",
                location: In::Path,
                kind: "string",
                required: true,
            },
            query("full", "boolean"),
        ],
        response: "Info",
    },
    Endpoint {
        name: "Search",
        method: "GET",
        path: "/api/v1/packages/search",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[
            Param {
                name: "q",
                location: In::Query,
                kind: "string",
                required: true,
            },
            query("installed", "boolean"),
        ],
        response: "Packages",
    },
    Endpoint {
        name: "GetFilterFields",
        method: "GET",
        path: "/api/v1/packages/filter-fields",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[],
        response: "FilterFields",
    },
    Endpoint {
        name: "Install",
        method: "POST",
        path: "/api/v1/packages/install",
        permission: Permission::Manage,
        tags: &["packages"],
        background: true,
        params: &[
            body("packages", "array", true),
            body("background", "boolean", false),
        ],
        response: "Message",
    },
    Endpoint {
        name: "Remove",
        method: "POST",
        path: "/api/v1/packages/remove",
        permission: Permission::Manage,
        tags: &["packages"],
        background: true,
        params: &[
            body("packages", "array", true),
            body("purge", "boolean", false),
            body("depends", "boolean", false),
            body("background", "boolean", false),
        ],
        response: "Message",
    },
    Endpoint {
        name: "CheckInstall",
        method: "POST",
        path: "/api/v1/packages/check-install",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[body("packages", "array", true)],
        response: "Changes",
    },
    Endpoint {
        name: "CheckRemove",
        method: "POST",
        path: "/api/v1/packages/check-remove",
        permission: Permission::Read,
        tags: &["packages"],
        background: false,
        params: &[body("packages", "array", true)],
        response: "Changes",
    },
    Endpoint {
        name: "CheckUpgrade",
        method: "GET",
        path: "/api/v1/system/check-upgrade",
        permission: Permission::Read,
        tags: &["system"],
        background: false,
        params: &[],
        response: "Changes",
    },
    Endpoint {
        name: "Update",
        method: "POST",
        path: "/api/v1/system/update",
        permission: Permission::Manage,
        tags: &["system"],
        background: true,
        params: &[query("background", "boolean")],
        response: "Message",
    },
    Endpoint {
        name: "Upgrade",
        method: "POST",
        path: "/api/v1/system/upgrade",
        permission: Permission::Manage,
        tags: &["system"],
        background: true,
        params: &[query("background", "boolean")],
        response: "Message",
    },
    Endpoint {
        name: "ImageStatus",
        method: "GET",
        path: "/api/v1/image/status",
        permission: Permission::Read,
        tags: &["image"],
        background: false,
        params: &[],
        response: "ImageStatus",
    },
    Endpoint {
        name: "ImageUpdate",
        method: "POST",
        path: "/api/v1/image/update",
        permission: Permission::Manage,
        tags: &["image"],
        background: true,
        params: &[query("background", "boolean")],
        response: "ImageStatus",
    },
    Endpoint {
        name: "ImageApply",
        method: "POST",
        path: "/api/v1/image/apply",
        permission: Permission::Manage,
        tags: &["image"],
        background: true,
        params: &[query("background", "boolean")],
        response: "ImageStatus",
    },
    Endpoint {
        name: "ImageHistory",
        method: "GET",
        path: "/api/v1/image/history",
        permission: Permission::Read,
        tags: &["image"],
        background: false,
        params: &[
            query("name", "string"),
            query("limit", "integer"),
            query("offset", "integer"),
        ],
        response: "Histories",
    },
    Endpoint {
        name: "ImageGetConfig",
        method: "GET",
        path: "/api/v1/image/config",
        permission: Permission::Read,
        tags: &["image"],
        background: false,
        params: &[],
        response: "Config",
    },
    Endpoint {
        name: "ImageSaveConfig",
        method: "PUT",
        path: "/api/v1/image/config",
        permission: Permission::Manage,
        tags: &["image"],
        background: false,
        params: &[body("config", "object", true)],
        response: "Message",
    },
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_is_consistent() {
        let mut seen = std::collections::HashSet::new();
        for endpoint in ENDPOINTS {
            assert!(endpoint.path.starts_with("/api/v1"), "{}", endpoint.path);
            assert!(
                seen.insert((endpoint.method, endpoint.path)),
                "duplicate route {} {}",
                endpoint.method,
                endpoint.path,
            );
            assert!(!endpoint.tags.is_empty());
            for param in endpoint.params {
                if param.location == In::Path {
                    assert!(endpoint.path.contains(&format!("{{{}}}", param.name)));
                }
            }
        }
    }

    #[test]
    fn mutations_require_manage() {
        for endpoint in ENDPOINTS {
            if matches!(endpoint.method, "POST" | "PUT" | "PATCH" | "DELETE")
                && !endpoint.name.starts_with("Check")
            {
                assert_eq!(
                    endpoint.permission,
                    Permission::Manage,
                    "{} must require manage",
                    endpoint.name,
                );
            }
        }
    }
}
