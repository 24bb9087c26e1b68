// SPDX-FileCopyrightText: Copyright © 2025 APM Developers
//
// SPDX-License-Identifier: MPL-2.0

//! OpenAPI document generation from the endpoint catalogue.

use serde_json::{json, Map, Value};

use super::auth::Permission;
use super::endpoints::{Endpoint, In, ENDPOINTS};
use crate::environment;

/// Build the full OpenAPI 3 document
pub fn document() -> Value {
    let mut paths = Map::new();

    for endpoint in ENDPOINTS {
        let entry = paths
            .entry(endpoint.path.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(methods) = entry {
            methods.insert(endpoint.method.to_lowercase(), operation(endpoint));
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "APM API",
            "description": "Atomic package manager HTTP surface",
            "version": environment::VERSION,
        },
        "servers": [{"url": "/"}],
        "paths": Value::Object(paths),
        "components": {
            "securitySchemes": {
                "bearer": {
                    "type": "http",
                    "scheme": "bearer",
                    "description": "Token format: `read:<secret>` or `manage:<secret>`",
                }
            },
            "schemas": schemas(),
        },
    })
}

fn operation(endpoint: &Endpoint) -> Value {
    let mut parameters = vec![];
    let mut body_properties = Map::new();
    let mut body_required = vec![];

    for param in endpoint.params {
        match param.location {
            In::Path | In::Query => {
                parameters.push(json!({
                    "name": param.name,
                    "in": if param.location == In::Path { "path" } else { "query" },
                    "required": param.required,
                    "schema": primitive(param.kind),
                }));
            }
            In::Body => {
                body_properties.insert(param.name.to_owned(), primitive(param.kind));
                if param.required {
                    body_required.push(Value::String(param.name.to_owned()));
                }
            }
        }
    }

    let mut operation = Map::new();
    operation.insert("operationId".into(), json!(endpoint.name));
    operation.insert("tags".into(), json!(endpoint.tags));
    operation.insert("parameters".into(), Value::Array(parameters));
    operation.insert(
        "security".into(),
        json!([{ "bearer": Vec::<String>::new() }]),
    );

    if !body_properties.is_empty() {
        operation.insert(
            "requestBody".into(),
            json!({
                "required": !body_required.is_empty(),
                "content": {
                    "application/json": {
                        "schema": {
                            "type": "object",
                            "properties": Value::Object(body_properties),
                            "required": body_required,
                        }
                    }
                }
            }),
        );
    }

    let mut responses = Map::new();
    responses.insert(
        "200".into(),
        json!({
            "description": "Success",
            "content": {
                "application/json": {
                    "schema": envelope(endpoint.response),
                }
            }
        }),
    );
    if endpoint.background {
        responses.insert(
            "202".into(),
            json!({
                "description": "Accepted, completion arrives on the event stream",
                "content": {
                    "application/json": {
                        "schema": envelope("Message"),
                    }
                }
            }),
        );
    }
    if endpoint.permission == Permission::Manage {
        responses.insert("401".into(), json!({"description": "Unauthorized"}));
    }
    operation.insert("responses".into(), Value::Object(responses));

    Value::Object(operation)
}

fn envelope(payload: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "data": { "$ref": format!("#/components/schemas/{payload}") },
            "error": { "type": "boolean" },
            "transaction": { "type": "string" },
        },
        "required": ["data", "error"],
    })
}

fn primitive(kind: &str) -> Value {
    match kind {
        "array" => json!({"type": "array", "items": {"type": "string"}}),
        "object" => json!({"type": "object"}),
        other => json!({ "type": other }),
    }
}

fn schemas() -> Value {
    let package = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "version": {"type": "string"},
            "section": {"type": "string"},
            "maintainer": {"type": "string"},
            "architecture": {"type": "string"},
            "installed": {"type": "boolean"},
            "installedVersion": {"type": "string"},
            "installedSize": {"type": "integer"},
            "downloadSize": {"type": "integer"},
            "filename": {"type": "string"},
            "description": {"type": "string"},
            "depends": {"type": "array", "items": {"type": "string"}},
            "provides": {"type": "array", "items": {"type": "string"}},
            "typePackage": {"type": "string", "enum": ["system", "third-party"]},
        },
        "required": ["name", "version"],
    });

    json!({
        "Health": {
            "type": "object",
            "properties": {
                "status": {"type": "string"},
                "version": {"type": "string"},
            },
        },
        "Message": {
            "type": "object",
            "properties": { "message": {"type": "string"} },
        },
        "Package": package,
        "Info": {
            "type": "object",
            "properties": { "package": {"$ref": "#/components/schemas/Package"} },
        },
        "Packages": {
            "type": "object",
            "properties": {
                "packages": {
                    "type": "array",
                    "items": {"$ref": "#/components/schemas/Package"},
                },
                "totalCount": {"type": "integer"},
            },
        },
        "Changes": {
            "type": "object",
            "properties": {
                "changes": {
                    "type": "object",
                    "properties": {
                        "upgradedCount": {"type": "integer"},
                        "newlyInstalledCount": {"type": "integer"},
                        "removedCount": {"type": "integer"},
                        "notUpgradedCount": {"type": "integer"},
                        "upgradedPackages": {"type": "array", "items": {"type": "string"}},
                        "newInstalledPackages": {"type": "array", "items": {"type": "string"}},
                        "removedPackages": {"type": "array", "items": {"type": "string"}},
                    },
                },
            },
        },
        "ImageStatus": {
            "type": "object",
            "properties": {
                "status": {
                    "type": "object",
                    "properties": {
                        "bootedImage": {"type": "string"},
                        "stagedImage": {"type": "string"},
                        "pinned": {"type": "boolean"},
                        "store": {"type": "string"},
                        "transport": {"type": "string"},
                        "digest": {"type": "string"},
                        "timestamp": {"type": "string", "format": "date-time"},
                    },
                },
            },
        },
        "Histories": {
            "type": "object",
            "properties": {
                "histories": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "imageName": {"type": "string"},
                            "config": {"type": "object"},
                            "date": {"type": "string", "format": "date-time"},
                        },
                    },
                },
                "totalCount": {"type": "integer"},
            },
        },
        "Config": {
            "type": "object",
            "properties": {
                "config": {
                    "type": "object",
                    "properties": {
                        "image": {"type": "string"},
                        "modules": {"type": "array", "items": {"type": "object"}},
                    },
                },
            },
        },
        "FilterFields": {
            "type": "object",
            "properties": {
                "fields": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "label": {"type": "string"},
                            "type": {"type": "string", "enum": ["string", "integer", "bool", "enum"]},
                            "values": {"type": "array", "items": {"type": "string"}},
                        },
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn document_covers_every_endpoint() {
        let document = document();
        let paths = document["paths"].as_object().unwrap();

        for endpoint in ENDPOINTS {
            let methods = paths
                .get(endpoint.path)
                .unwrap_or_else(|| panic!("missing path {}", endpoint.path));
            assert!(
                methods.get(endpoint.method.to_lowercase()).is_some(),
                "missing {} {}",
                endpoint.method,
                endpoint.path,
            );
        }

        assert!(document["components"]["securitySchemes"]["bearer"].is_object());
    }

    #[test]
    fn background_endpoints_document_202() {
        let document = document();
        let update = &document["paths"]["/api/v1/system/update"]["post"];
        assert!(update["responses"]["202"].is_object());
    }
}
