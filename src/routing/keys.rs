//! Key and path layout for one route.
//!
//! # Responsibilities
//! - Compute the six names/paths that represent a route in a backing store
//! - Normalize the KV root prefix
//!
//! # Design Decisions
//! - `Slash` schemas produce fully-qualified KV keys under the root prefix
//! - `Dot` schemas produce dotted document paths for the flat file; the
//!   transport and router→service links live inside the document, so those
//!   two paths are left empty
//! - Router and service share the alias

use serde::{Deserialize, Serialize};

use crate::routing::alias::to_alias;

/// Path separator of a key schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Separator {
    /// Hierarchical KV keys (`traefik/http/routers/x/rule`).
    #[serde(rename = "/")]
    Slash,
    /// Dotted flat-file document paths (`http.routers.x`).
    #[serde(rename = ".")]
    Dot,
}

impl Separator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Separator::Slash => "/",
            Separator::Dot => ".",
        }
    }
}

/// Whether a normalized prefix may start with the separator.
///
/// Consul rejects keys with a leading `/`, etcd does not care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadingSeparator {
    Keep,
    Strip,
}

/// Normalize a KV root prefix: always ends with `/`, optionally never
/// starts with one. Idempotent.
pub fn normalize_prefix(raw: &str, leading: LeadingSeparator) -> String {
    let mut prefix = raw.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    if leading == LeadingSeparator::Strip {
        if let Some(stripped) = prefix.strip_prefix('/') {
            prefix = stripped.to_string();
        }
    }
    prefix
}

/// How route keys are laid out in a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
    separator: Separator,
}

impl KeySchema {
    /// Schema for the flat-file document.
    pub fn flat_file() -> Self {
        Self {
            prefix: String::new(),
            separator: Separator::Dot,
        }
    }

    /// Schema for a hierarchical KV store. `prefix` must already be normalized.
    pub fn kv(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: Separator::Slash,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    fn qualified(&self, parts: &[&str]) -> String {
        let sep = self.separator.as_str();
        match self.separator {
            Separator::Slash => format!("{}{}", self.prefix, parts.join(sep)),
            Separator::Dot => parts.join(sep),
        }
    }

    /// Subtree holding every key of the router named `alias`.
    pub fn router_root(&self, alias: &str) -> String {
        let sep = self.separator.as_str();
        format!("{}{sep}", self.qualified(&["http", "routers", alias]))
    }

    /// Subtree holding every key of the service named `alias`.
    pub fn service_root(&self, alias: &str) -> String {
        let sep = self.separator.as_str();
        format!("{}{sep}", self.qualified(&["http", "services", alias]))
    }

    /// Key of the `index`-th entry point of a router.
    pub fn entrypoint_path(&self, alias: &str, index: usize) -> String {
        let index = index.to_string();
        self.qualified(&["http", "routers", alias, "entrypoints", &index])
    }
}

/// Every name and path generated for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteKeys {
    pub backend_alias: String,
    pub backend_url_path: String,
    pub backend_weight_path: String,
    pub frontend_alias: String,
    pub frontend_backend_path: String,
    pub frontend_rule_path: String,
}

/// Compute the keys for a canonical route spec.
pub fn generate_route_keys(canonical: &str, designator: &str, schema: &KeySchema) -> RouteKeys {
    let backend_alias = to_alias(canonical, designator);
    let frontend_alias = backend_alias.clone();
    let service = backend_alias.as_str();
    let router = frontend_alias.as_str();

    match schema.separator {
        Separator::Slash => RouteKeys {
            backend_url_path: schema.qualified(&[
                "http", "services", service, "loadbalancer", "servers", "0", "url",
            ]),
            backend_weight_path: schema.qualified(&[
                "http", "services", service, "loadbalancer", "serverstransport",
            ]),
            frontend_backend_path: schema.qualified(&["http", "routers", router, "service"]),
            frontend_rule_path: schema.qualified(&["http", "routers", router, "rule"]),
            backend_alias,
            frontend_alias,
        },
        Separator::Dot => RouteKeys {
            backend_url_path: schema.qualified(&["http", "services", service, "loadbalancer"]),
            backend_weight_path: String::new(),
            frontend_backend_path: String::new(),
            frontend_rule_path: schema.qualified(&["http", "routers", router]),
            backend_alias,
            frontend_alias,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_keys() {
        let schema = KeySchema::kv("traefik/");
        let keys = generate_route_keys("/user/alice/", "", &schema);

        assert_eq!(keys.backend_alias, "-user-alice-");
        assert_eq!(keys.frontend_alias, keys.backend_alias);
        assert_eq!(
            keys.backend_url_path,
            "traefik/http/services/-user-alice-/loadbalancer/servers/0/url"
        );
        assert_eq!(
            keys.backend_weight_path,
            "traefik/http/services/-user-alice-/loadbalancer/serverstransport"
        );
        assert_eq!(
            keys.frontend_backend_path,
            "traefik/http/routers/-user-alice-/service"
        );
        assert_eq!(
            keys.frontend_rule_path,
            "traefik/http/routers/-user-alice-/rule"
        );
    }

    #[test]
    fn test_flat_file_keys() {
        let keys = generate_route_keys("host.tld/a", "", &KeySchema::flat_file());

        assert_eq!(keys.backend_url_path, "http.services.host_2etld-a.loadbalancer");
        assert_eq!(keys.frontend_rule_path, "http.routers.host_2etld-a");
        assert!(keys.backend_weight_path.is_empty());
        assert!(keys.frontend_backend_path.is_empty());
    }

    #[test]
    fn test_keys_are_deterministic() {
        let schema = KeySchema::kv("/traefik/");
        let a = generate_route_keys("/x/y", "d", &schema);
        let b = generate_route_keys("/x/y", "d", &schema);
        assert_eq!(a, b);
        assert!(a.frontend_rule_path.starts_with("/traefik/http/routers/d-x-y/"));
    }

    #[test]
    fn test_subtree_roots() {
        let schema = KeySchema::kv("traefik/");
        assert_eq!(schema.router_root("a"), "traefik/http/routers/a/");
        assert_eq!(schema.service_root("a"), "traefik/http/services/a/");
        assert_eq!(schema.entrypoint_path("a", 1), "traefik/http/routers/a/entrypoints/1");

        let keys = generate_route_keys("/a/", "", &schema);
        assert!(keys.frontend_rule_path.starts_with(&schema.router_root("-a-")));
        assert!(keys.backend_url_path.starts_with(&schema.service_root("-a-")));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("traefik", LeadingSeparator::Keep), "traefik/");
        assert_eq!(normalize_prefix("/traefik", LeadingSeparator::Keep), "/traefik/");
        assert_eq!(normalize_prefix("/traefik", LeadingSeparator::Strip), "traefik/");
        assert_eq!(normalize_prefix("", LeadingSeparator::Strip), "");
        assert_eq!(normalize_prefix("", LeadingSeparator::Keep), "/");
    }

    #[test]
    fn test_normalize_prefix_idempotent() {
        for leading in [LeadingSeparator::Keep, LeadingSeparator::Strip] {
            for raw in ["", "/", "a", "/a/", "a/b"] {
                let once = normalize_prefix(raw, leading);
                assert_eq!(normalize_prefix(&once, leading), once);
            }
        }
    }
}
