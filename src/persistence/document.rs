//! Flat-file document layout.
//!
//! ```toml
//! [http.routers.-a-]
//! rule = "PathPrefix(`/a/`)"
//! service = "-a-"
//!
//! [[http.services.-a-.loadbalancer.servers]]
//! url = "http://10.0.0.1:8000"
//!
//! [routekv]
//! count = 1
//!
//! [routekv.routes.-a-]
//! data = "{}"
//! routespec = "/a/"
//! target = "http://10.0.0.1:8000"
//! updated_at = 1700000000
//! # routekv end 231
//! ```
//!
//! The `routekv` section is ignored by the proxy and is what the table is
//! rebuilt from. The last line is an end marker carrying the byte length of
//! everything before it; a file cut short at any byte either lacks the
//! marker or fails the length check.

use std::collections::BTreeSet;
use std::fmt::Write;

use serde::Deserialize;
use toml::{Table, Value};

use crate::config::ProviderConfig;
use crate::persistence::{PersistenceError, PersistenceResult};
use crate::routing::KeySchema;
use crate::table::{RouteRecord, RoutingTable};

/// Root section holding route metadata.
pub const META_SECTION: &str = "routekv";

/// Start of the final line; followed by the body length in bytes.
const END_MARKER: &str = "# routekv end ";

/// Metadata entry of one route inside the file.
#[derive(Debug, Deserialize)]
struct FileRoute {
    routespec: String,
    target: String,
    /// JSON text; TOML has no null.
    data: String,
    updated_at: u64,
}

/// Render the full document for `table`.
///
/// Router and service tables are placed at the record's dotted key paths.
pub fn render(table: &RoutingTable, provider: &ProviderConfig) -> Table {
    let mut root = Table::new();
    subtable(&mut root, &["http", "routers"]);
    subtable(&mut root, &["http", "services"]);
    subtable(&mut root, &[META_SECTION, "routes"]);

    for record in table.iter() {
        let mut router = Table::new();
        router.insert("rule".into(), Value::String(record.rule.clone()));
        router.insert("service".into(), Value::String(record.keys.backend_alias.clone()));
        if !provider.entrypoints.is_empty() {
            let entrypoints = provider.entrypoints.iter().cloned().map(Value::String).collect();
            router.insert("entryPoints".into(), Value::Array(entrypoints));
        }
        insert_path(&mut root, &record.keys.frontend_rule_path, router);

        let mut server = Table::new();
        server.insert("url".into(), Value::String(record.target.clone()));
        let mut balancer = Table::new();
        balancer.insert("servers".into(), Value::Array(vec![Value::Table(server)]));
        if let Some(transport) = &provider.servers_transport {
            balancer.insert("serversTransport".into(), Value::String(transport.clone()));
        }
        insert_path(&mut root, &record.keys.backend_url_path, balancer);

        let mut meta = Table::new();
        meta.insert("routespec".into(), Value::String(record.routespec.clone()));
        meta.insert("target".into(), Value::String(record.target.clone()));
        meta.insert("data".into(), Value::String(record.data.to_string()));
        meta.insert("updated_at".into(), Value::Integer(record.updated_at as i64));
        subtable(&mut root, &[META_SECTION, "routes"]).insert(record.alias.clone(), Value::Table(meta));
    }

    subtable(&mut root, &[META_SECTION]).insert("count".into(), Value::Integer(table.len() as i64));
    root
}

/// Serialize the document for `table` and terminate it with the end marker.
pub fn to_text(table: &RoutingTable, provider: &ProviderConfig) -> PersistenceResult<String> {
    Ok(seal(toml::to_string(&render(table, provider))?))
}

/// Append the end marker to a serialized body.
fn seal(mut body: String) -> String {
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    let len = body.len();
    // Writing to a String cannot fail
    let _ = writeln!(body, "{END_MARKER}{len}");
    body
}

/// Check the end marker is the last line and matches the body length.
fn check_sealed(text: &str) -> Result<(), String> {
    let missing = || "missing end marker, file is truncated".to_string();

    let without_newline = text.strip_suffix('\n').ok_or_else(missing)?;
    let body_len = without_newline.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let recorded: usize = without_newline[body_len..]
        .strip_prefix(END_MARKER)
        .and_then(|len| len.parse().ok())
        .ok_or_else(missing)?;

    if recorded != body_len {
        return Err(format!(
            "end marker records {recorded} bytes, found {body_len}"
        ));
    }
    Ok(())
}

/// Parse a document written by [`to_text`] back into a table.
///
/// Records are rebuilt from the metadata section with `schema` and
/// `designator`, so their keys follow the current configuration.
pub fn parse(
    text: &str,
    location: &str,
    schema: &KeySchema,
    designator: &str,
) -> PersistenceResult<RoutingTable> {
    let root: Table = text.parse().map_err(|e: toml::de::Error| PersistenceError::Parse {
        location: location.to_string(),
        source: Box::new(e),
    })?;
    let corrupt = |reason: String| PersistenceError::Corrupt {
        location: location.to_string(),
        reason,
    };
    check_sealed(text).map_err(&corrupt)?;

    let meta = section(&root, &[META_SECTION])
        .map_err(&corrupt)?
        .ok_or_else(|| corrupt(format!("missing [{META_SECTION}] section")))?;
    let count = meta
        .get("count")
        .and_then(Value::as_integer)
        .ok_or_else(|| corrupt(format!("missing {META_SECTION}.count")))?;

    let routes = section(meta, &["routes"]).map_err(&corrupt)?.cloned().unwrap_or_default();
    let routers = section(&root, &["http", "routers"]).map_err(&corrupt)?.cloned().unwrap_or_default();
    let services = section(&root, &["http", "services"]).map_err(&corrupt)?.cloned().unwrap_or_default();

    if routes.len() as i64 != count {
        return Err(corrupt(format!(
            "expected {count} routes, found {}",
            routes.len()
        )));
    }

    let meta_aliases: BTreeSet<&String> = routes.keys().collect();
    let router_aliases: BTreeSet<&String> = routers.keys().collect();
    let service_aliases: BTreeSet<&String> = services.keys().collect();
    if meta_aliases != router_aliases || meta_aliases != service_aliases {
        return Err(corrupt("routers, services and route records disagree".to_string()));
    }

    let mut table = RoutingTable::new();
    for (alias, value) in routes {
        let route: FileRoute = value.try_into().map_err(|e: toml::de::Error| PersistenceError::Parse {
            location: format!("{location} [{META_SECTION}.routes.{alias}]"),
            source: Box::new(e),
        })?;
        let data: serde_json::Value =
            serde_json::from_str(&route.data).map_err(|e| PersistenceError::Parse {
                location: format!("{location} [{META_SECTION}.routes.{alias}].data"),
                source: Box::new(e),
            })?;

        let record = RouteRecord::build(
            &route.routespec,
            &route.target,
            data,
            route.updated_at,
            schema,
            designator,
        )
        .map_err(|e| corrupt(format!("route {alias}: {e}")))?;

        if table.insert(record).is_some() {
            return Err(corrupt(format!("duplicate route spec '{}'", route.routespec)));
        }
    }

    Ok(table)
}

/// Get or create the nested table at `path`.
fn subtable<'a>(root: &'a mut Table, path: &[&str]) -> &'a mut Table {
    let mut current = root;
    for segment in path {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        current = match entry {
            Value::Table(t) => t,
            _ => unreachable!("entry was just made a table"),
        };
    }
    current
}

/// Insert `value` at a dotted path, creating intermediate tables.
fn insert_path(root: &mut Table, dotted: &str, value: Table) {
    let segments: Vec<&str> = dotted.split('.').collect();
    if let Some((last, parents)) = segments.split_last() {
        subtable(root, parents).insert(last.to_string(), Value::Table(value));
    }
}

/// Look up a nested table. `Ok(None)` if absent, `Err` if not a table.
fn section<'a>(root: &'a Table, path: &[&str]) -> Result<Option<&'a Table>, String> {
    let mut current = root;
    for (i, segment) in path.iter().enumerate() {
        match current.get(*segment) {
            None => return Ok(None),
            Some(Value::Table(t)) => current = t,
            Some(_) => return Err(format!("{} is not a table", path[..=i].join("."))),
        }
    }
    Ok(Some(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_with(specs: &[(&str, &str)]) -> RoutingTable {
        specs
            .iter()
            .map(|(spec, target)| {
                RouteRecord::build(
                    spec,
                    target,
                    json!({"spec": spec}),
                    1_700_000_000,
                    &KeySchema::flat_file(),
                    "",
                )
                    .unwrap()
            })
            .collect()
    }

    fn render_text(table: &RoutingTable, provider: &ProviderConfig) -> String {
        to_text(table, provider).unwrap()
    }

    #[test]
    fn test_render_layout() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000"), ("h.tld/b", "http://10.0.0.2:8000")]);
        let doc = render(&table, &ProviderConfig::default());

        let router = &doc["http"]["routers"]["-a-"];
        assert_eq!(router["rule"].as_str(), Some("PathPrefix(`/a/`)"));
        assert_eq!(router["service"].as_str(), Some("-a-"));
        assert!(router.get("entryPoints").is_none());

        let servers = doc["http"]["services"]["h_2etld-b"]["loadbalancer"]["servers"]
            .as_array()
            .unwrap();
        assert_eq!(servers[0]["url"].as_str(), Some("http://10.0.0.2:8000"));

        assert_eq!(doc[META_SECTION]["count"].as_integer(), Some(2));
        assert_eq!(doc[META_SECTION]["routes"]["-a-"]["routespec"].as_str(), Some("/a/"));
    }

    #[test]
    fn test_render_provider_options() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000")]);
        let provider = ProviderConfig {
            entrypoints: vec!["web".to_string()],
            servers_transport: Some("insecure".to_string()),
            ..ProviderConfig::default()
        };
        let doc = render(&table, &provider);

        assert_eq!(
            doc["http"]["routers"]["-a-"]["entryPoints"].as_array().unwrap()[0].as_str(),
            Some("web")
        );
        assert_eq!(
            doc["http"]["services"]["-a-"]["loadbalancer"]["serversTransport"].as_str(),
            Some("insecure")
        );
    }

    #[test]
    fn test_parse_rebuilds_table() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000"), ("/", "http://10.0.0.3:1")]);
        let text = render_text(&table, &ProviderConfig::default());

        let loaded = parse(&text, "rules.toml", &KeySchema::flat_file(), "").unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_parse_empty_table() {
        let text = render_text(&RoutingTable::new(), &ProviderConfig::default());
        let loaded = parse(&text, "rules.toml", &KeySchema::flat_file(), "").unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_parse_rejects_syntax_errors() {
        let err = parse("[http.routers\n", "rules.toml", &KeySchema::flat_file(), "").unwrap_err();
        assert!(matches!(err, PersistenceError::Parse { .. }));
    }

    #[test]
    fn test_parse_rejects_empty_file() {
        let err = parse("", "rules.toml", &KeySchema::flat_file(), "").unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[test]
    fn test_parse_rejects_every_truncation() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000"), ("/b/", "http://10.0.0.2:8000")]);
        let text = render_text(&table, &ProviderConfig::default());
        assert!(parse(&text, "rules.toml", &KeySchema::flat_file(), "").is_ok());

        // Cut at every byte, including inside the last timestamp
        for end in (0..text.len()).filter(|&end| text.is_char_boundary(end)) {
            let result = parse(&text[..end], "rules.toml", &KeySchema::flat_file(), "");
            assert!(result.is_err(), "truncation at byte {end} was accepted");
        }
    }

    #[test]
    fn test_parse_rejects_cut_inside_last_value() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000"), ("/b/", "http://10.0.0.2:8000")]);
        let body = toml::to_string(&render(&table, &ProviderConfig::default())).unwrap();
        assert!(body.trim_end().ends_with("updated_at = 1700000000"));

        // Still valid TOML with consistent sections, only the marker catches it
        let cut = &body[..body.trim_end().len() - 5];
        let err = parse(cut, "rules.toml", &KeySchema::flat_file(), "").unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[test]
    fn test_parse_rejects_wrong_marker_length() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000")]);
        let text = render_text(&table, &ProviderConfig::default());
        let tampered = text.replacen("count = 1", "count = 1 ", 1);

        let err = parse(&tampered, "rules.toml", &KeySchema::flat_file(), "").unwrap_err();
        assert!(err.to_string().contains("end marker records"));
    }

    #[test]
    fn test_parse_rejects_inconsistent_sections() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000")]);
        let mut doc = render(&table, &ProviderConfig::default());
        subtable(&mut doc, &["http", "services"]).remove("-a-");
        let text = seal(toml::to_string(&doc).unwrap());

        let err = parse(&text, "rules.toml", &KeySchema::flat_file(), "").unwrap_err();
        assert!(err.to_string().contains("disagree"));
    }

    #[test]
    fn test_parse_recomputes_keys() {
        let table = table_with(&[("/a/", "http://10.0.0.1:8000")]);
        let text = render_text(&table, &ProviderConfig::default());

        let loaded = parse(&text, "rules.toml", &KeySchema::flat_file(), "x").unwrap();
        assert_eq!(loaded.get("/a/").unwrap().alias, "x-a-");
    }
}
