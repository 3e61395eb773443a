//! Rule expression compilation.
//!
//! # Responsibilities
//! - Path-form spec (`/prefix/`) → `PathPrefix` rule
//! - Host-form spec (`host/prefix`) → `Host && PathPrefix` rule
//!
//! # Design Decisions
//! - Host is split at the first `/`; the path keeps its leading `/`
//! - Rule text is never escaped, so specs containing a backtick are rejected
//! - Host case is preserved; the proxy matches hosts case-insensitively

use crate::routing::MalformedRouteSpec;

/// Compile a canonical route spec into the proxy's rule expression.
pub fn compile_rule(canonical: &str) -> Result<String, MalformedRouteSpec> {
    if canonical.is_empty() {
        return Err(MalformedRouteSpec::new(canonical, "route spec is empty"));
    }
    if canonical.contains('`') {
        return Err(MalformedRouteSpec::new(
            canonical,
            "backticks cannot be quoted in a rule expression",
        ));
    }

    if canonical.starts_with('/') {
        return Ok(format!("PathPrefix(`{canonical}`)"));
    }

    let (host, path) = canonical
        .split_once('/')
        .ok_or_else(|| MalformedRouteSpec::new(canonical, "host-form spec has no path"))?;
    if host.is_empty() {
        return Err(MalformedRouteSpec::new(canonical, "host-form spec has an empty host"));
    }

    Ok(format!("Host(`{host}`) && PathPrefix(`/{path}`)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_rule() {
        assert_eq!(
            compile_rule("/proxy/path/").unwrap(),
            "PathPrefix(`/proxy/path/`)"
        );
        assert_eq!(compile_rule("/").unwrap(), "PathPrefix(`/`)");
    }

    #[test]
    fn test_host_rule() {
        assert_eq!(
            compile_rule("host.tld/proxy/path").unwrap(),
            "Host(`host.tld`) && PathPrefix(`/proxy/path`)"
        );
        assert_eq!(
            compile_rule("host.tld/").unwrap(),
            "Host(`host.tld`) && PathPrefix(`/`)"
        );
    }

    #[test]
    fn test_host_rule_splits_at_first_slash() {
        assert_eq!(
            compile_rule("a.b/c/d/").unwrap(),
            "Host(`a.b`) && PathPrefix(`/c/d/`)"
        );
    }

    #[test]
    fn test_malformed_specs() {
        let err = compile_rule("host.tld").unwrap_err();
        assert_eq!(err.spec, "host.tld");
        assert!(err.to_string().contains("no path"));

        assert!(compile_rule("").is_err());
        assert!(compile_rule("/path/`x`").is_err());
        assert!(compile_rule("ho`st/path").is_err());
    }
}
