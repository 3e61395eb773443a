//! Route spec decoding and alias derivation.
//!
//! Aliases name both the router and the service of a route. They must be
//! safe as a TOML bare key, a KV path segment and a dotted-path segment, so
//! only ASCII letters, digits and `-` survive unescaped.

use std::fmt::Write;

/// Escape character for bytes outside the safe set.
const ESCAPE: char = '_';

/// Name used in place of the root spec `/`. Purely cosmetic.
const ROOT_ALIAS: &str = "public";

/// Percent-decode a route spec into its canonical form.
///
/// Invalid `%` sequences are kept as-is and invalid UTF-8 is replaced
/// with U+FFFD.
pub fn decode(routespec: &str) -> String {
    let bytes = urlencoding::decode_binary(routespec.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Percent-encode a route spec.
pub fn encode(routespec: &str) -> String {
    urlencoding::encode(routespec).into_owned()
}

/// Derive the alias for a canonical route spec.
///
/// `/` becomes `-`; a literal `-`, the escape character and every other
/// byte outside `[A-Za-z0-9]` becomes `_xx`. Escaping `-` keeps `/a-b` and
/// `/a/b` apart.
pub fn to_alias(canonical: &str, designator: &str) -> String {
    if canonical == "/" {
        return format!("{designator}{ROOT_ALIAS}");
    }

    let mut alias = String::with_capacity(designator.len() + canonical.len() * 2);
    alias.push_str(designator);

    for c in canonical.chars() {
        match c {
            '/' => alias.push('-'),
            c if c.is_ascii_alphanumeric() => alias.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    // Writing to a String cannot fail
                    let _ = write!(alias, "{ESCAPE}{byte:02x}");
                }
            }
        }
    }

    alias
}
