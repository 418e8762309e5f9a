//! SQL identifier checks and quoting.

use regex::Regex;
use std::sync::OnceLock;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Is `name` usable unquoted as a table or column name?
///
/// # Examples
///
/// ```
/// use polylink_core::is_valid_identifier;
///
/// assert!(is_valid_identifier("links_related_objects"));
/// assert!(!is_valid_identifier("1links"));
/// assert!(!is_valid_identifier("links; DROP TABLE x"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// # Examples
///
/// ```
/// use polylink_core::quote_ident;
///
/// assert_eq!(quote_ident("links"), "\"links\"");
/// assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
