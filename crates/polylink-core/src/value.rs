//! Dynamic column values and primary-key encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed column value.
///
/// Used for parameter binding, filter evaluation and result rows. Floating
/// point values are deliberately absent so that values can serve as keys
/// (`Eq + Hash + Ord`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Null,

    Bool(bool),

    BigInt(i64),

    Text(String),

    Bytes(Vec<u8>),

    /// Raw 16-byte UUID
    Uuid([u8; 16]),

    /// Days since 1970-01-01
    Date(i32),

    /// Microseconds since midnight
    Time(i64),

    /// Microseconds since the Unix epoch
    Timestamp(i64),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name used in type errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::BigInt(_) => "BIGINT",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Uuid(_) => "UUID",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Uuid(u) => Some(u),
            _ => None,
        }
    }

    /// Encode this value the way join tables store target keys.
    ///
    /// Returns `None` for NULL, which never identifies a row.
    pub fn encode_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) => Some(v.to_string()),
            Value::Date(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(to_hex(b)),
            Value::Uuid(u) => Some(format_uuid(u)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            other => match other.encode_key() {
                Some(k) => write!(f, "{}", k),
                None => write!(f, "NULL"),
            },
        }
    }
}

/// The kind of a model's primary key.
///
/// Join tables store every target key as text, whatever the target type;
/// the kind tells how to turn that text back into a key value when loading
/// targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Integer keys (`BIGINT`)
    #[default]
    Integer,
    /// Text keys
    Text,
    /// UUID keys, stored in canonical hyphenated form
    Uuid,
    /// Date keys (days since epoch)
    Date,
    /// Time keys (microseconds since midnight)
    Time,
    /// Timestamp keys (microseconds since epoch)
    Timestamp,
    /// Binary keys, stored as lowercase hex
    Bytes,
}

impl KeyKind {
    /// Parse a stored target key back into a key value.
    pub fn parse_key(self, raw: &str) -> Option<Value> {
        match self {
            KeyKind::Integer => raw.trim().parse().ok().map(Value::BigInt),
            KeyKind::Text => Some(Value::Text(raw.to_string())),
            KeyKind::Uuid => parse_uuid(raw).map(Value::Uuid),
            KeyKind::Date => raw.trim().parse().ok().map(Value::Date),
            KeyKind::Time => raw.trim().parse().ok().map(Value::Time),
            KeyKind::Timestamp => raw.trim().parse().ok().map(Value::Timestamp),
            KeyKind::Bytes => from_hex(raw).map(Value::Bytes),
        }
    }

    /// Infer the kind from a key value.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::BigInt(_) | Value::Bool(_) => Some(KeyKind::Integer),
            Value::Text(_) => Some(KeyKind::Text),
            Value::Uuid(_) => Some(KeyKind::Uuid),
            Value::Date(_) => Some(KeyKind::Date),
            Value::Time(_) => Some(KeyKind::Time),
            Value::Timestamp(_) => Some(KeyKind::Timestamp),
            Value::Bytes(_) => Some(KeyKind::Bytes),
            Value::Null => None,
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn from_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect()
}

fn format_uuid(u: &[u8; 16]) -> String {
    let hex = to_hex(u);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn parse_uuid(raw: &str) -> Option<[u8; 16]> {
    let compact: String = raw.chars().filter(|c| *c != '-').collect();
    if compact.len() != 32 {
        return None;
    }
    let bytes = from_hex(&compact.to_ascii_lowercase())?;
    bytes.try_into().ok()
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_round_trip_through_text() {
        let key = Value::BigInt(42).encode_key().unwrap();
        assert_eq!(key, "42");
        assert_eq!(KeyKind::Integer.parse_key(&key), Some(Value::BigInt(42)));
        assert_eq!(KeyKind::Integer.parse_key("not a number"), None);
    }

    #[test]
    fn test_uuid_keys_use_hyphenated_form() {
        let raw = [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ];
        let key = Value::Uuid(raw).encode_key().unwrap();
        assert_eq!(key, "12345678-9abc-def0-0123-456789abcdef");
        assert_eq!(KeyKind::Uuid.parse_key(&key), Some(Value::Uuid(raw)));
        assert_eq!(
            KeyKind::Uuid.parse_key("123456789ABCDEF00123456789ABCDEF"),
            Some(Value::Uuid(raw))
        );
    }

    #[test]
    fn test_bytes_and_dates() {
        let key = Value::Bytes(vec![0, 255, 16]).encode_key().unwrap();
        assert_eq!(key, "00ff10");
        assert_eq!(KeyKind::Bytes.parse_key(&key), Some(Value::Bytes(vec![0, 255, 16])));
        assert_eq!(KeyKind::Bytes.parse_key("abc"), None);

        assert_eq!(Value::Date(19_000).encode_key().as_deref(), Some("19000"));
        assert_eq!(KeyKind::Date.parse_key("19000"), Some(Value::Date(19_000)));
        assert_eq!(Value::Null.encode_key(), None);
    }

    #[test]
    fn test_conversions_normalize_integers() {
        assert_eq!(Value::from(7_i32), Value::BigInt(7));
        assert_eq!(Value::from(7_u32), Value::BigInt(7));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(KeyKind::of(&Value::from("abc")), Some(KeyKind::Text));
    }
}
