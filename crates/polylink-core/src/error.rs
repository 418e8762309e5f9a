//! Error types for Polylink operations.

use std::fmt;

/// The primary error type for all Polylink operations.
#[derive(Debug)]
pub enum Error {
    /// An object's type is not registered and the relation does not accept new types
    UnknownType(UnknownTypeError),
    /// A target key does not fit in the join table's key column
    KeyTooLong(KeyTooLongError),
    /// A convenience write on a relation that does not support it
    UnsupportedOperation(UnsupportedOperationError),
    /// A user-supplied join table lacks (or has ambiguous) column roles
    BadThroughSchema(ThroughSchemaError),
    /// Failure reported by the underlying store
    Store(StoreError),
    /// A value of the wrong type
    Type(TypeError),
    /// Bad relation or table declaration
    Config(ConfigError),
    /// JSON encoding of a relation description
    Serde(String),
    Custom(String),
}

#[derive(Debug)]
pub struct UnknownTypeError {
    /// Qualified name of the offending type (`app.Model`), if known
    pub type_name: String,
    /// Relation that rejected the type
    pub relation: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct KeyTooLongError {
    /// The encoded key
    pub key: String,
    /// Configured width of the key column
    pub max_length: usize,
    pub relation: Option<String>,
}

#[derive(Debug)]
pub struct UnsupportedOperationError {
    /// Operation name (`add`, `remove`, ...)
    pub operation: &'static str,
    pub relation: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ThroughSchemaError {
    pub kind: ThroughSchemaErrorKind,
    /// Join table name
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThroughSchemaErrorKind {
    /// No column plays the required role
    MissingRole,
    /// More than one candidate column for a role
    AmbiguousRole,
    /// A named column does not exist
    UnknownColumn,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Constraint violation (unique, primary key)
    Constraint,
    /// Missing table or column
    NotFound,
    /// Transaction misuse (commit without begin, ...)
    Transaction,
    /// Any other backend failure
    Backend,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build an unknown-type error.
    pub fn unknown_type(type_name: impl Into<String>, relation: Option<&str>) -> Self {
        let type_name = type_name.into();
        let message = match relation {
            Some(rel) => format!("type '{}' is not a target of relation '{}'", type_name, rel),
            None => format!("type '{}' is not registered", type_name),
        };
        Error::UnknownType(UnknownTypeError {
            type_name,
            relation: relation.map(str::to_string),
            message,
        })
    }

    /// Build an unsupported-operation error.
    pub fn unsupported(operation: &'static str, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        Error::UnsupportedOperation(UnsupportedOperationError {
            operation,
            message: format!(
                "cannot {} on relation '{}' which uses an intermediary table; \
                 write to the intermediary table instead",
                operation, relation
            ),
            relation,
        })
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a store error of the given kind.
    pub fn store(kind: StoreErrorKind, table: Option<&str>, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            table: table.map(str::to_string),
            message: message.into(),
            source: None,
        })
    }

    /// Does this error come from the underlying store?
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    /// Is this a setup-time misconfiguration rather than a runtime failure?
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::BadThroughSchema(_) | Error::Config(_))
    }

    /// Is this a unique/primary key violation reported by the store?
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Store(e) if e.kind == StoreErrorKind::Constraint)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownType(e) => write!(f, "Unknown type: {}", e.message),
            Error::KeyTooLong(e) => write!(f, "Key too long: {}", e),
            Error::UnsupportedOperation(e) => write!(f, "Unsupported operation: {}", e.message),
            Error::BadThroughSchema(e) => {
                write!(f, "Bad through schema '{}': {}", e.table, e.message)
            }
            Error::Store(e) => match &e.table {
                Some(table) => write!(f, "Store error on '{}': {}", table, e.message),
                None => write!(f, "Store error: {}", e.message),
            },
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for KeyTooLongError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key '{}' is {} characters, column allows {}",
            self.key,
            self.key.chars().count(),
            self.max_length
        )?;
        if let Some(rel) = &self.relation {
            write!(f, " (relation '{}')", rel)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ThroughSchemaError> for Error {
    fn from(err: ThroughSchemaError) -> Self {
        Error::BadThroughSchema(err)
    }
}

impl From<KeyTooLongError> for Error {
    fn from(err: KeyTooLongError) -> Self {
        Error::KeyTooLong(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Polylink operations.
pub type Result<T> = std::result::Result<T, Error>;
