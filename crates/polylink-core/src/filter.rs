//! Row predicates and queries.
//!
//! Stores receive [`Filter`]s and [`Query`]s instead of SQL text. A filter is
//! a conjunction/disjunction of column equality and `IN` tests; it can be
//! evaluated against a [`Row`] directly (in-memory stores) or rendered to
//! parameterized SQL for a [`Dialect`].

use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// SQL dialect for generating dialect-specific SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    #[default]
    Postgres,
    /// SQLite dialect (uses ?1, ?2 placeholders)
    Sqlite,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect.
    ///
    /// Embedded quote characters are escaped by doubling them.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => {
                let escaped = name.replace('"', "\"\"");
                format!("\"{}\"", escaped)
            }
            Dialect::Mysql => {
                let escaped = name.replace('`', "``");
                format!("`{}`", escaped)
            }
        }
    }
}

/// A row predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Matches every row
    All,
    /// `column = value`
    Eq(String, Value),
    /// `column IN (values...)`; an empty list matches nothing
    In(String, Vec<Value>),
    /// All sub-filters match; an empty list matches everything
    And(Vec<Filter>),
    /// Any sub-filter matches; an empty list matches nothing
    Or(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    /// `column IN (values...)`
    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Combine with another filter using AND, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Disjunction of the given filters.
    pub fn any(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Does this filter match nothing, whatever the rows?
    pub fn is_empty_match(&self) -> bool {
        match self {
            Filter::In(_, values) => values.is_empty(),
            Filter::Or(filters) => filters.iter().all(Filter::is_empty_match),
            Filter::And(filters) => filters.iter().any(Filter::is_empty_match),
            _ => false,
        }
    }

    /// Evaluate this filter against a row.
    ///
    /// Missing columns and NULL comparisons never match, following SQL.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(column, value) => {
                !value.is_null() && row.get_by_name(column).is_some_and(|v| v == value)
            }
            Filter::In(column, values) => row
                .get_by_name(column)
                .is_some_and(|v| !v.is_null() && values.contains(v)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(inner) => !inner.matches(row),
        }
    }

    /// Render this filter as SQL, appending bound parameters to `params`.
    pub fn to_sql(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Filter::All => "1 = 1".to_string(),
            Filter::Eq(column, value) => {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    dialect.placeholder(params.len())
                )
            }
            Filter::In(_, values) if values.is_empty() => "1 = 0".to_string(),
            Filter::In(column, values) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(v.clone());
                        dialect.placeholder(params.len())
                    })
                    .collect();
                format!(
                    "{} IN ({})",
                    dialect.quote_identifier(column),
                    placeholders.join(", ")
                )
            }
            Filter::And(filters) if filters.is_empty() => "1 = 1".to_string(),
            Filter::Or(filters) if filters.is_empty() => "1 = 0".to_string(),
            Filter::And(filters) => join_sql(filters, " AND ", dialect, params),
            Filter::Or(filters) => join_sql(filters, " OR ", dialect, params),
            Filter::Not(inner) => format!("NOT ({})", inner.to_sql(dialect, params)),
        }
    }
}

fn join_sql(filters: &[Filter], sep: &str, dialect: Dialect, params: &mut Vec<Value>) -> String {
    if filters.len() == 1 {
        return filters[0].to_sql(dialect, params);
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|f| format!("({})", f.to_sql(dialect, params)))
        .collect();
    parts.join(sep)
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    /// Ascending order on `column`.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on `column`.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse Django-style ordering: `"-order"` is descending.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(column) => Self::desc(column),
            None => Self::asc(spec),
        }
    }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filter: Filter,
    /// Columns to return; `None` returns every column
    pub projection: Option<Vec<String>>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    /// Select every row of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::All,
            projection: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Restrict rows.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    /// Return only these columns.
    #[must_use]
    pub fn project<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the ordering.
    #[must_use]
    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Limit the number of rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render as a SELECT statement.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let columns = match &self.projection {
            Some(cols) => cols
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        };
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns,
            dialect.quote_identifier(&self.table)
        );
        if self.filter != Filter::All {
            sql.push_str(" WHERE ");
            sql.push_str(&self.filter.to_sql(dialect, &mut params));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    format!(
                        "{} {}",
                        dialect.quote_identifier(&o.column),
                        if o.descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        (sql, params)
    }
}

/// Render a DELETE statement for `table` restricted by `filter`.
pub fn delete_sql(table: &str, filter: &Filter, dialect: Dialect) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(table));
    if *filter != Filter::All {
        sql.push_str(" WHERE ");
        sql.push_str(&filter.to_sql(dialect, &mut params));
    }
    (sql, params)
}

/// Render a multi-row INSERT statement. All rows must share the first row's columns.
pub fn insert_sql(table: &str, rows: &[Row], dialect: Dialect) -> Option<(String, Vec<Value>)> {
    let first = rows.first()?;
    let columns: Vec<&str> = first.column_names().collect();
    let mut params = Vec::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let mut slots = Vec::with_capacity(columns.len());
        for column in &columns {
            params.push(row.get_by_name(column).cloned().unwrap_or(Value::Null));
            slots.push(dialect.placeholder(params.len()));
        }
        tuples.push(format!("({})", slots.join(", ")));
    }
    let quoted: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();
    Some((
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            dialect.quote_identifier(table),
            quoted.join(", "),
            tuples.join(", ")
        ),
        params,
    ))
}
