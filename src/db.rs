//! Abstract interface to a SQL database.
//!
//! The traits in this module describe the small slice of SQL that the rest of the crate is
//! built on: parameterized statement builders for reading and writing rows, plus DDL and
//! catalog introspection. There are two instantiations, one for
//! [PostgreSQL](postgres) and an [in-memory mock](mock) used for testing in isolation from a
//! real database.

use crate::catalog::{ColumnInfo, TableInfo, TriggerInfo, ViewInfo};
use async_trait::async_trait;
use derive_more::{Display, From, TryInto};
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt::{self, Display as _};
use std::str::FromStr;

pub mod mock;
pub mod postgres;

/// Errors returned by the database.
pub trait Error: Sized + Send + std::error::Error {
    /// Wrap a custom message into this error type.
    fn custom(msg: impl fmt::Display) -> Self;

    /// An error indicating that a query returned more than the `expected` number of rows.
    fn too_many_rows(expected: usize) -> Self {
        Self::custom(format!(
            "query result has more rows than the expected {expected}"
        ))
    }

    /// An error indicating that a query which was expected to return some rows did not.
    fn empty_rows() -> Self {
        Self::custom("query result is empty")
    }
}

/// A column in a list of columns selected from a query.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectColumn<'a> {
    /// A named column.
    #[display(fmt = "{}", _0)]
    Col(&'a str),
    /// Select all columns.
    #[display(fmt = "*")]
    All,
}

/// A primitive value supported by a SQL database.
#[derive(Clone, Debug, PartialEq, PartialOrd, From, TryInto)]
pub enum Value {
    /// The SQL NULL.
    #[try_into(ignore)]
    Null,
    /// A boolean.
    Bool(bool),
    /// A 4-byte signed integer.
    Int4(i32),
    /// An 8-byte signed integer.
    Int8(i64),
    /// An 8-byte float.
    Float8(f64),
    /// A text string.
    Text(String),
}

impl Value {
    /// The SQL type of this value.
    pub fn ty(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int4(_) => "int4",
            Self::Int8(_) => "int8",
            Self::Float8(_) => "float8",
            Self::Text(_) => "text",
        }
    }

    /// Whether this value is the SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => b.fmt(f),
            Self::Int4(x) => x.fmt(f),
            Self::Int8(x) => x.fmt(f),
            Self::Float8(x) => x.fmt(f),
            Self::Text(s) => s.fmt(f),
        }
    }
}

/// A column type in a table schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int4,
    Int8,
    Float8,
    Text,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "boolean",
            Self::Int4 => "int4",
            Self::Int8 => "int8",
            Self::Float8 => "float8",
            Self::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// A column definition in a `CREATE TABLE` statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchemaColumn {
    name: String,
    ty: Type,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// The name of this column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type of this column.
    pub fn ty(&self) -> Type {
        self.ty
    }
}

/// The name of a table or view, optionally qualified by a schema.
///
/// An unqualified name renders without a schema prefix, which lets builtin relations like
/// `pg_stat_activity` be referenced without naming `pg_catalog` explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Relation {
    schema: Option<String>,
    name: String,
}

impl Relation {
    /// An unqualified relation name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// A schema-qualified relation name.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// The schema qualifier, if there is one.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The bare relation name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for Relation {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Relation {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", quote_ident(schema))?;
        }
        quote_ident(&self.name).fmt(f)
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rel = match s.split_once('.') {
            Some((schema, name)) => Self::with_schema(schema, name),
            None => Self::new(s),
        };
        if rel.name.is_empty() || rel.schema.as_deref() == Some("") {
            return Err(format!("invalid relation name {s:?}"));
        }
        Ok(rel)
    }
}

/// Quote a SQL identifier, doubling any embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A clause modifying a SQL statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// A `WHERE` condition comparing a column against a parameter.
    Where {
        /// The column to filter.
        column: String,
        /// The operation used to filter values of `column`.
        op: String,
        /// Parameter to `op`.
        param: Value,
    },
    /// A `WHERE column IN (...)` condition.
    In {
        /// The column to filter.
        column: String,
        /// The set of values to match.
        params: Vec<Value>,
    },
}

/// A connection to the database.
#[async_trait]
pub trait Connection {
    /// Errors returned from statements.
    type Error: Error;

    /// Rows returned from queries.
    type Row: Row<Error = Self::Error>;

    /// A `SELECT` query which can be executed against the database.
    type Select<'a>: Select<Error = Self::Error, Row = Self::Row>
    where
        Self: 'a;

    /// An `INSERT` statement which can be executed against the database.
    type Insert<'a>: Insert<Error = Self::Error>
    where
        Self: 'a;

    /// An `UPDATE` statement which can be executed against the database.
    type Update<'a>: Update<Error = Self::Error>
    where
        Self: 'a;

    /// A `DELETE` statement which can be executed against the database.
    type Delete<'a>: Delete<Error = Self::Error>
    where
        Self: 'a;

    /// Start a `SELECT` query.
    ///
    /// `columns` indicates the columns to include in the query results. The resulting
    /// [`Select`] represents a statement of the form `SELECT columns FROM table`. The query
    /// can be refined, for example by adding a `WHERE` clause, using the appropriate methods
    /// on the [`Select`] object before running it.
    fn select<'a>(&'a self, columns: &'a [SelectColumn<'a>], table: &'a Relation)
        -> Self::Select<'a>;

    /// Start an `INSERT` statement.
    ///
    /// `table` indicates the table to insert into and `columns` the names of the columns in
    /// that table into which values should be inserted.
    fn insert<'a>(&'a self, table: &'a Relation, columns: Vec<String>) -> Self::Insert<'a>;

    /// Start an `UPDATE` statement against `table`.
    fn update<'a>(&'a self, table: &'a Relation) -> Self::Update<'a>;

    /// Start a `DELETE` statement against `table`.
    fn delete<'a>(&'a self, table: &'a Relation) -> Self::Delete<'a>;

    /// Create a table with the given columns.
    async fn create_table(
        &self,
        table: &Relation,
        columns: &[SchemaColumn],
        if_not_exists: bool,
    ) -> Result<(), Self::Error>;

    /// Drop a table.
    async fn drop_table(
        &self,
        table: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error>;

    /// Create a schema.
    async fn create_schema(&self, name: &str) -> Result<(), Self::Error>;

    /// Drop a schema, optionally dropping dependent objects with `cascade`.
    async fn drop_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error>;

    /// Create a view defined by `sql`.
    async fn create_view(
        &self,
        view: &Relation,
        sql: &str,
        or_replace: bool,
    ) -> Result<(), Self::Error>;

    /// Drop a view.
    async fn drop_view(
        &self,
        view: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error>;

    /// List the base tables in the database, optionally restricted to one schema.
    async fn tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, Self::Error>;

    /// List the views in the database, optionally restricted to one schema.
    async fn views(&self, schema: Option<&str>) -> Result<Vec<ViewInfo>, Self::Error>;

    /// Describe the columns of a table or view.
    async fn columns(&self, table: &Relation) -> Result<Vec<ColumnInfo>, Self::Error>;

    /// List the triggers in the database, optionally restricted to one schema.
    async fn triggers(&self, schema: Option<&str>) -> Result<Vec<TriggerInfo>, Self::Error>;
}

/// A `SELECT` query which can be executed against the database.
pub trait Select: Send {
    /// Errors returned by this query.
    type Error: Error;
    /// Rows returned by this query.
    type Row: Row<Error = Self::Error>;
    /// An asynchronous stream of rows.
    type Stream: Stream<Item = Result<Self::Row, Self::Error>> + Unpin + Send;

    /// Add a clause to the query.
    fn clause(self, clause: Clause) -> Self;

    /// Run the query and get a stream of results.
    fn stream(self) -> Self::Stream;
}

/// An extension trait for [`Select`] that provides some higher-level functions.
#[async_trait]
pub trait SelectExt: Select {
    /// Add a `WHERE` clause to the query.
    fn filter(self, column: impl Into<String>, op: impl Into<String>, param: Value) -> Self;

    /// Run a query which is expected to return a single row.
    ///
    /// # Errors
    ///
    /// This method will fail if the query does not return exactly one row.
    async fn one(self) -> Result<Self::Row, Self::Error>;

    /// Run a query and collect the results.
    async fn many(self) -> Result<Vec<Self::Row>, Self::Error>;

    /// Run a query which is expected to return either 0 or 1 rows.
    ///
    /// # Errors
    ///
    /// This method will fail if the query returns 2 or more rows.
    async fn opt(self) -> Result<Option<Self::Row>, Self::Error>;
}

#[async_trait]
impl<T: Select> SelectExt for T {
    fn filter(self, column: impl Into<String>, op: impl Into<String>, param: Value) -> Self {
        self.clause(Clause::Where {
            column: column.into(),
            op: op.into(),
            param,
        })
    }

    async fn opt(self) -> Result<Option<Self::Row>, Self::Error> {
        let mut rows = self.stream();
        let Some(row) = rows.next().await else { return Ok(None); };
        if rows.next().await.is_some() {
            return Err(Self::Error::too_many_rows(1));
        }
        row.map(Some)
    }

    async fn one(self) -> Result<Self::Row, Self::Error> {
        self.opt().await?.ok_or_else(Self::Error::empty_rows)
    }

    async fn many(self) -> Result<Vec<Self::Row>, Self::Error> {
        self.stream().try_collect().await
    }
}

/// An `INSERT` statement which can be executed against the database.
#[async_trait]
pub trait Insert: Send {
    /// Errors returned by this statement.
    type Error: Error;

    /// Add rows to insert.
    ///
    /// Each row must have exactly as many values as the statement has columns; a mismatch is
    /// reported when the statement is executed.
    fn rows<R>(self, rows: R) -> Self
    where
        R: IntoIterator<Item = Vec<Value>>;

    /// Do the insertion, returning the number of rows written.
    ///
    /// This will execute a statement of the form `INSERT INTO table (columns) VALUES (rows)`.
    ///
    /// # Errors
    ///
    /// This method will fail if any of the items in `rows` conflict with an existing row in
    /// `table` at a column which is defined as a unique or primary key.
    async fn execute(self) -> Result<u64, Self::Error>;
}

/// An `UPDATE` statement which can be executed against the database.
#[async_trait]
pub trait Update: Send {
    /// Errors returned by this statement.
    type Error: Error;

    /// Assign `value` to `column` in every matched row.
    fn set(self, column: impl Into<String>, value: impl Into<Value>) -> Self;

    /// Add a clause restricting which rows are updated.
    fn clause(self, clause: Clause) -> Self;

    /// Add a `WHERE` clause restricting which rows are updated.
    fn filter(self, column: impl Into<String>, op: impl Into<String>, param: Value) -> Self
    where
        Self: Sized,
    {
        self.clause(Clause::Where {
            column: column.into(),
            op: op.into(),
            param,
        })
    }

    /// Do the update, returning the number of rows touched.
    ///
    /// # Errors
    ///
    /// This method will fail if no assignments have been added with
    /// [`set`](Self::set).
    async fn execute(self) -> Result<u64, Self::Error>;
}

/// A `DELETE` statement which can be executed against the database.
///
/// A statement with no clauses deletes every row in the table.
#[async_trait]
pub trait Delete: Send {
    /// Errors returned by this statement.
    type Error: Error;

    /// Add a clause restricting which rows are deleted.
    fn clause(self, clause: Clause) -> Self;

    /// Add a `WHERE` clause restricting which rows are deleted.
    fn filter(self, column: impl Into<String>, op: impl Into<String>, param: Value) -> Self
    where
        Self: Sized,
    {
        self.clause(Clause::Where {
            column: column.into(),
            op: op.into(),
            param,
        })
    }

    /// Do the deletion, returning the number of rows deleted.
    async fn execute(self) -> Result<u64, Self::Error>;
}

/// A row in a database table.
pub trait Row: Sized + Send {
    /// Errors returned by row operations.
    type Error: Error;

    /// The names of the columns in this row, in result order.
    fn names(&self) -> Vec<String>;

    /// Get the value of `column` in this row.
    ///
    /// # Errors
    ///
    /// This method will fail if the specified column does not exist.
    fn column(&self, column: &str) -> Result<Value, Self::Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(42i32), Value::Int4(42));
        assert_eq!(Value::from(42i64), Value::Int8(42));
        assert_eq!(Value::from(1.5f64), Value::Float8(1.5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("foo"), Value::Text("foo".into()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(7i32)), Value::Int4(7));

        let x: i64 = Value::Int8(9).try_into().unwrap();
        assert_eq!(x, 9);
    }

    #[test]
    fn test_value_ty() {
        assert_eq!(Value::Null.ty(), "null");
        assert_eq!(Value::Bool(false).ty(), "bool");
        assert_eq!(Value::Int4(0).ty(), "int4");
        assert_eq!(Value::Int8(0).ty(), "int8");
        assert_eq!(Value::Float8(0.0).ty(), "float8");
        assert_eq!(Value::Text(String::new()).ty(), "text");
        assert!(Value::Null.is_null());
        assert!(!Value::Int4(0).is_null());
    }

    #[test]
    fn test_relation_display() {
        assert_eq!(Relation::new("users").to_string(), r#""users""#);
        assert_eq!(
            Relation::with_schema("app", "users").to_string(),
            r#""app"."users""#
        );
        // Embedded quotes are doubled.
        assert_eq!(
            Relation::new(r#"we"ird"#).to_string(),
            r#""we""ird""#
        );
    }

    #[test]
    fn test_relation_from_str() {
        assert_eq!("users".parse::<Relation>().unwrap(), Relation::new("users"));
        assert_eq!(
            "app.users".parse::<Relation>().unwrap(),
            Relation::with_schema("app", "users")
        );
        assert!("".parse::<Relation>().is_err());
        assert!(".users".parse::<Relation>().is_err());
        assert!("app.".parse::<Relation>().is_err());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Type::Bool.to_string(), "boolean");
        assert_eq!(Type::Int4.to_string(), "int4");
        assert_eq!(Type::Int8.to_string(), "int8");
        assert_eq!(Type::Float8.to_string(), "float8");
        assert_eq!(Type::Text.to_string(), "text");
    }
}
