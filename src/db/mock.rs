//! Mock instantiation of the abstract [`db`](super) interface for PostgreSQL.
//!
//! This instantiation is built on a simple in-memory database. It is useful for testing in
//! isolation from an actual database.
#![cfg(any(test, feature = "mocks"))]

use super::{Clause, Relation, SchemaColumn, SelectColumn, Value};
use crate::catalog::{ColumnInfo, TableInfo, TriggerInfo, ViewInfo};
use async_trait::async_trait;
use derive_more::From;
use futures::{
    stream::{self, BoxStream},
    StreamExt, TryFutureExt,
};
use snafu::Snafu;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors returned by the in-memory database.
#[derive(Debug, Snafu, From)]
#[snafu(display("mock DB error: {}", message))]
pub struct Error {
    message: String,
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self {
            message: msg.to_string(),
        }
    }
}

/// The in-memory database.
#[derive(Debug, Default)]
struct Db {
    schemas: Vec<String>,
    tables: HashMap<Relation, Table>,
    views: HashMap<Relation, View>,
}

impl Db {
    fn has_schema(&self, name: &str) -> bool {
        name == "public" || self.schemas.iter().any(|s| s == name)
    }

    fn table_mut(&mut self, table: &Relation) -> Result<&mut Table, Error> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| Error::from(format!("no such table {table}")))
    }
}

/// An in-memory table.
#[derive(Debug)]
struct Table {
    schema: Vec<SchemaColumn>,
    rows: Vec<Row>,
}

impl Table {
    fn new(schema: impl IntoIterator<Item = SchemaColumn>) -> Self {
        Self {
            schema: schema.into_iter().collect(),
            rows: vec![],
        }
    }

    /// Append rows whose values are in schema order.
    fn append(&mut self, rows: impl IntoIterator<Item = Vec<Value>>) {
        for row in rows {
            assert_eq!(row.len(), self.schema.len());
            self.rows.push(Row::new(
                self.schema
                    .iter()
                    .zip(row)
                    .map(|(col, val)| (col.name().to_string(), val)),
            ));
        }
    }
}

/// An in-memory view. The defining SQL is recorded but never evaluated.
#[derive(Debug)]
struct View {
    #[allow(dead_code)]
    sql: String,
}

/// A connection to the in-memory database.
#[derive(Clone, Debug)]
pub struct Connection(Arc<RwLock<Db>>);

impl Connection {
    /// Create a new database and connect to it.
    ///
    /// This will create a connection to a fresh, empty database. It will not be connected or
    /// related to any previous connection or database. Once the database is created, this
    /// connection can be [cloned](Clone) in order to create multiple simultaneous connections
    /// to the same database.
    pub fn create() -> Self {
        Self(Default::default())
    }

    /// Create a table with the given columns and row values.
    ///
    /// `rows` are given in schema order.
    pub async fn create_table_with_rows(
        &self,
        table: impl Into<Relation>,
        columns: impl IntoIterator<Item = SchemaColumn>,
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Result<(), Error> {
        let mut db = self.0.write().await;
        match db.tables.entry(table.into()) {
            Entry::Occupied(e) => Err(Error::from(format!("table {} already exists", e.key()))),
            Entry::Vacant(e) => {
                let table = e.insert(Table::new(columns));
                table.append(rows);
                Ok(())
            }
        }
    }

    /// The schema of every table in the database, keyed by rendered relation name.
    pub async fn schema(&self) -> HashMap<String, Vec<SchemaColumn>> {
        let db = self.0.read().await;
        db.tables
            .iter()
            .map(|(rel, table)| (rel.to_string(), table.schema.clone()))
            .collect()
    }
}

#[async_trait]
impl super::Connection for Connection {
    type Error = Error;
    type Row = Row;
    type Select<'a> = Select<'a>;
    type Insert<'a> = Insert<'a>;
    type Update<'a> = Update<'a>;
    type Delete<'a> = Delete<'a>;

    fn select<'a>(
        &'a self,
        columns: &'a [SelectColumn<'a>],
        table: &'a Relation,
    ) -> Self::Select<'a> {
        Select {
            db: &self.0,
            table,
            columns,
            clauses: vec![],
        }
    }

    fn insert<'a>(&'a self, table: &'a Relation, columns: Vec<String>) -> Self::Insert<'a> {
        Insert {
            db: &self.0,
            table,
            columns,
            rows: vec![],
        }
    }

    fn update<'a>(&'a self, table: &'a Relation) -> Self::Update<'a> {
        Update {
            db: &self.0,
            table,
            assignments: vec![],
            clauses: vec![],
        }
    }

    fn delete<'a>(&'a self, table: &'a Relation) -> Self::Delete<'a> {
        Delete {
            db: &self.0,
            table,
            clauses: vec![],
        }
    }

    async fn create_table(
        &self,
        table: &Relation,
        columns: &[SchemaColumn],
        if_not_exists: bool,
    ) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if let Some(schema) = table.schema() {
            if !db.has_schema(schema) {
                return Err(Error::from(format!("no such schema {schema}")));
            }
        }
        match db.tables.entry(table.clone()) {
            Entry::Occupied(e) => {
                if if_not_exists {
                    Ok(())
                } else {
                    Err(Error::from(format!("table {} already exists", e.key())))
                }
            }
            Entry::Vacant(e) => {
                e.insert(Table::new(columns.iter().cloned()));
                Ok(())
            }
        }
    }

    async fn drop_table(
        &self,
        table: &Relation,
        if_exists: bool,
        _cascade: bool,
    ) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if db.tables.remove(table).is_none() && !if_exists {
            return Err(Error::from(format!("no such table {table}")));
        }
        Ok(())
    }

    async fn create_schema(&self, name: &str) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if db.has_schema(name) {
            return Err(Error::from(format!("schema {name} already exists")));
        }
        db.schemas.push(name.to_string());
        Ok(())
    }

    async fn drop_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if !db.has_schema(name) {
            if if_exists {
                return Ok(());
            }
            return Err(Error::from(format!("no such schema {name}")));
        }
        let occupied = db
            .tables
            .keys()
            .chain(db.views.keys())
            .any(|rel| rel.schema() == Some(name));
        if occupied && !cascade {
            return Err(Error::from(format!("schema {name} is not empty")));
        }
        db.tables.retain(|rel, _| rel.schema() != Some(name));
        db.views.retain(|rel, _| rel.schema() != Some(name));
        db.schemas.retain(|s| s != name);
        Ok(())
    }

    async fn create_view(
        &self,
        view: &Relation,
        sql: &str,
        or_replace: bool,
    ) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if db.views.contains_key(view) && !or_replace {
            return Err(Error::from(format!("view {view} already exists")));
        }
        db.views.insert(
            view.clone(),
            View {
                sql: sql.to_string(),
            },
        );
        Ok(())
    }

    async fn drop_view(
        &self,
        view: &Relation,
        if_exists: bool,
        _cascade: bool,
    ) -> Result<(), Self::Error> {
        let mut db = self.0.write().await;
        if db.views.remove(view).is_none() && !if_exists {
            return Err(Error::from(format!("no such view {view}")));
        }
        Ok(())
    }

    async fn tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, Self::Error> {
        let db = self.0.read().await;
        let mut tables = db
            .tables
            .keys()
            .map(|rel| TableInfo {
                schema: rel.schema().unwrap_or("public").to_string(),
                name: rel.name().to_string(),
            })
            .filter(|info| schema.map_or(true, |s| info.schema == s))
            .collect::<Vec<_>>();
        tables.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        Ok(tables)
    }

    async fn views(&self, schema: Option<&str>) -> Result<Vec<ViewInfo>, Self::Error> {
        let db = self.0.read().await;
        let mut views = db
            .views
            .keys()
            .map(|rel| ViewInfo {
                schema: rel.schema().unwrap_or("public").to_string(),
                name: rel.name().to_string(),
            })
            .filter(|info| schema.map_or(true, |s| info.schema == s))
            .collect::<Vec<_>>();
        views.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        Ok(views)
    }

    async fn columns(&self, table: &Relation) -> Result<Vec<ColumnInfo>, Self::Error> {
        let db = self.0.read().await;
        let table = db
            .tables
            .get(table)
            .ok_or_else(|| Error::from(format!("no such table {table}")))?;
        Ok(table
            .schema
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.ty().to_string(),
                // The mock schema does not model constraints.
                is_nullable: true,
            })
            .collect())
    }

    async fn triggers(&self, _schema: Option<&str>) -> Result<Vec<TriggerInfo>, Self::Error> {
        Ok(vec![])
    }
}

/// A query against an in-memory database.
pub struct Select<'a> {
    db: &'a RwLock<Db>,
    table: &'a Relation,
    columns: &'a [SelectColumn<'a>],
    clauses: Vec<Clause>,
}

impl<'a> super::Select for Select<'a> {
    type Error = Error;
    type Row = Row;
    type Stream = BoxStream<'a, Result<Self::Row, Self::Error>>;

    fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    fn stream(self) -> Self::Stream {
        let all = self.columns.iter().any(|col| *col == SelectColumn::All);
        let projection = if all {
            None
        } else {
            Some(
                self.columns
                    .iter()
                    .map(|col| col.to_string())
                    .collect::<Vec<_>>(),
            )
        };
        async move {
            let db = self.db.read().await;
            let table = db
                .tables
                .get(self.table)
                .ok_or_else(|| Error::from(format!("no such table {}", self.table)))?;
            let rows = table
                .rows
                .clone()
                .into_iter()
                .filter(move |row| self.clauses.iter().all(|clause| row.test(clause)))
                .map(move |row| match &projection {
                    Some(columns) => Ok(row.project(columns)),
                    None => Ok(row),
                });
            Ok(stream::iter(rows))
        }
        .try_flatten_stream()
        .boxed()
    }
}

/// An insert statement for an in-memory database.
pub struct Insert<'a> {
    db: &'a RwLock<Db>,
    table: &'a Relation,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[async_trait]
impl<'a> super::Insert for Insert<'a> {
    type Error = Error;

    fn rows<R>(mut self, rows: R) -> Self
    where
        R: IntoIterator<Item = Vec<Value>>,
    {
        self.rows.extend(rows);
        self
    }

    async fn execute(self) -> Result<u64, Error> {
        let mut db = self.db.write().await;
        let table = db.table_mut(self.table)?;

        // Map positions in the input rows to positions in the table schema. Columns of the
        // schema which are not being inserted are left NULL.
        let mut column_permutation = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let col = table
                .schema
                .iter()
                .position(|col| col.name() == name)
                .ok_or_else(|| {
                    Error::from(format!("table {} has no column {name}", self.table))
                })?;
            column_permutation.push(col);
        }

        let width = table.schema.len();
        let mut full_rows = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            if row.len() != self.columns.len() {
                return Err(Error::from(format!(
                    "incorrect row width for insert into {} (found {}, expected {})",
                    self.table,
                    row.len(),
                    self.columns.len()
                )));
            }
            let mut full = vec![Value::Null; width];
            for (val, col) in row.into_iter().zip(&column_permutation) {
                full[*col] = val;
            }
            full_rows.push(full);
        }

        let count = full_rows.len() as u64;
        table.append(full_rows);
        Ok(count)
    }
}

/// An update statement for an in-memory database.
pub struct Update<'a> {
    db: &'a RwLock<Db>,
    table: &'a Relation,
    assignments: Vec<(String, Value)>,
    clauses: Vec<Clause>,
}

#[async_trait]
impl<'a> super::Update for Update<'a> {
    type Error = Error;

    fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    async fn execute(self) -> Result<u64, Error> {
        if self.assignments.is_empty() {
            return Err(Error::from(format!(
                "update of {} has no assignments",
                self.table
            )));
        }

        let mut db = self.db.write().await;
        let table = db.table_mut(self.table)?;
        for (column, _) in &self.assignments {
            if !table.schema.iter().any(|col| col.name() == column) {
                return Err(Error::from(format!(
                    "table {} has no column {column}",
                    self.table
                )));
            }
        }

        let mut touched = 0;
        for row in &mut table.rows {
            if self.clauses.iter().all(|clause| row.test(clause)) {
                for (column, value) in &self.assignments {
                    row.set(column, value.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }
}

/// A delete statement for an in-memory database.
pub struct Delete<'a> {
    db: &'a RwLock<Db>,
    table: &'a Relation,
    clauses: Vec<Clause>,
}

#[async_trait]
impl<'a> super::Delete for Delete<'a> {
    type Error = Error;

    fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    async fn execute(self) -> Result<u64, Error> {
        let mut db = self.db.write().await;
        let table = db.table_mut(self.table)?;
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !self.clauses.iter().all(|clause| row.test(clause)));
        Ok((before - table.rows.len()) as u64)
    }
}

macro_rules! test_ord_val {
    ($l:expr, $op:expr, $r:expr, $($t:ident),+) => {
        match ($l, $r) {
            $(
                (Value::$t(l), Value::$t(r)) => match $op {
                    ">" => l > r,
                    ">=" => l >= r,
                    "<" => l < r,
                    "<=" => l <= r,
                    op => panic!("unsupported op {op}"),
                }
            ),+,
            (l, r) => panic!("type mismatch for op {}: {:?}, {:?}", $op, l, r),
        }
    };
    ($l:expr, $op:expr, $r:expr) => {
        test_ord_val!($l, $op, $r, Bool, Int4, Int8, Float8, Text)
    };
}

/// A row in an in-memory table.
///
/// Columns are kept in schema order so that projections and result output are deterministic.
#[derive(Clone, Debug, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Create a row with the given entries.
    fn new(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            columns: entries.into_iter().collect(),
        }
    }

    fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, val)| val)
    }

    fn set(&mut self, column: &str, value: Value) {
        if let Some(entry) = self.columns.iter_mut().find(|(name, _)| name == column) {
            entry.1 = value;
        }
    }

    /// Restrict this row to the named columns, in the given order.
    fn project(self, columns: &[String]) -> Self {
        Self::new(columns.iter().map(|name| {
            let val = self.get(name).cloned().unwrap_or(Value::Null);
            (name.clone(), val)
        }))
    }

    /// Test if this row should be included based on the given [`Clause`].
    ///
    /// As in SQL, no comparison matches a NULL.
    fn test(&self, clause: &Clause) -> bool {
        match clause {
            Clause::Where { column, op, param } => match self.get(column) {
                Some(col) => test_value(col, op, param),
                None => true,
            },
            Clause::In { column, params } => match self.get(column) {
                Some(col) => !col.is_null() && params.iter().any(|param| param == col),
                None => true,
            },
        }
    }
}

fn test_value(l: &Value, op: &str, r: &Value) -> bool {
    if l.is_null() || r.is_null() {
        return false;
    }
    match op {
        "=" => l == r,
        "!=" | "<>" => l != r,
        ord => test_ord_val!(l, ord, r),
    }
}

impl super::Row for Row {
    type Error = Error;

    fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn column(&self, column: &str) -> Result<Value, Self::Error> {
        self.get(column)
            .cloned()
            .ok_or_else(|| format!("no such column {column}").into())
    }
}
