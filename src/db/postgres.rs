//! Instantiation of the abstract [`db`](super) interface for PostgreSQL.
//!
//! This instantiation is built on [`tokio-postgres`].

use super::{Clause, Relation, SchemaColumn, SelectColumn, Value};
use crate::catalog::{self, ColumnInfo, TableInfo, TriggerInfo, ViewInfo};
use crate::script::ScriptLog;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use derive_more::From;
use futures::{pin_mut, stream::BoxStream, SinkExt, StreamExt, TryFutureExt, TryStreamExt};
use itertools::Itertools;
use snafu::Snafu;
use std::fmt::Display;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::spawn;
use tokio_postgres::types::{accepts, to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

pub use tokio_postgres::{Config, Row};

/// Errors returned by a PostgreSQL database.
#[derive(Debug, Snafu, From)]
pub enum Error {
    /// An error reported by the database itself.
    #[snafu(display("SQL error: {}", source))]
    #[from]
    Sql { source: tokio_postgres::Error },

    /// A failure to establish a connection.
    #[snafu(display("connection error: {}", source))]
    Connect { source: tokio_postgres::Error },

    /// A failure to read or write a local file during a statement log or COPY.
    #[snafu(display("I/O error: {}", source))]
    #[from]
    Io { source: std::io::Error },

    /// A value of a type this interface does not traffic in.
    #[snafu(display("unsupported SQL type {}", ty))]
    UnsupportedType { ty: Type },

    #[snafu(display("{}", message))]
    Custom { message: String },
}

impl super::Error for Error {
    fn custom(msg: impl Display) -> Self {
        Self::Custom {
            message: msg.to_string(),
        }
    }
}

/// Options for CSV-format `COPY` transfers.
#[derive(Clone, Copy, Debug)]
pub struct CopyOptions {
    /// The field delimiter. Must be a single ASCII character.
    pub delimiter: char,
    /// Whether the first line is a header naming the columns.
    pub header: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header: true,
        }
    }
}

impl CopyOptions {
    /// Render the options list of a `COPY` statement.
    fn to_sql(self) -> Result<String, Error> {
        let mut options = vec!["FORMAT csv".to_string(), format!("HEADER {}", self.header)];
        if self.delimiter != ',' {
            let delimiter = match self.delimiter {
                '\t' => "E'\\t'".to_string(),
                '\'' | '"' | '\\' | '\n' | '\r' => {
                    return Err(Error::Custom {
                        message: format!("unsupported COPY delimiter {:?}", self.delimiter),
                    })
                }
                d if d.is_ascii() => format!("'{d}'"),
                d => {
                    return Err(Error::Custom {
                        message: format!("COPY delimiter {d:?} is not ASCII"),
                    })
                }
            };
            options.push(format!("DELIMITER {delimiter}"));
        }
        Ok(options.join(", "))
    }
}

/// A connection to a PostgreSQL database.
pub struct Connection(tokio_postgres::Client);

impl Connection {
    /// Establish a new connection with the given [`Config`].
    pub async fn new(config: Config) -> Result<Self, Error> {
        let (client, conn) = config
            .connect(NoTls)
            .await
            .map_err(|source| Error::Connect { source })?;
        spawn(conn);
        Ok(Self(client))
    }

    /// Run a SQL query and get a stream of resulting rows.
    ///
    /// User-provided values belong in `params`, referenced from the statement as `$1`, `$2`,
    /// etc., not spliced into the SQL text.
    pub async fn query(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<BoxStream<'static, Result<Row, Error>>, Error> {
        tracing::info!(?params, "{}", statement);
        let params = params.iter().map(|param| {
            let param: &dyn ToSql = param;
            param
        });
        let stream = self
            .0
            .query_raw(statement, params)
            .await
            .map_err(Error::from)?;
        Ok(stream.map_err(Error::from).boxed())
    }

    /// Run a SQL statement and get the number of rows it affected.
    pub async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, Error> {
        tracing::info!(?params, "{}", statement);
        let params = params.iter().map(|param| {
            let param: &dyn ToSql = param;
            param
        });
        self.0
            .execute_raw(statement, params)
            .await
            .map_err(Error::from)
    }

    /// Run a sequence of SQL statements inside a single transaction.
    ///
    /// If any statement fails the transaction is rolled back and none of the statements take
    /// effect. With a [`ScriptLog`], each statement is appended to the log file after it
    /// executes. Returns the total number of rows affected.
    pub async fn execute_script<S: AsRef<str>>(
        &mut self,
        statements: impl IntoIterator<Item = S>,
        mut log: Option<&mut ScriptLog>,
    ) -> Result<u64, Error> {
        let tx = self.0.transaction().await?;
        let mut affected = 0;
        for statement in statements {
            let statement = statement.as_ref();
            tracing::info!("{}", statement);
            affected += tx.execute(statement, &[]).await?;
            if let Some(log) = log.as_deref_mut() {
                log.record(statement)?;
            }
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Export a table or view in CSV format via `COPY ... TO STDOUT`.
    ///
    /// Returns the number of bytes written to `out`.
    pub async fn copy_out_csv<W>(
        &self,
        table: &Relation,
        out: &mut W,
        options: CopyOptions,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let statement = format!("COPY {table} TO STDOUT ({})", options.to_sql()?);
        tracing::info!("{}", statement);
        let stream = self.0.copy_out(&statement).await?;
        pin_mut!(stream);
        let mut written = 0;
        while let Some(chunk) = stream.try_next().await? {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }

    /// Load CSV data into a table via `COPY ... FROM STDIN`.
    ///
    /// Returns the number of rows written.
    pub async fn copy_in_csv<R>(
        &self,
        table: &Relation,
        input: &mut R,
        options: CopyOptions,
    ) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let statement = format!("COPY {table} FROM STDIN ({})", options.to_sql()?);
        tracing::info!("{}", statement);
        let sink = self.0.copy_in(&statement).await?;
        pin_mut!(sink);
        let mut buf = [0u8; 8192];
        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            sink.send(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        Ok(sink.finish().await?)
    }
}

/// Append a rendered condition for `clause` to `conditions`, binding its values in `params`.
fn render_clause(clause: Clause, conditions: &mut Vec<String>, params: &mut Vec<Value>) {
    match clause {
        Clause::Where { column, op, param } => {
            params.push(param);
            conditions.push(format!("{column} {op} ${}", params.len()));
        }
        Clause::In {
            column,
            params: values,
        } => {
            if values.is_empty() {
                // `IN ()` is not valid SQL; an empty set matches nothing.
                conditions.push("false".to_string());
                return;
            }
            let placeholders = values
                .into_iter()
                .map(|value| {
                    params.push(value);
                    format!("${}", params.len())
                })
                .join(", ");
            conditions.push(format!("{column} IN ({placeholders})"));
        }
    }
}

/// Render a `WHERE` clause from rendered conditions, or nothing if there are none.
fn render_where(conditions: Vec<String>) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.into_iter().join(" AND "))
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
            conn: self,
            columns,
            table,
            clauses: vec![],
        }
    }

    fn insert<'a>(&'a self, table: &'a Relation, columns: Vec<String>) -> Self::Insert<'a> {
        Insert {
            conn: self,
            table,
            columns,
            rows: vec![],
        }
    }

    fn update<'a>(&'a self, table: &'a Relation) -> Self::Update<'a> {
        Update {
            conn: self,
            table,
            assignments: vec![],
            clauses: vec![],
        }
    }

    fn delete<'a>(&'a self, table: &'a Relation) -> Self::Delete<'a> {
        Delete {
            conn: self,
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
        let columns = columns
            .iter()
            .map(|col| format!("{} {}", super::quote_ident(col.name()), col.ty()))
            .join(", ");
        let if_not_exists = if if_not_exists { "IF NOT EXISTS " } else { "" };
        self.execute(
            &format!("CREATE TABLE {if_not_exists}{table} ({columns})"),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn drop_table(
        &self,
        table: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error> {
        let if_exists = if if_exists { "IF EXISTS " } else { "" };
        let cascade = if cascade { " CASCADE" } else { "" };
        self.execute(&format!("DROP TABLE {if_exists}{table}{cascade}"), &[])
            .await?;
        Ok(())
    }

    async fn create_schema(&self, name: &str) -> Result<(), Self::Error> {
        self.execute(&format!("CREATE SCHEMA {}", super::quote_ident(name)), &[])
            .await?;
        Ok(())
    }

    async fn drop_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error> {
        let if_exists = if if_exists { "IF EXISTS " } else { "" };
        let cascade = if cascade { " CASCADE" } else { "" };
        self.execute(
            &format!(
                "DROP SCHEMA {if_exists}{}{cascade}",
                super::quote_ident(name)
            ),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn create_view(
        &self,
        view: &Relation,
        sql: &str,
        or_replace: bool,
    ) -> Result<(), Self::Error> {
        let or_replace = if or_replace { "OR REPLACE " } else { "" };
        self.execute(&format!("CREATE {or_replace}VIEW {view} AS ({sql})"), &[])
            .await?;
        Ok(())
    }

    async fn drop_view(
        &self,
        view: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Self::Error> {
        let if_exists = if if_exists { "IF EXISTS " } else { "" };
        let cascade = if cascade { " CASCADE" } else { "" };
        self.execute(&format!("DROP VIEW {if_exists}{view}{cascade}"), &[])
            .await?;
        Ok(())
    }

    async fn tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, Self::Error> {
        let mut sql = "SELECT table_schema, table_name \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE'"
            .to_string();
        let mut params = vec![];
        if let Some(schema) = schema {
            params.push(Value::from(schema));
            sql.push_str(" AND table_schema = $1");
        }
        sql.push_str(" ORDER BY table_schema, table_name");

        let rows: Vec<Row> = self.query(&sql, &params).await?.try_collect().await?;
        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    schema: row.try_get("table_schema")?,
                    name: row.try_get("table_name")?,
                })
            })
            .collect()
    }

    async fn views(&self, schema: Option<&str>) -> Result<Vec<ViewInfo>, Self::Error> {
        let mut sql = "SELECT table_schema, table_name FROM information_schema.views".to_string();
        let mut params = vec![];
        if let Some(schema) = schema {
            params.push(Value::from(schema));
            sql.push_str(" WHERE table_schema = $1");
        }
        sql.push_str(" ORDER BY table_schema, table_name");

        let rows: Vec<Row> = self.query(&sql, &params).await?.try_collect().await?;
        rows.iter()
            .map(|row| {
                Ok(ViewInfo {
                    schema: row.try_get("table_schema")?,
                    name: row.try_get("table_name")?,
                })
            })
            .collect()
    }

    async fn columns(&self, table: &Relation) -> Result<Vec<ColumnInfo>, Self::Error> {
        // Builtin tables live in pg_catalog but are conventionally referenced without an
        // explicit schema.
        let schema = match table.schema() {
            Some(schema) => schema.to_string(),
            None if table.name().starts_with("pg_") => "pg_catalog".to_string(),
            None => "public".to_string(),
        };
        let sql = "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position";
        let params = [Value::from(schema), Value::from(table.name())];

        let rows: Vec<Row> = self.query(sql, &params).await?.try_collect().await?;
        rows.iter()
            .map(|row| {
                let is_nullable: String = row.try_get("is_nullable")?;
                Ok(ColumnInfo {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: catalog::yes_no(&is_nullable),
                })
            })
            .collect()
    }

    async fn triggers(&self, schema: Option<&str>) -> Result<Vec<TriggerInfo>, Self::Error> {
        let mut sql = "SELECT event_object_schema AS table_schema \
             , event_object_table AS table_name \
             , trigger_schema \
             , trigger_name \
             , string_agg(event_manipulation, ',') AS event \
             , action_timing AS activation \
             , action_condition AS condition \
             , action_statement AS definition \
             FROM information_schema.triggers"
            .to_string();
        let mut params = vec![];
        if let Some(schema) = schema {
            params.push(Value::from(schema));
            sql.push_str(" WHERE trigger_schema = $1");
        }
        sql.push_str(
            " GROUP BY 1, 2, 3, 4, 6, 7, 8 ORDER BY table_schema, table_name, trigger_name",
        );

        let rows: Vec<Row> = self.query(&sql, &params).await?.try_collect().await?;
        rows.iter()
            .map(|row| {
                Ok(TriggerInfo {
                    table_schema: row.try_get("table_schema")?,
                    table_name: row.try_get("table_name")?,
                    schema: row.try_get("trigger_schema")?,
                    name: row.try_get("trigger_name")?,
                    events: row.try_get("event")?,
                    activation: row.try_get("activation")?,
                    condition: row.try_get("condition")?,
                    definition: row.try_get("definition")?,
                })
            })
            .collect()
    }
}

/// A query against a PostgreSQL database.
pub struct Select<'a> {
    conn: &'a Connection,
    columns: &'a [SelectColumn<'a>],
    table: &'a Relation,
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
        // The async block is necessary to move data owned by the query into the future, so we
        // can return the future without returning a reference to a local.
        async move {
            let columns = self.columns.iter().map(|col| col.to_string()).join(", ");
            let table = self.table;

            let mut conditions = vec![];
            let mut params = vec![];
            for clause in self.clauses {
                render_clause(clause, &mut conditions, &mut params);
            }
            let clauses = render_where(conditions);

            let statement = format!("SELECT {columns} FROM {table}{clauses}");
            let rows = self.conn.query(&statement, &params).await?;
            Ok(rows)
        }
        .try_flatten_stream()
        .boxed()
    }
}

/// An `INSERT` statement for a PostgreSQL database.
pub struct Insert<'a> {
    conn: &'a Connection,
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
        if self.rows.is_empty() {
            return Ok(0);
        }

        let width = self.columns.len();
        let num_rows = self.rows.len();
        let mut params = Vec::with_capacity(width * num_rows);
        for row in self.rows {
            if row.len() != width {
                return Err(Error::Custom {
                    message: format!(
                        "incorrect row width for insert into {} (found {}, expected {width})",
                        self.table,
                        row.len()
                    ),
                });
            }
            params.extend(row);
        }

        let columns = self
            .columns
            .iter()
            .map(|col| super::quote_ident(col))
            .join(", ");
        let rows = (0..num_rows)
            .map(|i| {
                let values = (0..width)
                    .map(|j| {
                        // In the statement itself, just reference a parameter by number. We
                        // pass the value itself into the query as a parameter to prevent SQL
                        // injection. Params are 1-indexed.
                        format!("${}", i * width + j + 1)
                    })
                    .join(", ");
                format!("({values})")
            })
            .join(", ");
        self.conn
            .execute(
                &format!("INSERT INTO {} ({columns}) VALUES {rows}", self.table),
                &params,
            )
            .await
    }
}

/// An `UPDATE` statement for a PostgreSQL database.
pub struct Update<'a> {
    conn: &'a Connection,
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
            return Err(Error::Custom {
                message: format!("update of {} has no assignments", self.table),
            });
        }

        let mut params = Vec::with_capacity(self.assignments.len());
        let assignments = self
            .assignments
            .into_iter()
            .map(|(column, value)| {
                params.push(value);
                format!("{} = ${}", super::quote_ident(&column), params.len())
            })
            .join(", ");

        let mut conditions = vec![];
        for clause in self.clauses {
            render_clause(clause, &mut conditions, &mut params);
        }
        let clauses = render_where(conditions);

        self.conn
            .execute(
                &format!("UPDATE {} SET {assignments}{clauses}", self.table),
                &params,
            )
            .await
    }
}

/// A `DELETE` statement for a PostgreSQL database.
pub struct Delete<'a> {
    conn: &'a Connection,
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
        let mut conditions = vec![];
        let mut params = vec![];
        for clause in self.clauses {
            render_clause(clause, &mut conditions, &mut params);
        }
        let clauses = render_where(conditions);

        self.conn
            .execute(&format!("DELETE FROM {}{clauses}", self.table), &params)
            .await
    }
}

impl super::Row for Row {
    type Error = Error;

    fn names(&self) -> Vec<String> {
        self.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect()
    }

    fn column(&self, column: &str) -> Result<Value, Self::Error> {
        Ok(self.try_get(column)?)
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>
    where
        Self: Sized,
    {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(x) => x.to_sql(ty, out),
            Self::Int4(x) => x.to_sql(ty, out),
            Self::Int8(x) => x.to_sql(ty, out),
            Self::Float8(x) => x.to_sql(ty, out),
            Self::Text(x) => x.to_sql(ty, out),
        }
    }

    accepts!(BOOL, INT4, INT8, FLOAT8, TEXT, VARCHAR, BPCHAR, NAME);
    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        if *ty == Type::BOOL {
            Ok(Self::Bool(bool::from_sql(ty, raw)?))
        } else if *ty == Type::INT4 {
            Ok(Self::Int4(i32::from_sql(ty, raw)?))
        } else if *ty == Type::INT8 {
            Ok(Self::Int8(i64::from_sql(ty, raw)?))
        } else if *ty == Type::FLOAT8 {
            Ok(Self::Float8(f64::from_sql(ty, raw)?))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            Ok(Self::Text(String::from_sql(ty, raw)?))
        } else {
            Err(Box::new(Error::UnsupportedType { ty: ty.clone() }))
        }
    }

    fn from_sql_null(
        _ty: &Type,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        Ok(Self::Null)
    }

    accepts!(BOOL, INT4, INT8, FLOAT8, TEXT, VARCHAR, BPCHAR, NAME);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::{Connection as _, Delete as _, Insert as _, SelectExt, Update as _};
    use crate::db::{Type as ColumnType, Value};
    use crate::init_logging;
    use crate::script::ScriptLog;
    use rand::RngCore;
    use std::env;
    use std::process::Command;
    use std::str;

    struct Db {
        name: String,
        port: u16,
    }

    impl Db {
        fn create() -> Option<Self> {
            if env::var("POSTGRES_TESTS").is_err() {
                tracing::warn!("skipping postgres test since POSTGRES_TESTS are not enabled");
                return None;
            }

            let name = format!("db{}", rand::thread_rng().next_u64());
            let port = env::var("POSTGRES_TESTS_PORT")
                .map(|port| port.parse().unwrap())
                .unwrap_or(5432);

            tracing::info!("Creating test DB {name} on port {port}");
            let output = Command::new("createdb")
                .arg("-p")
                .arg(&port.to_string())
                .arg(&name)
                .output()
                .unwrap();
            if !output.status.success() {
                panic!(
                    "createdb failed: {}",
                    str::from_utf8(&output.stderr).unwrap()
                );
            }

            Some(Self { name, port })
        }

        async fn connect(&self) -> Connection {
            let user =
                env::var("POSTGRES_TESTS_USER").unwrap_or_else(|_| "postgres".to_string());
            let mut config = Config::default();
            config
                .dbname(&self.name)
                .user(&user)
                .host("localhost")
                .port(self.port);
            Connection::new(config).await.unwrap()
        }
    }

    impl Drop for Db {
        fn drop(&mut self) {
            tracing::info!("Dropping test DB {}", self.name);
            let output = Command::new("dropdb")
                .arg("-p")
                .arg(&self.port.to_string())
                .arg(&self.name)
                .output()
                .unwrap();
            if !output.status.success() {
                tracing::error!("dropdb failed: {}", str::from_utf8(&output.stderr).unwrap());
            }
        }
    }

    macro_rules! postgres_test {
        () => {
            match Db::create() {
                Some(db) => db,
                None => return,
            }
        };
    }

    #[tokio::test]
    async fn test_postgres_round_trip() {
        init_logging();
        let db = postgres_test!();
        let conn = db.connect().await;

        let table = Relation::new("events");
        conn.create_table(
            &table,
            &[
                SchemaColumn::new("id", ColumnType::Int4),
                SchemaColumn::new("label", ColumnType::Text),
            ],
            false,
        )
        .await
        .unwrap();

        let written = conn
            .insert(&table, vec!["id".into(), "label".into()])
            .rows([
                vec![Value::from(1), Value::from("a")],
                vec![Value::from(2), Value::from("b")],
            ])
            .execute()
            .await
            .unwrap();
        assert_eq!(written, 2);

        let rows = conn
            .select(&[SelectColumn::All], &table)
            .filter("id", "=", 2.into())
            .many()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            crate::db::Row::column(&rows[0], "label").unwrap(),
            Value::from("b")
        );

        let touched = conn
            .update(&table)
            .set("label", "c")
            .filter("id", "=", 2.into())
            .execute()
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let deleted = conn
            .delete(&table)
            .filter("id", "=", 1.into())
            .execute()
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        // The catalog sees the new table.
        let tables = conn.tables(Some("public")).await.unwrap();
        assert!(tables.iter().any(|t| t.name == "events"));
        let columns = conn.columns(&table).await.unwrap();
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].data_type, "integer");
    }

    #[tokio::test]
    async fn test_postgres_script_rolls_back() {
        init_logging();
        let db = postgres_test!();
        let mut conn = db.connect().await;

        let dir = tempfile::tempdir().unwrap();
        let mut log = ScriptLog::new(dir.path().join("statements.log"));
        conn.execute_script(
            [
                "CREATE TABLE points (x int4)",
                "INSERT INTO points VALUES (1), (2)",
            ],
            Some(&mut log),
        )
        .await
        .unwrap();

        // A failing script must not leave earlier statements applied.
        let err = conn
            .execute_script(["DELETE FROM points", "SELECT * FROM nonexistent"], None)
            .await;
        assert!(err.is_err());
        let rows = conn
            .select(&[SelectColumn::All], &Relation::new("points"))
            .many()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }
}
