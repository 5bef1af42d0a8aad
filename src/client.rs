//! High-level convenience operations over a database connection.
//!
//! [`SqlClient`] wraps any [`db::Connection`](Connection) and exposes the read, write, DDL and
//! catalog conveniences of this crate. [`PostgresClient`] additionally exposes raw SQL
//! execution and transactional script running, which only the PostgreSQL backend supports.

use crate::catalog::{ColumnInfo, TableInfo, TriggerInfo, ViewInfo};
use crate::db::{
    self, Clause, Connection, Delete as _, Error as DbError, Insert as _, Relation, Row as _,
    SchemaColumn, SelectColumn, SelectExt, Update as _, Value,
};
use crate::script::{self, ScriptLog};
use crate::validate;
use derive_more::From;
use futures::TryStreamExt;
use std::collections::HashMap;

/// A convenience client for a PostgreSQL database.
pub type PostgresClient = SqlClient<db::postgres::Connection>;

/// A convenience client for reading from and writing to a SQL database.
#[derive(Clone, Debug, From)]
pub struct SqlClient<Db>(Db);

impl<Db> SqlClient<Db> {
    /// The underlying connection.
    pub fn db(&self) -> &Db {
        &self.0
    }

    /// The underlying connection, mutably.
    pub fn db_mut(&mut self) -> &mut Db {
        &mut self.0
    }

    /// Consume this client and get the underlying connection.
    pub fn into_inner(self) -> Db {
        self.0
    }
}

impl<Db: Connection + Send + Sync> SqlClient<Db> {
    /// Read an entire table or view.
    pub async fn read_table(&self, table: &Relation) -> Result<Vec<Db::Row>, Db::Error> {
        self.0.select(&[SelectColumn::All], table).many().await
    }

    /// Insert rows into a table, returning the number of rows written.
    ///
    /// Each row must have one value per entry in `columns`. Columns of the table not named in
    /// `columns` are left NULL.
    pub async fn insert_rows(
        &self,
        table: &Relation,
        columns: &[&str],
        rows: impl IntoIterator<Item = Vec<Value>> + Send,
    ) -> Result<u64, Db::Error> {
        self.0
            .insert(table, columns.iter().map(|col| col.to_string()).collect())
            .rows(rows)
            .execute()
            .await
    }

    /// Update the rows of `table` whose `key` column equals `key_value`, assigning each
    /// column-value pair in `assignments`. Returns the number of rows touched.
    pub async fn update_where(
        &self,
        table: &Relation,
        assignments: &[(&str, Value)],
        key: &str,
        key_value: Value,
    ) -> Result<u64, Db::Error> {
        let mut update = self.0.update(table);
        for (column, value) in assignments {
            update = update.set(*column, value.clone());
        }
        update.filter(key, "=", key_value).execute().await
    }

    /// Delete the rows of `table` whose `key` column equals any of `key_values`. Returns the
    /// number of rows deleted.
    pub async fn delete_where(
        &self,
        table: &Relation,
        key: &str,
        key_values: impl IntoIterator<Item = Value> + Send,
    ) -> Result<u64, Db::Error> {
        let mut key_values = key_values.into_iter();
        let delete = self.0.delete(table);
        let delete = match (key_values.next(), key_values.next()) {
            (Some(value), None) => delete.filter(key, "=", value),
            (first, second) => delete.clause(Clause::In {
                column: key.to_string(),
                params: first.into_iter().chain(second).chain(key_values).collect(),
            }),
        };
        delete.execute().await
    }

    /// Delete all records in a table but do not drop the table.
    ///
    /// A nonexistent table is a no-op.
    pub async fn wipe_table(&self, table: &Relation) -> Result<u64, Db::Error> {
        if !self.table_exists(table).await? {
            return Ok(0);
        }
        self.0.delete(table).execute().await
    }

    /// List the base tables in the database, optionally restricted to one schema.
    pub async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableInfo>, Db::Error> {
        self.0.tables(schema).await
    }

    /// List the views in the database, optionally restricted to one schema.
    pub async fn list_views(&self, schema: Option<&str>) -> Result<Vec<ViewInfo>, Db::Error> {
        self.0.views(schema).await
    }

    /// List the triggers in the database, optionally restricted to one schema.
    pub async fn list_triggers(
        &self,
        schema: Option<&str>,
    ) -> Result<Vec<TriggerInfo>, Db::Error> {
        self.0.triggers(schema).await
    }

    /// Whether a table exists in the connected database.
    pub async fn table_exists(&self, table: &Relation) -> Result<bool, Db::Error> {
        Ok(self
            .0
            .tables(table.schema())
            .await?
            .iter()
            .any(|info| info.name == table.name()))
    }

    /// Whether a view exists in the connected database.
    pub async fn view_exists(&self, view: &Relation) -> Result<bool, Db::Error> {
        Ok(self
            .0
            .views(view.schema())
            .await?
            .iter()
            .any(|info| info.name == view.name()))
    }

    /// Whether a table or view with this name exists in the connected database.
    pub async fn table_or_view_exists(&self, relation: &Relation) -> Result<bool, Db::Error> {
        Ok(self.table_exists(relation).await? || self.view_exists(relation).await?)
    }

    /// Describe the columns of a table or view.
    pub async fn columns(&self, table: &Relation) -> Result<Vec<ColumnInfo>, Db::Error> {
        self.0.columns(table).await
    }

    /// The column names of a table, in ordinal position.
    pub async fn column_names(&self, table: &Relation) -> Result<Vec<String>, Db::Error> {
        Ok(self
            .columns(table)
            .await?
            .into_iter()
            .map(|col| col.name)
            .collect())
    }

    /// The column types of a table, as a map from column name to Postgres `data_type` string.
    pub async fn column_types(
        &self,
        table: &Relation,
    ) -> Result<HashMap<String, String>, Db::Error> {
        Ok(self
            .columns(table)
            .await?
            .into_iter()
            .map(|col| (col.name, col.data_type))
            .collect())
    }

    /// Check that `value` may be written to `column` of `table`.
    ///
    /// Returns `false` when the column's type is incompatible with the value, or is a type
    /// this interface does not traffic in.
    ///
    /// # Errors
    ///
    /// This method will fail if the column does not exist.
    pub async fn validate_value(
        &self,
        table: &Relation,
        column: &str,
        value: &Value,
    ) -> Result<bool, Db::Error> {
        let columns = self.columns(table).await?;
        let info = columns
            .iter()
            .find(|info| info.name == column)
            .ok_or_else(|| Db::Error::custom(format!("no such column {table}.{column}")))?;
        let Some(ty) = validate::type_from_data_type(&info.data_type) else {
            tracing::error!(
                "unable to match column {table}.{column} type {} to a supported type",
                info.data_type
            );
            return Ok(false);
        };
        Ok(validate::compatible(value, ty, info.is_nullable))
    }

    /// Flatten a single-column query result into its values.
    ///
    /// # Errors
    ///
    /// This method will fail if any row has more than one column.
    pub fn scalars(&self, rows: &[Db::Row]) -> Result<Vec<Value>, Db::Error> {
        rows.iter()
            .map(|row| {
                let names = row.names();
                match names.as_slice() {
                    [name] => row.column(name),
                    names => Err(Db::Error::custom(format!(
                        "expected a single-column result, got {} columns",
                        names.len()
                    ))),
                }
            })
            .collect()
    }

    /// Create a table with the given columns.
    pub async fn create_table(
        &self,
        table: &Relation,
        columns: &[SchemaColumn],
        if_not_exists: bool,
    ) -> Result<(), Db::Error> {
        self.0.create_table(table, columns, if_not_exists).await
    }

    /// Drop a table.
    pub async fn drop_table(
        &self,
        table: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Db::Error> {
        self.0.drop_table(table, if_exists, cascade).await
    }

    /// Create a schema.
    pub async fn create_schema(&self, name: &str) -> Result<(), Db::Error> {
        self.0.create_schema(name).await
    }

    /// Drop a schema.
    pub async fn drop_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Db::Error> {
        self.0.drop_schema(name, if_exists, cascade).await
    }

    /// Drop then re-create a schema.
    pub async fn recreate_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Db::Error> {
        self.drop_schema(name, if_exists, cascade).await?;
        self.create_schema(name).await
    }

    /// Create a view from user-passed SQL.
    pub async fn create_view(
        &self,
        view: &Relation,
        sql: &str,
        or_replace: bool,
    ) -> Result<(), Db::Error> {
        self.0.create_view(view, sql, or_replace).await
    }

    /// Drop a view.
    pub async fn drop_view(
        &self,
        view: &Relation,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), Db::Error> {
        self.0.drop_view(view, if_exists, cascade).await
    }
}

impl PostgresClient {
    /// Connect to a PostgreSQL database with the given [`Config`](db::postgres::Config).
    pub async fn connect(config: db::postgres::Config) -> Result<Self, db::postgres::Error> {
        Ok(db::postgres::Connection::new(config).await?.into())
    }

    /// Run a SQL query and collect the resulting rows.
    pub async fn read_sql(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<db::postgres::Row>, db::postgres::Error> {
        self.0.query(sql, params).await?.try_collect().await
    }

    /// Run a SQL statement and get the number of rows it affected.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, db::postgres::Error> {
        self.0.execute(sql, params).await
    }

    /// Run a sequence of SQL statements inside a single transaction, optionally logging each
    /// statement. See [`Connection::execute_script`](db::postgres::Connection::execute_script).
    pub async fn execute_script<S: AsRef<str>>(
        &mut self,
        statements: impl IntoIterator<Item = S> + Send,
        log: Option<&mut ScriptLog>,
    ) -> Result<u64, db::postgres::Error> {
        self.0.execute_script(statements, log).await
    }

    /// Split a SQL script into statements and run them inside a single transaction.
    pub async fn run_script(
        &mut self,
        sql: &str,
        log: Option<&mut ScriptLog>,
    ) -> Result<u64, anyhow::Error> {
        let statements = script::split_statements(sql)?;
        Ok(self.execute_script(&statements, log).await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::mock;
    use crate::db::Type;
    use crate::init_logging;

    async fn test_client() -> SqlClient<mock::Connection> {
        init_logging();
        let db = mock::Connection::create();
        db.create_table_with_rows(
            "people",
            [
                SchemaColumn::new("id", Type::Int4),
                SchemaColumn::new("name", Type::Text),
                SchemaColumn::new("active", Type::Bool),
            ],
            [
                vec![Value::from(1), Value::from("ada"), Value::from(true)],
                vec![Value::from(2), Value::from("grace"), Value::from(true)],
                vec![Value::from(3), Value::from("edsger"), Value::from(false)],
            ],
        )
        .await
        .unwrap();
        SqlClient::from(db)
    }

    #[tokio::test]
    async fn test_read_table() {
        let client = test_client().await;
        let rows = client.read_table(&Relation::new("people")).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].column("name").unwrap(), Value::from("ada"));
        assert!(client
            .read_table(&Relation::new("nonexistent"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_insert_subset_leaves_null() {
        let client = test_client().await;
        let table = Relation::new("people");
        let written = client
            .insert_rows(&table, &["id"], [vec![Value::from(4)]])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let rows = client.read_table(&table).await.unwrap();
        let row = rows
            .iter()
            .find(|row| row.column("id").unwrap() == Value::from(4))
            .unwrap();
        assert_eq!(row.column("name").unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_insert_width_mismatch() {
        let client = test_client().await;
        let err = client
            .insert_rows(
                &Relation::new("people"),
                &["id", "name"],
                [vec![Value::from(4)]],
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_update_where() {
        let client = test_client().await;
        let table = Relation::new("people");
        let touched = client
            .update_where(
                &table,
                &[("name", Value::from("adele")), ("active", Value::from(false))],
                "id",
                Value::from(1),
            )
            .await
            .unwrap();
        assert_eq!(touched, 1);

        let rows = client.read_table(&table).await.unwrap();
        let row = rows
            .iter()
            .find(|row| row.column("id").unwrap() == Value::from(1))
            .unwrap();
        assert_eq!(row.column("name").unwrap(), Value::from("adele"));
        assert_eq!(row.column("active").unwrap(), Value::from(false));
    }

    #[tokio::test]
    async fn test_delete_where() {
        let client = test_client().await;
        let table = Relation::new("people");

        let deleted = client
            .delete_where(&table, "id", [Value::from(2)])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let deleted = client
            .delete_where(&table, "id", [Value::from(1), Value::from(3)])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(client.read_table(&table).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wipe_table() {
        let client = test_client().await;
        let table = Relation::new("people");
        assert_eq!(client.wipe_table(&table).await.unwrap(), 3);
        assert!(client.read_table(&table).await.unwrap().is_empty());
        assert!(client.table_exists(&table).await.unwrap());

        // Wiping a nonexistent table is a no-op.
        assert_eq!(
            client.wipe_table(&Relation::new("nonexistent")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_catalog() {
        let client = test_client().await;
        let table = Relation::new("people");

        let tables = client.list_tables(None).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "people");
        assert_eq!(tables[0].schema, "public");

        assert!(client.table_exists(&table).await.unwrap());
        assert!(!client.table_exists(&Relation::new("nonexistent")).await.unwrap());

        assert_eq!(
            client.column_names(&table).await.unwrap(),
            ["id", "name", "active"]
        );
        let types = client.column_types(&table).await.unwrap();
        assert_eq!(types["id"], "int4");
        assert_eq!(types["name"], "text");
        assert_eq!(types["active"], "boolean");
    }

    #[tokio::test]
    async fn test_views() {
        let client = test_client().await;
        let view = Relation::new("active_people");
        client
            .create_view(&view, "SELECT * FROM people WHERE active", false)
            .await
            .unwrap();

        assert!(client.view_exists(&view).await.unwrap());
        assert!(client.table_or_view_exists(&view).await.unwrap());
        assert!(!client.table_exists(&view).await.unwrap());
        assert_eq!(client.list_views(None).await.unwrap().len(), 1);

        // Creating it again without OR REPLACE fails; with it, succeeds.
        assert!(client
            .create_view(&view, "SELECT * FROM people", false)
            .await
            .is_err());
        client
            .create_view(&view, "SELECT * FROM people", true)
            .await
            .unwrap();

        client.drop_view(&view, false, false).await.unwrap();
        assert!(!client.view_exists(&view).await.unwrap());
    }

    #[tokio::test]
    async fn test_schemas() {
        let client = test_client().await;
        client.create_schema("audit").await.unwrap();

        let table = Relation::with_schema("audit", "events");
        client
            .create_table(&table, &[SchemaColumn::new("id", Type::Int4)], false)
            .await
            .unwrap();
        assert!(client.table_exists(&table).await.unwrap());

        // A non-cascading drop of a populated schema fails.
        assert!(client.drop_schema("audit", false, false).await.is_err());
        client.drop_schema("audit", false, true).await.unwrap();
        assert!(!client.table_exists(&table).await.unwrap());

        client.recreate_schema("audit", true, false).await.unwrap();
        assert_eq!(
            client.list_tables(Some("audit")).await.unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_validate_value() {
        let client = test_client().await;
        let table = Relation::new("people");

        assert!(client
            .validate_value(&table, "id", &Value::from(7))
            .await
            .unwrap());
        assert!(client
            .validate_value(&table, "id", &Value::from("7"))
            .await
            .unwrap());
        assert!(!client
            .validate_value(&table, "id", &Value::from("seven"))
            .await
            .unwrap());
        assert!(client
            .validate_value(&table, "active", &Value::from("t"))
            .await
            .unwrap());
        assert!(client
            .validate_value(&table, "name", &Value::Null)
            .await
            .unwrap());
        assert!(client
            .validate_value(&table, "nonexistent", &Value::from(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_scalars() {
        let client = test_client().await;
        let table = Relation::new("people");
        let rows = client
            .db()
            .select(&[SelectColumn::Col("name")], &table)
            .many()
            .await
            .unwrap();
        assert_eq!(
            client.scalars(&rows).unwrap(),
            [
                Value::from("ada"),
                Value::from("grace"),
                Value::from("edsger")
            ]
        );

        // A multi-column result does not simplify.
        let rows = client.read_table(&table).await.unwrap();
        assert!(client.scalars(&rows).is_err());
    }
}
