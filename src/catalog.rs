//! Record types for catalog introspection.
//!
//! These are the shapes returned by the `information_schema` queries in the
//! [postgres backend](crate::db::postgres) and synthesized by the
//! [mock backend](crate::db::mock).

use serde::Serialize;

/// A base table, as listed by `information_schema.tables`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
}

impl TableInfo {
    /// The schema-qualified name of this table.
    pub fn relation(&self) -> crate::db::Relation {
        crate::db::Relation::with_schema(&self.schema, &self.name)
    }
}

/// A view, as listed by `information_schema.views`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewInfo {
    pub schema: String,
    pub name: String,
}

/// A column of a table or view, as described by `information_schema.columns`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// The Postgres `data_type` string, e.g. `integer` or `character varying`.
    pub data_type: String,
    pub is_nullable: bool,
}

/// A trigger, as described by `information_schema.triggers`.
///
/// One record per trigger, with the triggering events joined into a comma-separated list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TriggerInfo {
    pub table_schema: String,
    pub table_name: String,
    pub schema: String,
    pub name: String,
    /// Comma-separated event manipulations, e.g. `INSERT,UPDATE`.
    pub events: String,
    /// `BEFORE`, `AFTER` or `INSTEAD OF`.
    pub activation: String,
    pub condition: Option<String>,
    pub definition: String,
}

/// Decode the `YES`/`NO` strings used by `information_schema` for boolean columns.
pub fn yes_no(s: &str) -> bool {
    s.eq_ignore_ascii_case("yes")
}
