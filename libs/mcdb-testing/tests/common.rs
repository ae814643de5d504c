#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use mcdb::{ConnectionTrait, Engine, Statement};
use mcdb_schema::{Column, ColumnType, DefaultValue, SchemaMetadata, Table};

/// `asset(id, symbol, is_active)`: the smallest table the resolver scenarios need.
#[must_use]
pub fn asset_schema() -> SchemaMetadata {
    SchemaMetadata::builder()
        .table(
            Table::new("asset")
                .column(Column::new("id", ColumnType::Integer).primary_key())
                .column(Column::new("symbol", ColumnType::Varchar(Some(100))))
                .column(
                    Column::new("is_active", ColumnType::Boolean)
                        .default_value(DefaultValue::Bool(true)),
                ),
        )
        .build()
        .unwrap()
}

/// Files currently in `dir`; empty when the directory does not exist.
#[must_use]
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

pub async fn execute(engine: &Engine, sql: &str) {
    engine
        .conn()
        .execute(Statement::from_string(engine.backend(), sql))
        .await
        .unwrap();
}

pub async fn count(engine: &Engine, table: &str) -> i64 {
    let row = engine
        .conn()
        .query_one(Statement::from_string(
            engine.backend(),
            format!("SELECT COUNT(*) AS n FROM \"{table}\""),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get("", "n").unwrap()
}

pub async fn assets(engine: &Engine) -> Vec<(i32, String, bool)> {
    let rows = engine
        .conn()
        .query_all(Statement::from_string(
            engine.backend(),
            "SELECT id, symbol, is_active FROM asset ORDER BY id",
        ))
        .await
        .unwrap();
    rows.iter()
        .map(|row| {
            (
                row.try_get("", "id").unwrap(),
                row.try_get("", "symbol").unwrap(),
                row.try_get("", "is_active").unwrap(),
            )
        })
        .collect()
}
