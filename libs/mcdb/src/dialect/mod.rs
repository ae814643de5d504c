//! Schema translation between the production dialect and the embedded one.
//!
//! [`DialectAdapter::translate`] turns a [`SchemaMetadata`] into a
//! [`SchemaSpec`]: native type names for the target engine, rendered
//! defaults, flattened names and a creation order where referenced tables
//! come first. The metadata itself is never modified.
//!
//! `SQLite` mapping:
//!
//! | logical type                            | native    | stored as          |
//! |-----------------------------------------|-----------|--------------------|
//! | smallint, integer, bigint               | `INTEGER` | native             |
//! | boolean                                 | `BOOLEAN` | integer 0/1        |
//! | real, double                            | `REAL`    | native             |
//! | numeric                                 | `NUMERIC` | native             |
//! | text, varchar                           | `TEXT`    | native             |
//! | date, time, timestamp, interval, uuid   | `TEXT`    | ISO-8601 / hyphenated text |
//! | json, jsonb, arrays                     | `TEXT`    | JSON text          |
//! | bytes                                   | `BLOB`    | native             |
//! | custom                                  | registered fallback, error otherwise |
//!
//! Non-portable default expressions are dropped from the `SQLite` DDL and
//! listed in [`SchemaSpec::deferred_defaults`]; the application has to supply
//! those values itself.

mod ddl;

pub use ddl::{clear_database, create_all, drop_all};

use std::collections::{HashMap, HashSet};

use mcdb_schema::{
    CheckConstraint, Column, ColumnType, DefaultValue, ReferentialAction, SchemaMetadata, Table,
    UniqueConstraint,
};
use thiserror::Error;

use crate::DbEngine;

/// How values of a column are represented in storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    Native,
    /// Booleans stored as 0/1.
    Integer,
    /// Temporal values and UUIDs stored as text.
    Text,
    /// JSON documents and arrays serialized to JSON text.
    Json,
}

/// Engine specific column type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeType {
    pub name: String,
    pub storage: Storage,
}

impl NativeType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: Storage::Native,
        }
    }

    #[must_use]
    pub fn stored_as(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    /// `TEXT` holding a textual representation.
    #[must_use]
    pub fn text() -> Self {
        Self::new("TEXT").stored_as(Storage::Text)
    }

    /// `TEXT` holding JSON.
    #[must_use]
    pub fn json() -> Self {
        Self::new("TEXT").stored_as(Storage::Json)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub native: NativeType,
    pub nullable: bool,
    pub autoincrement: bool,
    pub unique: bool,
    /// Rendered SQL default.
    pub default: Option<String>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub name: String,
    pub column: String,
    pub target_schema: Option<String>,
    pub target_table: String,
    pub target_column: String,
    pub on_delete: ReferentialAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    /// Always `None` for `SQLite`.
    pub schema: Option<String>,
    pub columns: Vec<ColumnSpec>,
    pub primary_key_name: String,
    pub primary_key: Vec<String>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub checks: Vec<CheckConstraint>,
    pub foreign_keys: Vec<ForeignKeySpec>,
    pub comment: Option<String>,
}

impl TableSpec {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key is carried inline by an autoincrement column.
    fn inline_primary_key(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.autoincrement)
    }
}

/// Default the target engine cannot evaluate; the application must supply it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeferredDefault {
    pub table: String,
    pub column: String,
    pub expression: String,
}

/// Translated schema, ready to be materialized in one engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaSpec {
    pub engine: DbEngine,
    /// Creation order: referenced tables first.
    pub tables: Vec<TableSpec>,
    pub deferred_defaults: Vec<DeferredDefault>,
}

impl SchemaSpec {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaTranslationError {
    #[error("{engine} has no equivalent for type '{type_name}' of {table}.{column}")]
    UnmappedType {
        engine: DbEngine,
        table: String,
        column: String,
        type_name: String,
    },

    #[error("{table}.{column} references unknown table '{target}'")]
    UnknownTable {
        table: String,
        column: String,
        target: String,
    },

    #[error("{context} refers to unknown column {table}.{column}")]
    UnknownColumn {
        context: String,
        table: String,
        column: String,
    },

    #[error("{table}.{column}: autoincrement requires a single-column integer primary key")]
    InvalidAutoincrement { table: String, column: String },

    #[error("{table}.{column}: invalid default ({reason})")]
    InvalidDefault {
        table: String,
        column: String,
        reason: String,
    },

    #[error("table name '{name}' is ambiguous once schemas are dropped ({first}, {second})")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("reference cycle between tables: {}", tables.join(", "))]
    DependencyCycle { tables: Vec<String> },
}

type TranslateResult<T> = std::result::Result<T, SchemaTranslationError>;

/// Translates schema metadata for one target engine.
#[derive(Clone, Debug)]
pub struct DialectAdapter {
    engine: DbEngine,
    fallbacks: HashMap<String, NativeType>,
}

impl DialectAdapter {
    #[must_use]
    pub fn new(engine: DbEngine) -> Self {
        Self {
            engine,
            fallbacks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// Map a type (by its production spelling, e.g. `tsvector` or `interval`)
    /// to a native type. Fallbacks take precedence over the built-in table.
    pub fn register_fallback(
        &mut self,
        type_name: impl Into<String>,
        native: NativeType,
    ) -> &mut Self {
        self.fallbacks.insert(type_name.into(), native);
        self
    }

    /// Translate `metadata` for this adapter's engine.
    ///
    /// # Errors
    /// [`SchemaTranslationError`] on the first inconsistency found.
    pub fn translate(&self, metadata: &SchemaMetadata) -> TranslateResult<SchemaSpec> {
        self.check_flattened_names(metadata)?;

        let mut deferred_defaults = Vec::new();
        let mut tables = Vec::with_capacity(metadata.tables().len());
        for table in metadata.tables() {
            tables.push(self.translate_table(metadata, table, &mut deferred_defaults)?);
        }

        let order = creation_order(metadata)?;
        let mut slots: Vec<Option<TableSpec>> = tables.into_iter().map(Some).collect();
        let tables = order
            .into_iter()
            .filter_map(|idx| slots.get_mut(idx).and_then(Option::take))
            .collect();

        Ok(SchemaSpec {
            engine: self.engine,
            tables,
            deferred_defaults,
        })
    }

    fn target_schema(&self, table: &Table) -> Option<String> {
        match self.engine {
            DbEngine::Postgres => table.schema.clone(),
            DbEngine::Sqlite => None,
        }
    }

    fn check_flattened_names(&self, metadata: &SchemaMetadata) -> TranslateResult<()> {
        if self.engine != DbEngine::Sqlite {
            return Ok(());
        }
        let mut seen: HashMap<&str, String> = HashMap::new();
        for table in metadata.tables() {
            if let Some(first) = seen.insert(table.name.as_str(), table.qualified_name()) {
                return Err(SchemaTranslationError::NameCollision {
                    name: table.name.clone(),
                    first,
                    second: table.qualified_name(),
                });
            }
        }
        Ok(())
    }

    fn translate_table(
        &self,
        metadata: &SchemaMetadata,
        table: &Table,
        deferred: &mut Vec<DeferredDefault>,
    ) -> TranslateResult<TableSpec> {
        let primary_key: Vec<String> = table.primary_key().map(|c| c.name.clone()).collect();

        let mut columns = Vec::with_capacity(table.columns.len());
        let mut foreign_keys = Vec::new();
        for column in &table.columns {
            if column.autoincrement {
                check_autoincrement(table, column, primary_key.len())?;
            }
            let native = self.native_type(table, column)?;
            let default = match &column.default {
                Some(value) => self.render_default(table, column, value, deferred)?,
                None => None,
            };
            if let Some(reference) = &column.references {
                let target = metadata.table(&reference.table).ok_or_else(|| {
                    SchemaTranslationError::UnknownTable {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        target: reference.table.clone(),
                    }
                })?;
                if target.find_column(&reference.column).is_none() {
                    return Err(SchemaTranslationError::UnknownColumn {
                        context: format!("reference from {}.{}", table.name, column.name),
                        table: target.name.clone(),
                        column: reference.column.clone(),
                    });
                }
                foreign_keys.push(ForeignKeySpec {
                    name: format!("{}_{}_fkey", table.name, column.name),
                    column: column.name.clone(),
                    target_schema: self.target_schema(target),
                    target_table: target.name.clone(),
                    target_column: reference.column.clone(),
                    on_delete: reference.on_delete,
                });
            }
            columns.push(ColumnSpec {
                name: column.name.clone(),
                native,
                nullable: column.nullable,
                autoincrement: column.autoincrement,
                unique: column.unique,
                default,
                comment: column.comment.clone(),
            });
        }

        for unique in &table.unique_constraints {
            for name in &unique.columns {
                if table.find_column(name).is_none() {
                    return Err(SchemaTranslationError::UnknownColumn {
                        context: format!("unique constraint {}", unique.name),
                        table: table.name.clone(),
                        column: name.clone(),
                    });
                }
            }
        }

        Ok(TableSpec {
            name: table.name.clone(),
            schema: self.target_schema(table),
            columns,
            primary_key_name: table.primary_key_name(),
            primary_key,
            unique_constraints: table.unique_constraints.clone(),
            checks: table.checks.clone(),
            foreign_keys,
            comment: table.comment.clone(),
        })
    }

    fn native_type(&self, table: &Table, column: &Column) -> TranslateResult<NativeType> {
        let spelled = column.ty.to_string();
        if let Some(native) = self.fallbacks.get(&spelled) {
            tracing::debug!(
                table = %table.name,
                column = %column.name,
                ty = %spelled,
                native = %native.name,
                "fallback type mapping"
            );
            return Ok(native.clone());
        }
        let mapped = match self.engine {
            DbEngine::Sqlite => sqlite_type(&column.ty),
            DbEngine::Postgres => Some(postgres_type(&column.ty, column.autoincrement)),
        };
        mapped.ok_or_else(|| SchemaTranslationError::UnmappedType {
            engine: self.engine,
            table: table.name.clone(),
            column: column.name.clone(),
            type_name: spelled,
        })
    }

    fn render_default(
        &self,
        table: &Table,
        column: &Column,
        value: &DefaultValue,
        deferred: &mut Vec<DeferredDefault>,
    ) -> TranslateResult<Option<String>> {
        let sql = match value {
            DefaultValue::Bool(b) => match (self.engine, b) {
                (DbEngine::Postgres, true) => "TRUE".to_owned(),
                (DbEngine::Postgres, false) => "FALSE".to_owned(),
                (DbEngine::Sqlite, true) => "1".to_owned(),
                (DbEngine::Sqlite, false) => "0".to_owned(),
            },
            DefaultValue::Int(i) => i.to_string(),
            DefaultValue::Float(f) if f.is_finite() => format!("{f:?}"),
            DefaultValue::Float(f) => {
                return Err(SchemaTranslationError::InvalidDefault {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    reason: format!("{f} is not a finite number"),
                });
            }
            DefaultValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_owned(),
            DefaultValue::CurrentDate => "CURRENT_DATE".to_owned(),
            DefaultValue::Expression { sql, .. } if self.engine == DbEngine::Postgres => {
                sql.clone()
            }
            // SQLite only accepts parenthesized expressions as defaults.
            DefaultValue::Expression {
                sql,
                portable: true,
            } => format!("({sql})"),
            DefaultValue::Expression {
                sql,
                portable: false,
            } => {
                tracing::warn!(
                    table = %table.name,
                    column = %column.name,
                    expression = %sql,
                    "default expression is not portable; deferred to the application"
                );
                deferred.push(DeferredDefault {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    expression: sql.clone(),
                });
                return Ok(None);
            }
        };
        Ok(Some(sql))
    }
}

fn check_autoincrement(table: &Table, column: &Column, pk_len: usize) -> TranslateResult<()> {
    let integer = matches!(
        column.ty,
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt
    );
    if column.primary_key && pk_len == 1 && integer {
        Ok(())
    } else {
        Err(SchemaTranslationError::InvalidAutoincrement {
            table: table.name.clone(),
            column: column.name.clone(),
        })
    }
}

fn sqlite_type(ty: &ColumnType) -> Option<NativeType> {
    let native = match ty {
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
            NativeType::new("INTEGER")
        }
        ColumnType::Boolean => NativeType::new("BOOLEAN").stored_as(Storage::Integer),
        ColumnType::Real | ColumnType::Double => NativeType::new("REAL"),
        ColumnType::Numeric { .. } => NativeType::new("NUMERIC"),
        ColumnType::Text | ColumnType::Varchar(_) => NativeType::new("TEXT"),
        ColumnType::Date
        | ColumnType::Time
        | ColumnType::Timestamp { .. }
        | ColumnType::Interval
        | ColumnType::Uuid => NativeType::text(),
        ColumnType::Json | ColumnType::Jsonb | ColumnType::Array(_) => NativeType::json(),
        ColumnType::Bytes => NativeType::new("BLOB"),
        ColumnType::Custom(_) => return None,
    };
    Some(native)
}

fn postgres_type(ty: &ColumnType, autoincrement: bool) -> NativeType {
    let name = match (ty, autoincrement) {
        (ColumnType::SmallInt, true) => "SMALLSERIAL".to_owned(),
        (ColumnType::Integer, true) => "SERIAL".to_owned(),
        (ColumnType::BigInt, true) => "BIGSERIAL".to_owned(),
        (ColumnType::Double, _) => "DOUBLE PRECISION".to_owned(),
        (ColumnType::Bytes, _) => "BYTEA".to_owned(),
        (ColumnType::Array(inner), _) => format!("{}[]", postgres_type(inner, false).name),
        (ColumnType::Custom(name), _) => name.clone(),
        (other, _) => other.to_string().to_uppercase(),
    };
    NativeType::new(name)
}

/// Table indices ordered so that every referenced table precedes its referrers.
/// Ties keep declaration order; self references are ignored.
fn creation_order(metadata: &SchemaMetadata) -> TranslateResult<Vec<usize>> {
    let tables = metadata.tables();
    let index_of = |name: &str| {
        tables
            .iter()
            .position(|t| t.name == name || t.qualified_name() == name)
    };
    let deps: Vec<HashSet<usize>> = tables
        .iter()
        .enumerate()
        .map(|(idx, table)| {
            table
                .columns
                .iter()
                .filter_map(|c| c.references.as_ref())
                .filter_map(|r| index_of(&r.table))
                .filter(|&dep| dep != idx)
                .collect()
        })
        .collect();

    let mut placed = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());
    while order.len() < tables.len() {
        let next = (0..tables.len())
            .find(|&idx| !placed[idx] && deps[idx].iter().all(|&dep| placed[dep]));
        match next {
            Some(idx) => {
                placed[idx] = true;
                order.push(idx);
            }
            None => {
                let stuck = tables
                    .iter()
                    .zip(&placed)
                    .filter(|(_, done)| !**done)
                    .map(|(t, _)| t.name.clone())
                    .collect();
                return Err(SchemaTranslationError::DependencyCycle { tables: stuck });
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use mcdb_schema::{Column, Table};
    use tracing_test::traced_test;

    fn asset_schema() -> SchemaMetadata {
        SchemaMetadata::builder()
            .table(
                Table::new("asset")
                    .column(Column::new("id", ColumnType::Integer).primary_key().autoincrement())
                    .column(Column::new("symbol", ColumnType::Varchar(Some(100))).nullable())
                    .column(
                        Column::new("is_active", ColumnType::Boolean)
                            .default_value(DefaultValue::Bool(true)),
                    )
                    .column(
                        Column::new("tags", ColumnType::Array(Box::new(ColumnType::Text)))
                            .nullable(),
                    )
                    .column(Column::new("payload", ColumnType::Jsonb).nullable())
                    .column(
                        Column::new(
                            "price",
                            ColumnType::Numeric {
                                precision: Some(20),
                                scale: Some(8),
                            },
                        )
                        .nullable(),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn sqlite_types_follow_the_mapping_table() {
        let spec = DialectAdapter::new(DbEngine::Sqlite)
            .translate(&asset_schema())
            .unwrap();
        let asset = spec.table("asset").unwrap();
        let native = |c: &str| asset.column(c).unwrap().native.clone();

        assert_eq!(native("id").name, "INTEGER");
        assert_eq!(native("symbol").name, "TEXT");
        assert_eq!(native("is_active"), NativeType::new("BOOLEAN").stored_as(Storage::Integer));
        assert_eq!(native("tags"), NativeType::json());
        assert_eq!(native("payload"), NativeType::json());
        assert_eq!(native("price").name, "NUMERIC");
        assert_eq!(asset.column("is_active").unwrap().default.as_deref(), Some("1"));
    }

    #[test]
    fn postgres_translation_keeps_native_types() {
        let spec = DialectAdapter::new(DbEngine::Postgres)
            .translate(&asset_schema())
            .unwrap();
        let asset = spec.table("asset").unwrap();
        let native = |c: &str| asset.column(c).unwrap().native.name.clone();

        assert_eq!(native("id"), "SERIAL");
        assert_eq!(native("symbol"), "VARCHAR(100)");
        assert_eq!(native("tags"), "TEXT[]");
        assert_eq!(native("payload"), "JSONB");
        assert_eq!(native("price"), "NUMERIC(20, 8)");
        assert_eq!(asset.column("is_active").unwrap().default.as_deref(), Some("TRUE"));
        assert_eq!(asset.primary_key_name, "asset_pkey");
    }

    #[test]
    fn custom_type_without_fallback_is_rejected_for_sqlite() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("provider_content")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(Column::new("search", ColumnType::Custom("tsvector".to_owned()))),
            )
            .build()
            .unwrap();

        let err = DialectAdapter::new(DbEngine::Sqlite)
            .translate(&schema)
            .unwrap_err();
        assert_eq!(
            err,
            SchemaTranslationError::UnmappedType {
                engine: DbEngine::Sqlite,
                table: "provider_content".to_owned(),
                column: "search".to_owned(),
                type_name: "tsvector".to_owned(),
            }
        );

        let mut adapter = DialectAdapter::new(DbEngine::Sqlite);
        adapter.register_fallback("tsvector", NativeType::text());
        let spec = adapter.translate(&schema).unwrap();
        assert_eq!(
            spec.table("provider_content").unwrap().column("search").unwrap().native,
            NativeType::text()
        );

        let pg = DialectAdapter::new(DbEngine::Postgres).translate(&schema).unwrap();
        assert_eq!(
            pg.table("provider_content").unwrap().column("search").unwrap().native.name,
            "tsvector"
        );
    }

    #[test]
    #[traced_test]
    fn non_portable_defaults_are_deferred_on_sqlite() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("provider_content")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(Column::new("external_id", ColumnType::Uuid).default_value(
                        DefaultValue::Expression {
                            sql: "gen_random_uuid()".to_owned(),
                            portable: false,
                        },
                    ))
                    .column(Column::new("score", ColumnType::Double).default_value(
                        DefaultValue::Expression {
                            sql: "0.5 * 2".to_owned(),
                            portable: true,
                        },
                    ))
                    .column(
                        Column::new("title", ColumnType::Text)
                            .default_value(DefaultValue::Text("it's".to_owned())),
                    ),
            )
            .build()
            .unwrap();

        let spec = DialectAdapter::new(DbEngine::Sqlite).translate(&schema).unwrap();
        let table = spec.table("provider_content").unwrap();
        assert_eq!(table.column("external_id").unwrap().default, None);
        assert_eq!(table.column("score").unwrap().default.as_deref(), Some("(0.5 * 2)"));
        assert_eq!(table.column("title").unwrap().default.as_deref(), Some("'it''s'"));
        assert_eq!(
            spec.deferred_defaults,
            vec![DeferredDefault {
                table: "provider_content".to_owned(),
                column: "external_id".to_owned(),
                expression: "gen_random_uuid()".to_owned(),
            }]
        );
        assert!(logs_contain("deferred to the application"));

        let pg = DialectAdapter::new(DbEngine::Postgres).translate(&schema).unwrap();
        assert!(pg.deferred_defaults.is_empty());
    }

    #[test]
    fn tables_are_ordered_by_references() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("asset")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(
                        Column::new("asset_type_id", ColumnType::Integer)
                            .references("asset_type", "id"),
                    )
                    .column(
                        Column::new("underlying_asset_id", ColumnType::Integer)
                            .nullable()
                            .references("asset", "id"),
                    ),
            )
            .table(
                Table::new("asset_type")
                    .column(Column::new("id", ColumnType::Integer).primary_key()),
            )
            .build()
            .unwrap();

        let spec = DialectAdapter::new(DbEngine::Sqlite).translate(&schema).unwrap();
        assert_eq!(spec.table_names().collect::<Vec<_>>(), ["asset_type", "asset"]);
        assert_eq!(spec.table("asset").unwrap().foreign_keys.len(), 2);
    }

    #[test]
    fn reference_cycles_are_rejected() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("a")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(Column::new("b_id", ColumnType::Integer).references("b", "id")),
            )
            .table(
                Table::new("b")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(Column::new("a_id", ColumnType::Integer).references("a", "id")),
            )
            .build()
            .unwrap();

        let err = DialectAdapter::new(DbEngine::Postgres).translate(&schema).unwrap_err();
        assert_eq!(
            err,
            SchemaTranslationError::DependencyCycle {
                tables: vec!["a".to_owned(), "b".to_owned()]
            }
        );
    }

    #[test]
    fn dangling_references_are_rejected() {
        let unknown_table = SchemaMetadata::builder()
            .table(
                Table::new("asset")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(
                        Column::new("type_id", ColumnType::Integer).references("asset_type", "id"),
                    ),
            )
            .build()
            .unwrap();
        assert!(matches!(
            DialectAdapter::new(DbEngine::Sqlite).translate(&unknown_table),
            Err(SchemaTranslationError::UnknownTable { .. })
        ));

        let unknown_column = SchemaMetadata::builder()
            .table(
                Table::new("asset")
                    .column(Column::new("id", ColumnType::Integer).primary_key())
                    .column(Column::new("parent", ColumnType::Integer).references("asset", "uid")),
            )
            .build()
            .unwrap();
        assert!(matches!(
            DialectAdapter::new(DbEngine::Sqlite).translate(&unknown_column),
            Err(SchemaTranslationError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn autoincrement_needs_single_integer_primary_key() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("provider_asset")
                    .column(Column::new("date", ColumnType::Date).primary_key())
                    .column(Column::new("seq", ColumnType::Integer).primary_key().autoincrement()),
            )
            .build()
            .unwrap();
        assert_eq!(
            DialectAdapter::new(DbEngine::Sqlite).translate(&schema),
            Err(SchemaTranslationError::InvalidAutoincrement {
                table: "provider_asset".to_owned(),
                column: "seq".to_owned(),
            })
        );
    }

    #[test]
    fn flattening_schemas_detects_collisions() {
        let schema = SchemaMetadata::builder()
            .table(
                Table::new("asset")
                    .in_schema("public")
                    .column(Column::new("id", ColumnType::Integer)),
            )
            .table(
                Table::new("asset")
                    .in_schema("archive")
                    .column(Column::new("id", ColumnType::Integer)),
            )
            .build()
            .unwrap();

        assert!(matches!(
            DialectAdapter::new(DbEngine::Sqlite).translate(&schema),
            Err(SchemaTranslationError::NameCollision { .. })
        ));
        let pg = DialectAdapter::new(DbEngine::Postgres).translate(&schema).unwrap();
        assert_eq!(pg.tables[1].schema.as_deref(), Some("archive"));
    }

    #[test]
    fn production_catalog_translates_for_both_engines() {
        let catalog = mcdb_schema::catalog::schema();
        for engine in [DbEngine::Sqlite, DbEngine::Postgres] {
            let spec = DialectAdapter::new(engine).translate(&catalog).unwrap();
            assert_eq!(spec.tables.len(), catalog.tables().len());
            assert!(spec.deferred_defaults.is_empty());
            let position = |name: &str| spec.table_names().position(|t| t == name).unwrap();
            assert!(position("asset_type") < position("asset"));
            assert!(position("provider_content") < position("asset_content"));
        }
    }
}
