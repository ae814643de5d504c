#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Connection-independent schema catalog.
//!
//! A [`SchemaMetadata`] enumerates table definitions (columns, types, keys,
//! references and constraints) without binding to any database engine. The
//! same catalog is rendered into production DDL and into the embedded test
//! database by `mcdb::dialect`.
//!
//! # Example
//! ```
//! use mcdb_schema::{Column, ColumnType, DefaultValue, SchemaMetadata, Table};
//!
//! let schema = SchemaMetadata::builder()
//!     .table(
//!         Table::new("asset")
//!             .column(Column::new("id", ColumnType::Integer).primary_key().autoincrement())
//!             .column(Column::new("symbol", ColumnType::Varchar(Some(100))).nullable())
//!             .column(
//!                 Column::new("is_active", ColumnType::Boolean)
//!                     .default_value(DefaultValue::Bool(true)),
//!             ),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(schema.tables().len(), 1);
//! ```

pub mod catalog;

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Errors raised while assembling a catalog.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table '{0}' is declared more than once")]
    DuplicateTable(String),

    #[error("column '{column}' is declared more than once in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{0}' has no columns")]
    EmptyTable(String),
}

/// Logical column types, spelled the way the production (`PostgreSQL`) schema uses them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Boolean,
    Real,
    Double,
    /// Arbitrary precision decimal.
    Numeric {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Text,
    Varchar(Option<u32>),
    Date,
    Time,
    Timestamp {
        with_time_zone: bool,
    },
    Interval,
    Uuid,
    Json,
    Jsonb,
    Bytes,
    Array(Box<ColumnType>),
    /// Engine specific type referenced by name (e.g. `tsvector`).
    Custom(String),
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInt => f.write_str("smallint"),
            Self::Integer => f.write_str("integer"),
            Self::BigInt => f.write_str("bigint"),
            Self::Boolean => f.write_str("boolean"),
            Self::Real => f.write_str("real"),
            Self::Double => f.write_str("double precision"),
            Self::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "numeric({p}, {s})"),
            Self::Numeric {
                precision: Some(p),
                scale: None,
            } => write!(f, "numeric({p})"),
            Self::Numeric { .. } => f.write_str("numeric"),
            Self::Text => f.write_str("text"),
            Self::Varchar(Some(n)) => write!(f, "varchar({n})"),
            Self::Varchar(None) => f.write_str("varchar"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
            Self::Timestamp {
                with_time_zone: true,
            } => f.write_str("timestamptz"),
            Self::Timestamp {
                with_time_zone: false,
            } => f.write_str("timestamp"),
            Self::Interval => f.write_str("interval"),
            Self::Uuid => f.write_str("uuid"),
            Self::Json => f.write_str("json"),
            Self::Jsonb => f.write_str("jsonb"),
            Self::Bytes => f.write_str("bytea"),
            Self::Array(inner) => write!(f, "{inner}[]"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Server-side column default.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    CurrentTimestamp,
    CurrentDate,
    /// Raw SQL default. `portable` marks expressions every supported engine understands.
    Expression { sql: String, portable: bool },
}

/// `ON DELETE` behaviour of a reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
}

/// Column-level foreign key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub table: String,
    pub column: String,
    pub on_delete: ReferentialAction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    pub references: Option<Reference>,
    pub comment: Option<String>,
}

impl Column {
    /// New `NOT NULL` column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default: None,
            references: None,
            comment: None,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(Reference {
            table: table.into(),
            column: column.into(),
            on_delete: ReferentialAction::NoAction,
        });
        self
    }

    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let Some(reference) = self.references.as_mut() {
            reference.on_delete = action;
        }
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckConstraint {
    pub name: String,
    pub expression: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<Column>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub checks: Vec<CheckConstraint>,
    pub comment: Option<String>,
}

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            unique_constraints: Vec::new(),
            checks: Vec::new(),
            comment: None,
        }
    }

    /// Places the table in a named schema (`public`, `market`, ...).
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn unique_constraint<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_constraints.push(UniqueConstraint {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.checks.push(CheckConstraint {
            name: name.into(),
            expression: expression.into(),
        });
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Primary key columns in declaration order.
    pub fn primary_key(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Name of the primary key constraint (`<table>_pkey`).
    #[must_use]
    pub fn primary_key_name(&self) -> String {
        format!("{}_pkey", self.name)
    }

    /// `schema.name` when a schema is set, `name` otherwise.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Immutable table catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaMetadata {
    tables: Vec<Table>,
}

impl SchemaMetadata {
    #[must_use]
    pub fn builder() -> SchemaMetadataBuilder {
        SchemaMetadataBuilder::default()
    }

    #[must_use]
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Looks a table up by its unqualified or qualified name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name || t.qualified_name() == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Default)]
pub struct SchemaMetadataBuilder {
    tables: Vec<Table>,
}

impl SchemaMetadataBuilder {
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Finishes the catalog.
    ///
    /// # Errors
    /// Returns [`SchemaError`] for duplicate tables or columns and for tables without columns.
    pub fn build(self) -> Result<SchemaMetadata, SchemaError> {
        let mut seen_tables = HashSet::new();
        for table in &self.tables {
            if !seen_tables.insert(table.qualified_name()) {
                return Err(SchemaError::DuplicateTable(table.qualified_name()));
            }
            if table.columns.is_empty() {
                return Err(SchemaError::EmptyTable(table.name.clone()));
            }
            let mut seen_columns = HashSet::new();
            for column in &table.columns {
                if !seen_columns.insert(column.name.as_str()) {
                    return Err(SchemaError::DuplicateColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }
        Ok(SchemaMetadata {
            tables: self.tables,
        })
    }
}
