//! DDL rendering and schema application.

use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, IntoTableRef, Table,
    TableCreateStatement, TableDropStatement, TableRef,
};
use sea_orm::{ConnectionTrait, DbBackend, Statement, TransactionTrait};

use mcdb_schema::ReferentialAction;

use super::{SchemaSpec, TableSpec};
use crate::{DbEngine, DbError, Engine, Result};

fn table_ref(schema: Option<&str>, name: &str) -> TableRef {
    match schema {
        Some(schema) => (Alias::new(schema), Alias::new(name)).into_table_ref(),
        None => Alias::new(name).into_table_ref(),
    }
}

fn fk_action(action: ReferentialAction) -> ForeignKeyAction {
    match action {
        ReferentialAction::NoAction => ForeignKeyAction::NoAction,
        ReferentialAction::Restrict => ForeignKeyAction::Restrict,
        ReferentialAction::Cascade => ForeignKeyAction::Cascade,
        ReferentialAction::SetNull => ForeignKeyAction::SetNull,
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl TableSpec {
    fn table_ref(&self) -> TableRef {
        table_ref(self.schema.as_deref(), &self.name)
    }

    /// `CREATE TABLE IF NOT EXISTS` for this table.
    #[must_use]
    pub fn create_statement(&self, engine: DbEngine) -> TableCreateStatement {
        let inline_pk = match engine {
            DbEngine::Sqlite => self.inline_primary_key().map(|c| c.name.as_str()),
            DbEngine::Postgres => None,
        };

        let mut stmt = Table::create();
        stmt.table(self.table_ref()).if_not_exists();

        for column in &self.columns {
            let mut def = ColumnDef::new(Alias::new(&column.name));
            def.custom(Alias::new(&column.native.name));
            if column.nullable {
                def.null();
            } else {
                def.not_null();
            }
            if inline_pk == Some(column.name.as_str()) {
                // SQLite only honours AUTOINCREMENT on an inline INTEGER PRIMARY KEY.
                def.primary_key().auto_increment();
            }
            if column.unique {
                def.unique_key();
            }
            if let Some(default) = &column.default {
                def.default(Expr::cust(default));
            }
            stmt.col(&mut def);
        }

        if inline_pk.is_none() && !self.primary_key.is_empty() {
            let mut pk = Index::create();
            pk.name(&self.primary_key_name);
            for column in &self.primary_key {
                pk.col(Alias::new(column));
            }
            stmt.primary_key(&mut pk);
        }

        for unique in &self.unique_constraints {
            let mut idx = Index::create();
            idx.name(&unique.name).unique();
            for column in &unique.columns {
                idx.col(Alias::new(column));
            }
            stmt.index(&mut idx);
        }

        for check in &self.checks {
            stmt.check(Expr::cust(&check.expression));
        }

        for fk in &self.foreign_keys {
            let mut def = ForeignKey::create();
            def.name(&fk.name)
                .from(self.table_ref(), Alias::new(&fk.column))
                .to(
                    table_ref(fk.target_schema.as_deref(), &fk.target_table),
                    Alias::new(&fk.target_column),
                )
                .on_delete(fk_action(fk.on_delete));
            stmt.foreign_key(&mut def);
        }

        stmt
    }

    #[must_use]
    pub fn drop_statement(&self) -> TableDropStatement {
        let mut stmt = Table::drop();
        stmt.table(self.table_ref()).if_exists();
        stmt
    }

    /// `COMMENT ON` statements (`PostgreSQL` only).
    fn comment_statements(&self) -> Vec<String> {
        let qualified = match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.name),
            None => format!("\"{}\"", self.name),
        };
        let table = self
            .comment
            .iter()
            .map(|c| format!("COMMENT ON TABLE {qualified} IS {}", quote_literal(c)));
        let columns = self.columns.iter().filter_map(|col| {
            col.comment.as_ref().map(|c| {
                format!(
                    "COMMENT ON COLUMN {qualified}.\"{}\" IS {}",
                    col.name,
                    quote_literal(c)
                )
            })
        });
        table.chain(columns).collect()
    }
}

impl SchemaSpec {
    fn backend(&self) -> DbBackend {
        self.engine.backend()
    }

    /// DDL creating every table in dependency order.
    #[must_use]
    pub fn create_statements(&self) -> Vec<Statement> {
        let backend = self.backend();
        let mut out: Vec<Statement> = self
            .tables
            .iter()
            .map(|t| backend.build(&t.create_statement(self.engine)))
            .collect();
        if self.engine == DbEngine::Postgres {
            out.extend(
                self.tables
                    .iter()
                    .flat_map(TableSpec::comment_statements)
                    .map(|sql| Statement::from_string(backend, sql)),
            );
        }
        out
    }

    /// DDL dropping every table, referrers first.
    #[must_use]
    pub fn drop_statements(&self) -> Vec<Statement> {
        let backend = self.backend();
        self.tables
            .iter()
            .rev()
            .map(|t| backend.build(&t.drop_statement()))
            .collect()
    }
}

async fn run_all(engine: &Engine, spec: &SchemaSpec, statements: Vec<Statement>) -> Result<()> {
    if engine.engine() != spec.engine {
        return Err(DbError::InvalidConfig(format!(
            "schema translated for {} cannot be applied to {}",
            spec.engine,
            engine.engine()
        )));
    }
    let txn = engine.conn().begin().await?;
    for stmt in statements {
        tracing::trace!(sql = %stmt.sql, "ddl");
        txn.execute(stmt).await?;
    }
    txn.commit().await?;
    Ok(())
}

/// Create all tables of `spec` in one transaction.
///
/// # Errors
/// Fails if the engine does not match the `SchemaSpec` engine or any statement fails.
pub async fn create_all(engine: &Engine, spec: &SchemaSpec) -> Result<()> {
    run_all(engine, spec, spec.create_statements()).await?;
    tracing::debug!(tables = spec.tables.len(), "schema created");
    Ok(())
}

/// Drop all tables of `spec`, referrers first.
///
/// # Errors
/// Fails if the engine does not match the `SchemaSpec` engine or any statement fails.
pub async fn drop_all(engine: &Engine, spec: &SchemaSpec) -> Result<()> {
    run_all(engine, spec, spec.drop_statements()).await?;
    tracing::debug!(tables = spec.tables.len(), "schema dropped");
    Ok(())
}

/// Remove all data by dropping and recreating every table.
///
/// # Errors
/// Fails if the engine does not match the `SchemaSpec` engine or any statement fails.
pub async fn clear_database(engine: &Engine, spec: &SchemaSpec) -> Result<()> {
    let mut statements = spec.drop_statements();
    statements.extend(spec.create_statements());
    run_all(engine, spec, statements).await
}
