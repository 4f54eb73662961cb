//! Content table setup.

use crate::catalog::{StatementCatalog, StatementKey};
use crate::error::{DatabaseError, DatabaseResult};
use binstore_core::ProbeStrictness;
use sqlx::{AnyConnection, Row};

/// Outcome of [`SchemaInitializer::ensure_table`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableStatus {
    /// The existence probe succeeded.
    Existing,
    /// The probe failed and the table was created.
    Created,
}

/// Ensures the content table exists and discovers its column limits.
pub struct SchemaInitializer<'a> {
    catalog: &'a StatementCatalog,
    strictness: ProbeStrictness,
}

impl<'a> SchemaInitializer<'a> {
    pub fn new(catalog: &'a StatementCatalog, strictness: ProbeStrictness) -> Self {
        Self {
            catalog,
            strictness,
        }
    }

    /// Probe for the table and create it when the probe says it is absent.
    ///
    /// Creation failures are fatal and reported as
    /// [`DatabaseError::StorageInitialization`].
    pub async fn ensure_table(&self, conn: &mut AnyConnection) -> DatabaseResult<TableStatus> {
        let table = self.catalog.table_name();
        let probe = self.catalog.statement(StatementKey::TableExistsQuery)?;
        tracing::trace!(statement = %probe, "probing for content table");

        let err = match sqlx::query(&probe).fetch_optional(&mut *conn).await {
            Ok(_) => return Ok(TableStatus::Existing),
            Err(err) => err,
        };

        if self.strictness == ProbeStrictness::MissingTableOnly && !is_missing_table_error(&err) {
            return Err(err.into());
        }

        tracing::debug!(
            table,
            dialect = %self.catalog.dialect(),
            error = %err,
            "unable to find existing table; attempting to create it"
        );
        let create = self.catalog.statement(StatementKey::CreateTable)?;
        tracing::trace!(statement = %create, "creating content table");
        sqlx::query(&create)
            .execute(&mut *conn)
            .await
            .map_err(|source| DatabaseError::StorageInitialization {
                table: table.to_string(),
                source,
            })?;

        tracing::info!(table, "created content table");
        Ok(TableStatus::Created)
    }

    /// Maximum length of the extracted-text column, or `default` when the
    /// database cannot report it.
    pub async fn probe_text_capacity(&self, conn: &mut AnyConnection, default: usize) -> usize {
        match self.query_text_capacity(conn).await {
            Ok(Some(capacity)) => capacity,
            Ok(None) => {
                tracing::debug!(
                    table = self.catalog.table_name(),
                    default,
                    "extracted text column size not reported; using default"
                );
                default
            }
            Err(e) => {
                tracing::debug!(
                    table = self.catalog.table_name(),
                    default,
                    error = %e,
                    "cannot determine extracted text column size; using default"
                );
                default
            }
        }
    }

    async fn query_text_capacity(&self, conn: &mut AnyConnection) -> DatabaseResult<Option<usize>> {
        let sql = self.catalog.statement(StatementKey::ExtractedTextCapacity)?;
        tracing::trace!(statement = %sql, "probing extracted text capacity");
        let Some(row) = sqlx::query(&sql).fetch_optional(&mut *conn).await? else {
            return Ok(None);
        };

        if let Ok(size) = row.try_get::<Option<i64>, _>(0) {
            return Ok(size.and_then(|n| usize::try_from(n).ok()).filter(|n| *n > 0));
        }
        let declared: Option<String> = row.try_get(0)?;
        Ok(declared.as_deref().and_then(parse_declared_length))
    }
}

/// Extract the length from a declared column type such as `VARCHAR(1000)`.
pub fn parse_declared_length(declared: &str) -> Option<usize> {
    let declared = declared.trim();
    if let Ok(n) = declared.parse::<usize>() {
        return (n > 0).then_some(n);
    }
    let open = declared.find('(')?;
    let close = open + declared[open..].find(')')?;
    declared[open + 1..close]
        .split(',')
        .next()?
        .trim()
        .parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
}

/// Whether a query failed because its table does not exist.
pub fn is_missing_table_error(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    // 42P01: PostgreSQL undefined_table. 42S02: ODBC/MySQL base table not found.
    if matches!(db.code().as_deref(), Some("42P01" | "42S02" | "1146")) {
        return true;
    }
    let message = db.message().to_ascii_lowercase();
    message.contains("no such table")
        || message.contains("doesn't exist")
        || message.contains("does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declared_length() {
        assert_eq!(parse_declared_length("VARCHAR(1000)"), Some(1000));
        assert_eq!(parse_declared_length(" varchar ( 42 ) "), Some(42));
        assert_eq!(parse_declared_length("DECIMAL(10,2)"), Some(10));
        assert_eq!(parse_declared_length("250"), Some(250));
        assert_eq!(parse_declared_length("TEXT"), None);
        assert_eq!(parse_declared_length("VARCHAR(0)"), None);
        assert_eq!(parse_declared_length("VARCHAR(abc)"), None);
    }

    #[test]
    fn test_non_database_errors_are_not_missing_table() {
        assert!(!is_missing_table_error(&sqlx::Error::RowNotFound));
        assert!(!is_missing_table_error(&sqlx::Error::PoolTimedOut));
    }
}
