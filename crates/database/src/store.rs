//! Content store over a caller-supplied connection.

use crate::catalog::{StatementCatalog, StatementKey, StatementSources};
use crate::connection::{OwnedConnection, release_quietly};
use crate::dialect::Dialect;
use crate::error::{DatabaseError, DatabaseResult};
use crate::reader::ContentReader;
use crate::schema::SchemaInitializer;
use binstore_core::record::to_epoch_millis;
use binstore_core::{ContentKey, RecordState, StoreConfig};
use sqlx::any::AnyStatement;
use sqlx::{AnyConnection, Executor, Row, Statement};
use std::borrow::Cow;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest up-front allocation for an incoming payload; bigger payloads grow
/// the buffer as they are read.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

const EXTRACTED_TEXT_COLUMN: &str = "ext_text";

/// Resolved statement text, one per operation.
#[derive(Clone, Debug)]
struct Statements {
    add_content: String,
    get_used_content: String,
    get_unused_content: String,
    /// Optional: sets limited to the core keys leave [`ContentStore::state`]
    /// unavailable but everything else working.
    get_record_state: Option<String>,
    mark_unused: String,
    mark_used: String,
    remove_expired: String,
    get_mime_type: String,
    set_mime_type: String,
    get_extracted_text: String,
    set_extracted_text: String,
    get_binary_keys: String,
}

impl Statements {
    fn resolve(catalog: &StatementCatalog) -> DatabaseResult<Self> {
        Ok(Self {
            add_content: catalog.statement(StatementKey::AddContent)?,
            get_used_content: catalog.statement(StatementKey::GetUsedContent)?,
            get_unused_content: catalog.statement(StatementKey::GetUnusedContent)?,
            get_record_state: catalog
                .template(StatementKey::GetRecordState.as_str())
                .map(|_| catalog.statement(StatementKey::GetRecordState))
                .transpose()?,
            mark_unused: catalog.statement(StatementKey::MarkUnused)?,
            mark_used: catalog.statement(StatementKey::MarkUsed)?,
            remove_expired: catalog.statement(StatementKey::RemoveExpired)?,
            get_mime_type: catalog.statement(StatementKey::GetMimeType)?,
            set_mime_type: catalog.statement(StatementKey::SetMimeType)?,
            get_extracted_text: catalog.statement(StatementKey::GetExtractedText)?,
            set_extracted_text: catalog.statement(StatementKey::SetExtractedText)?,
            get_binary_keys: catalog.statement(StatementKey::GetBinaryKeys)?,
        })
    }
}

/// Content-addressed binary store backed by one database table.
///
/// The store holds no connection. Each call uses the connection it is given
/// and issues no transaction control; wrap calls in a transaction on the
/// caller side when atomicity across calls matters.
#[derive(Clone, Debug)]
pub struct ContentStore {
    catalog: StatementCatalog,
    statements: Statements,
    text_capacity: usize,
}

impl ContentStore {
    /// Load statements, ensure the table exists and probe column limits.
    ///
    /// Statements come from `config.statements_dir` when set, otherwise from
    /// the built-in sets.
    pub async fn open(conn: &mut AnyConnection, config: &StoreConfig) -> DatabaseResult<Self> {
        let sources = match &config.statements_dir {
            Some(dir) => StatementSources::from_dir(dir)?,
            None => StatementSources::builtin(),
        };
        Self::open_with_sources(conn, config, &sources).await
    }

    /// Like [`ContentStore::open`] with explicitly supplied statement sources.
    pub async fn open_with_sources(
        conn: &mut AnyConnection,
        config: &StoreConfig,
        sources: &StatementSources,
    ) -> DatabaseResult<Self> {
        config.validate()?;

        let dialect = match config.dialect.as_deref() {
            Some(name) => Dialect::new(name),
            None => Dialect::detect(conn),
        };
        tracing::debug!(dialect = %dialect, backend = conn.backend_name(), "discovered dialect for binary store");

        let catalog = StatementCatalog::load(sources, &dialect, config.table_name())?;
        let statements = Statements::resolve(&catalog)?;
        if statements.get_record_state.is_none() {
            tracing::debug!(
                dialect = %dialect,
                key = StatementKey::GetRecordState.as_str(),
                "no record state statement; state lookups are disabled"
            );
        }

        let schema = SchemaInitializer::new(&catalog, config.probe_strictness);
        schema.ensure_table(conn).await?;
        let text_capacity = schema
            .probe_text_capacity(conn, config.default_text_capacity)
            .await;
        tracing::debug!(text_capacity, "using max length for extracted text");

        Ok(Self {
            catalog,
            statements,
            text_capacity,
        })
    }

    pub fn table_name(&self) -> &str {
        self.catalog.table_name()
    }

    pub fn dialect(&self) -> &Dialect {
        self.catalog.dialect()
    }

    pub fn catalog(&self) -> &StatementCatalog {
        &self.catalog
    }

    /// Maximum stored length of extracted text, in characters.
    pub fn text_capacity(&self) -> usize {
        self.text_capacity
    }

    /// Store `size` bytes read from `payload` as an active record.
    ///
    /// The payload reader is consumed and dropped whether or not the insert
    /// succeeds.
    #[tracing::instrument(skip_all, fields(key = %key, size = size))]
    pub async fn insert<R>(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
        payload: R,
        size: u64,
    ) -> DatabaseResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let data = read_payload(key, payload, size).await?;
        self.insert_bytes(conn, key, data).await
    }

    /// Store a payload under its computed key, reusing an existing record.
    ///
    /// An active record is left untouched and an unused one is restored, so
    /// identical payloads are stored once.
    #[tracing::instrument(skip_all)]
    pub async fn put<R>(&self, conn: &mut AnyConnection, mut payload: R) -> DatabaseResult<ContentKey>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut data = Vec::new();
        let read = payload.read_to_end(&mut data).await;
        drop(payload);
        read?;

        let key = ContentKey::compute(&data);
        if self
            .row_exists(conn, &self.statements.get_used_content, &key)
            .await?
        {
            tracing::debug!(key = %key, "content already stored");
        } else if self
            .row_exists(conn, &self.statements.get_unused_content, &key)
            .await?
        {
            tracing::debug!(key = %key, "reviving unused content");
            self.restore(conn, std::slice::from_ref(&key)).await?;
        } else {
            self.insert_bytes(conn, &key, data).await?;
        }
        Ok(key)
    }

    async fn insert_bytes(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
        data: Vec<u8>,
    ) -> DatabaseResult<()> {
        let now = to_epoch_millis(OffsetDateTime::now_utc());
        tracing::trace!(statement = %self.statements.add_content, "executing update statement");
        sqlx::query(&self.statements.add_content)
            .bind(key.as_str())
            .bind(now)
            .bind(data)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Whether the key exists as active (`active_only`) or as unused content.
    ///
    /// Best effort: query failures report `false`.
    pub async fn exists(&self, conn: &mut AnyConnection, key: &ContentKey, active_only: bool) -> bool {
        let sql = if active_only {
            &self.statements.get_used_content
        } else {
            &self.statements.get_unused_content
        };
        match self.row_exists(conn, sql, key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "cannot determine if content exists");
                false
            }
        }
    }

    async fn row_exists(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        key: &ContentKey,
    ) -> DatabaseResult<bool> {
        tracing::trace!(statement = %sql, "executing query statement");
        let row = sqlx::query(sql)
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Open a stream over the payload stored under `key`, active content
    /// first, then unused content.
    ///
    /// On success the returned reader owns `conn`. When nothing is found, or
    /// the lookup fails, `conn` is released before returning.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn read<C: OwnedConnection>(
        &self,
        mut conn: C,
        key: &ContentKey,
    ) -> DatabaseResult<Option<ContentReader<C>>> {
        match self.find_payload(conn.connection(), key).await {
            Ok(Some((statement, payload))) => {
                Ok(Some(ContentReader::new(key.clone(), payload, statement, conn)))
            }
            Ok(None) => {
                tracing::trace!("content not found");
                release_quietly(conn).await;
                Ok(None)
            }
            Err(e) => {
                release_quietly(conn).await;
                Err(e)
            }
        }
    }

    async fn find_payload(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
    ) -> DatabaseResult<Option<(AnyStatement<'static>, Option<Vec<u8>>)>> {
        for sql in [
            &self.statements.get_used_content,
            &self.statements.get_unused_content,
        ] {
            tracing::trace!(statement = %sql, "preparing statement");
            let prepared = (&mut *conn).prepare(sql).await?;
            let statement = Statement::to_owned(&prepared);
            drop(prepared);

            // `statement` is dropped (released) on every early exit below.
            let row = statement
                .query()
                .bind(key.as_str())
                .fetch_optional(&mut *conn)
                .await?;
            if let Some(row) = row {
                let payload: Option<Vec<u8>> = row.try_get(0)?;
                return Ok(Some((statement, payload)));
            }
        }
        Ok(None)
    }

    /// Mark active records unused as of `timestamp`.
    ///
    /// One prepared statement serves the whole batch, but every key is a
    /// separate execution: a failure part way through leaves the earlier keys
    /// marked. Returns the number of records that changed state.
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    pub async fn mark_unused(
        &self,
        conn: &mut AnyConnection,
        keys: &[ContentKey],
        timestamp: OffsetDateTime,
    ) -> DatabaseResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let at = to_epoch_millis(timestamp);
        let statement = (&mut *conn).prepare(&self.statements.mark_unused).await?;
        let mut changed = 0;
        for key in keys {
            tracing::trace!(key = %key, "executing update statement");
            changed += statement
                .query()
                .bind(at)
                .bind(key.as_str())
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(changed)
    }

    /// Return unused records to the active state. Same batch semantics as
    /// [`ContentStore::mark_unused`].
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    pub async fn restore(&self, conn: &mut AnyConnection, keys: &[ContentKey]) -> DatabaseResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let statement = (&mut *conn).prepare(&self.statements.mark_used).await?;
        let mut changed = 0;
        for key in keys {
            tracing::trace!(key = %key, "executing update statement");
            changed += statement
                .query()
                .bind(key.as_str())
                .execute(&mut *conn)
                .await?
                .rows_affected();
        }
        Ok(changed)
    }

    /// Physically delete unused records marked strictly before `deadline`.
    ///
    /// Returns the number of deleted records.
    #[tracing::instrument(skip_all, fields(deadline = %deadline))]
    pub async fn remove_expired(
        &self,
        conn: &mut AnyConnection,
        deadline: OffsetDateTime,
    ) -> DatabaseResult<u64> {
        tracing::trace!(statement = %self.statements.remove_expired, "executing update statement");
        let removed = sqlx::query(&self.statements.remove_expired)
            .bind(to_epoch_millis(deadline))
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if removed > 0 {
            tracing::info!(removed, table = self.table_name(), "removed expired content");
        }
        Ok(removed)
    }

    /// Current lifecycle state of `key`.
    ///
    /// Needs the `get_record_state` statement; without it this returns
    /// [`DatabaseError::Configuration`].
    pub async fn state(&self, conn: &mut AnyConnection, key: &ContentKey) -> DatabaseResult<RecordState> {
        let sql = self.statements.get_record_state.as_deref().ok_or_else(|| {
            DatabaseError::Configuration(format!(
                "no statement '{}' for dialect {}",
                StatementKey::GetRecordState,
                self.dialect()
            ))
        })?;
        tracing::trace!(statement = %sql, "executing query statement");
        let row = sqlx::query(sql)
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        let columns = match row {
            Some(row) => Some((row.try_get::<i64, _>(0)?, row.try_get::<Option<i64>, _>(1)?)),
            None => None,
        };
        Ok(RecordState::from_columns(columns)?)
    }

    pub async fn get_mime_type(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
    ) -> DatabaseResult<Option<String>> {
        self.fetch_text(conn, &self.statements.get_mime_type, key).await
    }

    pub async fn set_mime_type(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
        mime_type: Option<&str>,
    ) -> DatabaseResult<()> {
        self.update_text(conn, &self.statements.set_mime_type, key, mime_type)
            .await
    }

    pub async fn get_extracted_text(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
    ) -> DatabaseResult<Option<String>> {
        self.fetch_text(conn, &self.statements.get_extracted_text, key)
            .await
    }

    /// Store extracted text, truncated to [`ContentStore::text_capacity`]
    /// characters when longer.
    pub async fn set_extracted_text(
        &self,
        conn: &mut AnyConnection,
        key: &ContentKey,
        text: &str,
    ) -> DatabaseResult<()> {
        let text = truncate_chars(text, self.text_capacity);
        if let Cow::Owned(_) = text {
            tracing::warn!(
                key = %key,
                column = EXTRACTED_TEXT_COLUMN,
                capacity = self.text_capacity,
                table = self.table_name(),
                "extracted text exceeds column capacity; truncating"
            );
        }
        self.update_text(conn, &self.statements.set_extracted_text, key, Some(&*text))
            .await
    }

    /// Keys of every active record. Unbounded; meant for maintenance tasks.
    pub async fn list_keys(&self, conn: &mut AnyConnection) -> DatabaseResult<Vec<ContentKey>> {
        tracing::trace!(statement = %self.statements.get_binary_keys, "executing query statement");
        let rows = sqlx::query(&self.statements.get_binary_keys)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| -> DatabaseResult<ContentKey> {
                let key: String = row.try_get(0)?;
                Ok(ContentKey::new(key)?)
            })
            .collect()
    }

    async fn fetch_text(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        key: &ContentKey,
    ) -> DatabaseResult<Option<String>> {
        tracing::trace!(statement = %sql, "executing query statement");
        let row = sqlx::query(sql)
            .bind(key.as_str())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>(0)?),
            None => Ok(None),
        }
    }

    async fn update_text(
        &self,
        conn: &mut AnyConnection,
        sql: &str,
        key: &ContentKey,
        value: Option<&str>,
    ) -> DatabaseResult<()> {
        tracing::trace!(statement = %sql, "executing update statement");
        sqlx::query(sql)
            .bind(value)
            .bind(key.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Read exactly `size` bytes from `payload`, dropping the reader afterwards.
async fn read_payload<R>(key: &ContentKey, mut payload: R, size: u64) -> DatabaseResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let capacity = usize::try_from(size.min(MAX_PREALLOCATION)).unwrap_or(0);
    let mut data = Vec::with_capacity(capacity);
    let read = (&mut payload).take(size).read_to_end(&mut data).await;
    drop(payload);

    let actual = read? as u64;
    if actual < size {
        return Err(DatabaseError::PayloadTruncated {
            key: key.to_string(),
            expected: size,
            actual,
        });
    }
    Ok(data)
}

/// First `capacity` characters of `text`, borrowed when nothing is cut.
fn truncate_chars(text: &str, capacity: usize) -> Cow<'_, str> {
    match text.char_indices().nth(capacity) {
        Some((end, _)) => Cow::Owned(text[..end].to_string()),
        None => Cow::Borrowed(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("hello", 10), Cow::Borrowed("hello"));
        assert_eq!(truncate_chars("hello", 5), Cow::Borrowed("hello"));
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("żółw!", 3), "żół");
        assert!(matches!(truncate_chars("abc", 2), Cow::Owned(_)));
    }

    #[tokio::test]
    async fn test_read_payload_exact_size() {
        let key = ContentKey::compute(b"abcdef");
        let data = read_payload(&key, &b"abcdef"[..], 4).await.unwrap();
        assert_eq!(data, b"abcd");
    }

    #[tokio::test]
    async fn test_read_payload_short_stream() {
        let key = ContentKey::compute(b"abc");
        let err = read_payload(&key, &b"abc"[..], 10).await.unwrap_err();
        match err {
            DatabaseError::PayloadTruncated {
                expected, actual, ..
            } => {
                assert_eq!(expected, 10);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
