//! Transaction support for SQLite backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use crate::codec::ResourceEncoding;
use crate::core::{Transaction, TransactionProvider};
use crate::error::{BackendError, StorageError, StorageResult, TransactionError};
use crate::identity::StagedIdentity;
use crate::partition::{PartitionFilter, RequestContext};
use crate::tags::{TagDefinition, TagKey, TagType};
use crate::types::{HistoryEntry, IndexStatus, ResourceLookup, ResourceRecord};

use super::SqliteBackend;

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| internal_error(format!("Failed to parse timestamp '{}': {}", value, e)))
}

fn encode_inline_tags(tags: &[TagDefinition]) -> StorageResult<Option<String>> {
    if tags.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(tags)
        .map(Some)
        .map_err(|e| serialization_error(format!("Failed to serialize inline tags: {}", e)))
}

fn decode_inline_tags(value: Option<String>) -> StorageResult<Vec<TagDefinition>> {
    match value {
        Some(json) if !json.is_empty() => serde_json::from_str(&json)
            .map_err(|e| serialization_error(format!("Failed to deserialize inline tags: {}", e))),
        _ => Ok(Vec::new()),
    }
}

fn index_status_code(status: IndexStatus) -> Option<i64> {
    match status {
        IndexStatus::Indexed => Some(1),
        IndexStatus::Pending => None,
    }
}

/// Appends a partition predicate on `column` to `sql`, pushing its parameters.
fn push_partition_clause(
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    column: &str,
    filter: &PartitionFilter,
) {
    match filter {
        PartitionFilter::Any => {}
        PartitionFilter::NullOnly => {
            sql.push_str(&format!(" AND {} IS NULL", column));
        }
        PartitionFilter::In { ids, include_null } => {
            let mut alternatives = Vec::new();
            if !ids.is_empty() {
                alternatives.push(format!("{} IN ({})", column, placeholders(ids.len())));
                params.extend(ids.iter().map(|id| SqlValue::Integer(*id as i64)));
            }
            if *include_null {
                alternatives.push(format!("{} IS NULL", column));
            }
            if alternatives.is_empty() {
                alternatives.push("0".to_string());
            }
            sql.push_str(&format!(" AND ({})", alternatives.join(" OR ")));
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

const IDENTITY_COLUMNS: &str =
    "i.surrogate_id, i.resource_type, i.external_id, i.partition_id, r.deleted_at";

const RECORD_COLUMNS: &str = "surrogate_id, resource_type, partition_id, version, content_hash, \
     encoding, index_status, deleted_at, updated_at, published_at, has_tags, inline_tags";

const HISTORY_COLUMNS: &str = "id, surrogate_id, resource_type, partition_id, version, encoding, \
     text, bytes, source_uri, request_id, updated_at, inline_tags";

const TAG_COLUMNS: &str = "d.id, d.tag_type, d.system, d.code, d.display, d.version, d.user_selected";

/// Raw identity columns.
struct IdentityRow {
    surrogate_id: i64,
    resource_type: String,
    external_id: Option<String>,
    partition_id: Option<i32>,
    deleted_at: Option<String>,
}

impl IdentityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            surrogate_id: row.get(0)?,
            resource_type: row.get(1)?,
            external_id: row.get(2)?,
            partition_id: row.get(3)?,
            deleted_at: row.get(4)?,
        })
    }

    fn into_lookup(self) -> StorageResult<ResourceLookup> {
        Ok(ResourceLookup {
            surrogate_id: self.surrogate_id,
            resource_type: self.resource_type,
            external_id: self.external_id,
            partition_id: self.partition_id,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// Raw current record columns.
struct RecordRow {
    surrogate_id: i64,
    resource_type: String,
    partition_id: Option<i32>,
    version: i64,
    content_hash: Option<String>,
    encoding: String,
    index_status: Option<i64>,
    deleted_at: Option<String>,
    updated_at: String,
    published_at: String,
    has_tags: bool,
    inline_tags: Option<String>,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            surrogate_id: row.get(0)?,
            resource_type: row.get(1)?,
            partition_id: row.get(2)?,
            version: row.get(3)?,
            content_hash: row.get(4)?,
            encoding: row.get(5)?,
            index_status: row.get(6)?,
            deleted_at: row.get(7)?,
            updated_at: row.get(8)?,
            published_at: row.get(9)?,
            has_tags: row.get(10)?,
            inline_tags: row.get(11)?,
        })
    }

    fn into_record(self) -> StorageResult<ResourceRecord> {
        Ok(ResourceRecord {
            surrogate_id: self.surrogate_id,
            resource_type: self.resource_type,
            partition_id: self.partition_id,
            version: self.version,
            content_hash: self.content_hash,
            encoding: self.encoding.parse()?,
            index_status: match self.index_status {
                Some(_) => IndexStatus::Indexed,
                None => IndexStatus::Pending,
            },
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
            updated_at: parse_timestamp(&self.updated_at)?,
            published_at: parse_timestamp(&self.published_at)?,
            has_tags: self.has_tags,
            inline_tags: decode_inline_tags(self.inline_tags)?,
        })
    }
}

/// Raw history columns.
struct HistoryRow {
    id: i64,
    surrogate_id: i64,
    resource_type: String,
    partition_id: Option<i32>,
    version: i64,
    encoding: String,
    text: Option<String>,
    bytes: Option<Vec<u8>>,
    source_uri: Option<String>,
    request_id: Option<String>,
    updated_at: String,
    inline_tags: Option<String>,
}

impl HistoryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            surrogate_id: row.get(1)?,
            resource_type: row.get(2)?,
            partition_id: row.get(3)?,
            version: row.get(4)?,
            encoding: row.get(5)?,
            text: row.get(6)?,
            bytes: row.get(7)?,
            source_uri: row.get(8)?,
            request_id: row.get(9)?,
            updated_at: row.get(10)?,
            inline_tags: row.get(11)?,
        })
    }

    fn into_entry(self) -> StorageResult<HistoryEntry> {
        let encoding: ResourceEncoding = self.encoding.parse()?;
        Ok(HistoryEntry {
            id: self.id,
            surrogate_id: self.surrogate_id,
            resource_type: self.resource_type,
            partition_id: self.partition_id,
            version: self.version,
            encoding,
            text: self.text,
            bytes: self.bytes,
            source_uri: self.source_uri,
            request_id: self.request_id,
            updated_at: parse_timestamp(&self.updated_at)?,
            inline_tags: decode_inline_tags(self.inline_tags)?,
        })
    }
}

/// Raw tag definition columns.
struct TagRow {
    id: i64,
    tag_type: i64,
    system: Option<String>,
    code: Option<String>,
    display: Option<String>,
    version: Option<String>,
    user_selected: Option<bool>,
}

impl TagRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tag_type: row.get(1)?,
            system: row.get(2)?,
            code: row.get(3)?,
            display: row.get(4)?,
            version: row.get(5)?,
            user_selected: row.get(6)?,
        })
    }

    fn into_definition(self) -> StorageResult<TagDefinition> {
        let tag_type = TagType::from_code(self.tag_type)
            .ok_or_else(|| internal_error(format!("Unknown tag type code: {}", self.tag_type)))?;
        Ok(TagDefinition {
            id: Some(self.id),
            tag_type,
            system: self.system,
            code: self.code,
            display: self.display,
            version: self.version,
            user_selected: self.user_selected,
        })
    }
}

/// A SQLite transaction.
///
/// Started with `BEGIN IMMEDIATE`, so the write lock is taken up front and
/// concurrent writers wait (up to the busy timeout) instead of failing late.
pub struct SqliteTransaction {
    /// The connection used for this transaction.
    conn: Mutex<PooledConnection<SqliteConnectionManager>>,
    /// Whether the transaction is still active.
    active: bool,
    /// The request context this transaction runs for.
    context: RequestContext,
    /// Identity cache entries published after commit.
    staged: Vec<StagedIdentity>,
}

impl std::fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("active", &self.active)
            .field("context", &self.context)
            .field("staged", &self.staged.len())
            .finish()
    }
}

impl SqliteTransaction {
    /// Create a new transaction.
    fn new(
        conn: PooledConnection<SqliteConnectionManager>,
        context: RequestContext,
    ) -> StorageResult<Self> {
        conn.execute("BEGIN IMMEDIATE", []).map_err(|e| {
            StorageError::Transaction(TransactionError::RolledBack {
                reason: format!("Failed to begin transaction: {}", e),
            })
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            active: true,
            context,
            staged: Vec::new(),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, PooledConnection<SqliteConnectionManager>>> {
        if !self.active {
            return Err(StorageError::Transaction(
                TransactionError::InvalidTransaction,
            ));
        }
        Ok(self.conn.lock())
    }

    fn query_identities(&self, sql: &str, params: Vec<SqlValue>) -> StorageResult<Vec<ResourceLookup>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| internal_error(format!("Failed to prepare identity query: {}", e)))?;
        let rows = stmt
            .query_map(params_from_iter(params), IdentityRow::read)
            .map_err(|e| internal_error(format!("Failed to query identities: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| internal_error(format!("Failed to read identity row: {}", e)))?;
        rows.into_iter().map(IdentityRow::into_lookup).collect()
    }

    fn query_tags(&self, sql: &str, key: i64) -> StorageResult<Vec<TagDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| internal_error(format!("Failed to prepare tag query: {}", e)))?;
        let rows = stmt
            .query_map(params![key], TagRow::read)
            .map_err(|e| internal_error(format!("Failed to query tags: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| internal_error(format!("Failed to read tag row: {}", e)))?;
        rows.into_iter().map(TagRow::into_definition).collect()
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn insert_identity(
        &mut self,
        partition_id: Option<i32>,
        resource_type: &str,
        external_id: Option<&str>,
    ) -> StorageResult<i64> {
        let conn = self.conn()?;
        // Unique violations must surface as such for the caller's retry logic
        conn.execute(
            "INSERT INTO resource_identity (partition_id, resource_type, external_id)
             VALUES (?1, ?2, ?3)",
            params![partition_id, resource_type, external_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn assign_external_id(
        &mut self,
        surrogate_id: i64,
        external_id: &str,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE resource_identity SET external_id = ?1 WHERE surrogate_id = ?2",
            params![external_id, surrogate_id],
        )?;
        Ok(())
    }

    async fn find_identities(
        &mut self,
        filter: &PartitionFilter,
        resource_type: &str,
        external_ids: &[String],
    ) -> StorageResult<Vec<ResourceLookup>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {} FROM resource_identity i
             LEFT JOIN resources r ON r.surrogate_id = i.surrogate_id
             WHERE i.resource_type = ? AND i.external_id IN ({})",
            IDENTITY_COLUMNS,
            placeholders(external_ids.len())
        );
        let mut params = vec![SqlValue::Text(resource_type.to_string())];
        params.extend(external_ids.iter().map(|id| SqlValue::Text(id.clone())));
        push_partition_clause(&mut sql, &mut params, "i.partition_id", filter);

        self.query_identities(&sql, params)
    }

    async fn find_identities_by_surrogate(
        &mut self,
        surrogate_ids: &[i64],
    ) -> StorageResult<Vec<ResourceLookup>> {
        if surrogate_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM resource_identity i
             LEFT JOIN resources r ON r.surrogate_id = i.surrogate_id
             WHERE i.surrogate_id IN ({})",
            IDENTITY_COLUMNS,
            placeholders(surrogate_ids.len())
        );
        let params = surrogate_ids.iter().map(|id| SqlValue::Integer(*id)).collect();
        self.query_identities(&sql, params)
    }

    fn stage_identity(&mut self, entry: StagedIdentity) {
        self.staged.push(entry);
    }

    fn take_staged_identities(&mut self) -> Vec<StagedIdentity> {
        std::mem::take(&mut self.staged)
    }

    async fn read_record(&mut self, surrogate_id: i64) -> StorageResult<Option<ResourceRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE surrogate_id = ?1", RECORD_COLUMNS),
                params![surrogate_id],
                RecordRow::read,
            )
            .optional()
            .map_err(|e| internal_error(format!("Failed to read resource: {}", e)))?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn insert_record(&mut self, record: &ResourceRecord) -> StorageResult<()> {
        let inline_tags = encode_inline_tags(&record.inline_tags)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO resources ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                RECORD_COLUMNS
            ),
            params![
                record.surrogate_id,
                record.resource_type,
                record.partition_id,
                record.version,
                record.content_hash,
                record.encoding.as_str(),
                index_status_code(record.index_status),
                record.deleted_at.map(|d| d.to_rfc3339()),
                record.updated_at.to_rfc3339(),
                record.published_at.to_rfc3339(),
                record.has_tags,
                inline_tags,
            ],
        )
        .map_err(|e| internal_error(format!("Failed to insert resource: {}", e)))?;
        Ok(())
    }

    async fn update_record(
        &mut self,
        record: &ResourceRecord,
        expected_version: i64,
    ) -> StorageResult<bool> {
        let inline_tags = encode_inline_tags(&record.inline_tags)?;
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE resources SET version = ?1, content_hash = ?2, encoding = ?3,
                    index_status = ?4, deleted_at = ?5, updated_at = ?6, has_tags = ?7,
                    inline_tags = ?8
                 WHERE surrogate_id = ?9 AND version = ?10",
                params![
                    record.version,
                    record.content_hash,
                    record.encoding.as_str(),
                    index_status_code(record.index_status),
                    record.deleted_at.map(|d| d.to_rfc3339()),
                    record.updated_at.to_rfc3339(),
                    record.has_tags,
                    inline_tags,
                    record.surrogate_id,
                    expected_version,
                ],
            )
            .map_err(|e| internal_error(format!("Failed to update resource: {}", e)))?;
        Ok(updated == 1)
    }

    async fn read_history(
        &mut self,
        surrogate_id: i64,
        version: i64,
    ) -> StorageResult<Option<HistoryEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM resource_history WHERE surrogate_id = ?1 AND version = ?2",
                    HISTORY_COLUMNS
                ),
                params![surrogate_id, version],
                HistoryRow::read,
            )
            .optional()
            .map_err(|e| internal_error(format!("Failed to read history: {}", e)))?;
        row.map(HistoryRow::into_entry).transpose()
    }

    async fn list_history(&mut self, surrogate_id: i64) -> StorageResult<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM resource_history WHERE surrogate_id = ?1 ORDER BY version DESC",
                HISTORY_COLUMNS
            ))
            .map_err(|e| internal_error(format!("Failed to prepare history query: {}", e)))?;
        let rows = stmt
            .query_map(params![surrogate_id], HistoryRow::read)
            .map_err(|e| internal_error(format!("Failed to query history: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| internal_error(format!("Failed to read history row: {}", e)))?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    async fn insert_history(&mut self, entry: &HistoryEntry) -> StorageResult<i64> {
        let inline_tags = encode_inline_tags(&entry.inline_tags)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resource_history (surrogate_id, resource_type, partition_id, version,
                encoding, text, bytes, source_uri, request_id, updated_at, inline_tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.surrogate_id,
                entry.resource_type,
                entry.partition_id,
                entry.version,
                entry.encoding.as_str(),
                entry.text,
                entry.bytes,
                entry.source_uri,
                entry.request_id,
                entry.updated_at.to_rfc3339(),
                inline_tags,
            ],
        )
        .map_err(|e| internal_error(format!("Failed to insert history: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_history(&mut self, entry: &HistoryEntry) -> StorageResult<()> {
        let inline_tags = encode_inline_tags(&entry.inline_tags)?;
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE resource_history SET version = ?1, encoding = ?2, text = ?3, bytes = ?4,
                    source_uri = ?5, request_id = ?6, updated_at = ?7, inline_tags = ?8
                 WHERE id = ?9",
                params![
                    entry.version,
                    entry.encoding.as_str(),
                    entry.text,
                    entry.bytes,
                    entry.source_uri,
                    entry.request_id,
                    entry.updated_at.to_rfc3339(),
                    inline_tags,
                    entry.id,
                ],
            )
            .map_err(|e| internal_error(format!("Failed to update history: {}", e)))?;
        if updated == 0 {
            return Err(internal_error(format!(
                "History row {} does not exist",
                entry.id
            )));
        }
        Ok(())
    }

    async fn find_tag_definition(&mut self, key: &TagKey) -> StorageResult<Option<TagDefinition>> {
        let conn = self.conn()?;
        // IS compares NULLs as equal
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tag_definitions d
                     WHERE d.tag_type = ?1 AND d.system IS ?2 AND d.code IS ?3
                       AND d.version IS ?4 AND d.user_selected IS ?5",
                    TAG_COLUMNS
                ),
                params![
                    key.tag_type.code(),
                    key.system,
                    key.code,
                    key.version,
                    key.user_selected,
                ],
                TagRow::read,
            )
            .optional()
            .map_err(|e| internal_error(format!("Failed to read tag definition: {}", e)))?;
        row.map(TagRow::into_definition).transpose()
    }

    async fn insert_tag_definition(&mut self, tag: &TagDefinition) -> StorageResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tag_definitions (tag_type, system, code, display, version, user_selected)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tag.tag_type.code(),
                tag.system,
                tag.code,
                tag.display,
                tag.version,
                tag.user_selected,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn resource_tags(&mut self, surrogate_id: i64) -> StorageResult<Vec<TagDefinition>> {
        self.query_tags(
            &format!(
                "SELECT {} FROM resource_tags t
                 JOIN tag_definitions d ON d.id = t.tag_id
                 WHERE t.surrogate_id = ?1 ORDER BY d.id",
                TAG_COLUMNS
            ),
            surrogate_id,
        )
    }

    async fn replace_resource_tags(
        &mut self,
        surrogate_id: i64,
        tag_ids: &[i64],
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM resource_tags WHERE surrogate_id = ?1",
            params![surrogate_id],
        )
        .map_err(|e| internal_error(format!("Failed to clear resource tags: {}", e)))?;
        for tag_id in tag_ids {
            conn.execute(
                "INSERT OR IGNORE INTO resource_tags (surrogate_id, tag_id) VALUES (?1, ?2)",
                params![surrogate_id, tag_id],
            )
            .map_err(|e| internal_error(format!("Failed to link resource tag: {}", e)))?;
        }
        Ok(())
    }

    async fn history_tags(&mut self, history_id: i64) -> StorageResult<Vec<TagDefinition>> {
        self.query_tags(
            &format!(
                "SELECT {} FROM history_tags t
                 JOIN tag_definitions d ON d.id = t.tag_id
                 WHERE t.history_id = ?1 ORDER BY d.id",
                TAG_COLUMNS
            ),
            history_id,
        )
    }

    async fn replace_history_tags(
        &mut self,
        history_id: i64,
        surrogate_id: i64,
        tag_ids: &[i64],
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM history_tags WHERE history_id = ?1",
            params![history_id],
        )
        .map_err(|e| internal_error(format!("Failed to clear history tags: {}", e)))?;
        for tag_id in tag_ids {
            conn.execute(
                "INSERT OR IGNORE INTO history_tags (history_id, surrogate_id, tag_id)
                 VALUES (?1, ?2, ?3)",
                params![history_id, surrogate_id, tag_id],
            )
            .map_err(|e| internal_error(format!("Failed to link history tag: {}", e)))?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        {
            let conn = self.conn()?;
            conn.execute("COMMIT", []).map_err(|e| {
                StorageError::Transaction(TransactionError::RolledBack {
                    reason: format!("Commit failed: {}", e),
                })
            })?;
        }
        self.active = false;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StorageResult<()> {
        {
            let conn = self.conn()?;
            conn.execute("ROLLBACK", []).map_err(|e| {
                StorageError::Transaction(TransactionError::RolledBack {
                    reason: format!("Rollback failed: {}", e),
                })
            })?;
        }
        self.active = false;
        Ok(())
    }

    fn context(&self) -> &RequestContext {
        &self.context
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.active {
            // Auto-rollback if not committed
            let conn = self.conn.lock();
            if let Err(e) = conn.execute("ROLLBACK", []) {
                tracing::warn!(error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}

#[async_trait]
impl TransactionProvider for SqliteBackend {
    async fn begin(&self, ctx: &RequestContext) -> StorageResult<Box<dyn Transaction>> {
        let conn = self.get_connection()?;
        let tx = SqliteTransaction::new(conn, ctx.clone())?;
        Ok(Box::new(tx))
    }
}
