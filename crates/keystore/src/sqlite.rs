//! SQLite key store.
//!
//! Rows are kept in a single `encryption_keys` table in WAL mode. All
//! timestamps are Unix milliseconds. The connection is shared behind a
//! mutex, so every call is serialized; callers generate key material before
//! reaching the store and never hold the lock across crypto work.

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::model::{KeyScope, KeyType, StoredKey};
use crate::store::{KeyFilter, KeyPatch, KeyStore, Lookup};

const SELECT_COLUMNS: &str = r#"
    SELECT id, key_type, algorithm, encrypted_value, iv, auth_tag, scope,
           created_at, expires_at, is_revoked, related_key_id
    FROM encryption_keys
"#;

/// Key store backed by a SQLite database file.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteKeyStore {
    /// Create or open the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening key store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS encryption_keys (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                key_type TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                encrypted_value BLOB NOT NULL,
                iv BLOB NOT NULL,
                auth_tag BLOB NOT NULL,
                scope TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                is_revoked INTEGER NOT NULL DEFAULT 0,
                related_key_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_keys_type_scope_created
                ON encryption_keys(key_type, scope, created_at);
            CREATE INDEX IF NOT EXISTS idx_keys_expires_at ON encryption_keys(expires_at);
            "#,
        )?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn insert(conn: &Connection, key: &StoredKey) -> StoreResult<()> {
        let result = conn.execute(
            r#"
            INSERT INTO encryption_keys (
                id, key_type, algorithm, encrypted_value, iv, auth_tag, scope,
                created_at, expires_at, is_revoked, related_key_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                key.id,
                key.key_type.as_str(),
                key.algorithm.as_str(),
                key.encrypted_value,
                key.iv,
                key.auth_tag,
                key.scope.to_string(),
                key.created_at.timestamp_millis(),
                key.expires_at.timestamp_millis(),
                key.is_revoked,
                key.related_key_id,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate { id: key.id.clone() })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn millis_to_datetime(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {}", ms).into(),
        )
    })
}

fn parse_column<T>(idx: usize, text: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_key(row: &Row<'_>) -> rusqlite::Result<StoredKey> {
    Ok(StoredKey {
        id: row.get(0)?,
        key_type: parse_column(1, row.get(1)?)?,
        algorithm: parse_column(2, row.get(2)?)?,
        encrypted_value: row.get(3)?,
        iv: row.get(4)?,
        auth_tag: row.get(5)?,
        scope: parse_column(6, row.get(6)?)?,
        created_at: millis_to_datetime(7, row.get(7)?)?,
        expires_at: millis_to_datetime(8, row.get(8)?)?,
        is_revoked: row.get(9)?,
        related_key_id: row.get(10)?,
    })
}

/// Render a filter as a WHERE clause with positional parameters.
fn where_clause(filter: &KeyFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(id) = &filter.id {
        clauses.push("id = ?");
        values.push(Value::Text(id.clone()));
    }
    if let Some(key_type) = filter.key_type {
        clauses.push("key_type = ?");
        values.push(Value::Text(key_type.as_str().to_string()));
    }
    if let Some(scope) = &filter.scope {
        clauses.push("scope = ?");
        values.push(Value::Text(scope.to_string()));
    }
    if let Some(id) = &filter.exclude_id {
        clauses.push("id != ?");
        values.push(Value::Text(id.clone()));
    }
    if let Some(revoked) = filter.revoked {
        clauses.push("is_revoked = ?");
        values.push(Value::Integer(i64::from(revoked)));
    }
    if let Some(at) = filter.expires_before {
        clauses.push("expires_at < ?");
        values.push(Value::Integer(at.timestamp_millis()));
    }
    if let Some(at) = filter.expires_after {
        clauses.push("expires_at > ?");
        values.push(Value::Integer(at.timestamp_millis()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

impl KeyStore for SqliteKeyStore {
    fn create(&self, key: &StoredKey) -> StoreResult<()> {
        let conn = self.conn()?;
        Self::insert(&conn, key)?;
        debug!(key_id = %key.id, key_type = %key.key_type, scope = %key.scope, "Key row inserted");
        Ok(())
    }

    fn create_all(&self, keys: &[StoredKey]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for key in keys {
            Self::insert(&tx, key)?;
        }
        tx.commit()?;
        debug!(count = keys.len(), "Key rows inserted");
        Ok(())
    }

    fn find_current(&self, key_type: KeyType, scope: &KeyScope, now: DateTime<Utc>) -> StoreResult<Lookup> {
        let conn = self.conn()?;
        let sql = format!(
            "{} WHERE key_type = ?1 AND scope = ?2 AND is_revoked = 0 AND expires_at > ?3 \
             ORDER BY created_at DESC, seq DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let found = conn
            .query_row(
                &sql,
                params![key_type.as_str(), scope.to_string(), now.timestamp_millis()],
                row_to_key,
            )
            .optional()?;

        Ok(found.map_or(Lookup::Missing, Lookup::Found))
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<StoredKey>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, [id], row_to_key).optional()?)
    }

    fn update_many(&self, filter: &KeyFilter, patch: &KeyPatch) -> StoreResult<usize> {
        if patch.is_empty() {
            return Ok(0);
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(at) = patch.expires_at {
            sets.push("expires_at = ?");
            values.push(Value::Integer(at.timestamp_millis()));
        }
        if let Some(revoked) = patch.is_revoked {
            sets.push("is_revoked = ?");
            values.push(Value::Integer(i64::from(revoked)));
        }

        let (clause, filter_values) = where_clause(filter);
        values.extend(filter_values);
        let sql = format!("UPDATE encryption_keys SET {}{}", sets.join(", "), clause);

        let conn = self.conn()?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(changed)
    }

    fn delete_many(&self, filter: &KeyFilter) -> StoreResult<usize> {
        let (clause, values) = where_clause(filter);
        let sql = format!("DELETE FROM encryption_keys{}", clause);

        let conn = self.conn()?;
        let deleted = conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(deleted)
    }

    fn list(&self, filter: &KeyFilter) -> StoreResult<Vec<StoredKey>> {
        let (clause, values) = where_clause(filter);
        let sql = format!(
            "{}{} ORDER BY created_at DESC, seq DESC",
            SELECT_COLUMNS, clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map(params_from_iter(values.iter()), row_to_key)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }
}
