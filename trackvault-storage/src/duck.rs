//! DuckDB-backed store.
//!
//! Protected columns are `BLOB`s paired with an `*_encrypted` flag so a
//! legacy plaintext value and a sealed blob are never confused.

use crate::error::{StorageError, StorageResult};
use crate::store::{ContentStore, UserStore};
use crate::types::{
    AnalysisRow, AttachmentRow, EncryptionRecord, EventRow, PurgeCounts, StoredValue, UserId,
    UserRecord,
};
use duckdb::{Connection, OptionalExt, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

// Applied to file-backed stores.
const MEMORY_LIMIT: &str = "128MB";
const THREADS: u32 = 1;

/// Persistent store backed by a single DuckDB connection.
#[derive(Clone)]
pub struct DuckStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckStore {
    /// Opens or creates a store at the given path.
    ///
    /// A crash can leave behind a write-ahead log DuckDB refuses to replay.
    /// When the first open fails and `<path>.wal` exists, the log is
    /// discarded and the open retried once.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(open_err) => reopen_without_wal(path, open_err)?,
        };
        conn.execute_batch(&format!(
            "SET memory_limit = '{MEMORY_LIMIT}'; SET threads = {THREADS};"
        ))?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn reopen_without_wal(path: &Path, open_err: duckdb::Error) -> StorageResult<Connection> {
    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    let wal = PathBuf::from(wal);
    if !wal.exists() {
        return Err(open_err.into());
    }

    warn!("open of {} failed ({open_err}); discarding {}", path.display(), wal.display());
    if let Err(e) = std::fs::remove_file(&wal) {
        warn!("could not remove {}: {e}", wal.display());
        return Err(open_err.into());
    }
    Ok(Connection::open(path)?)
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id VARCHAR PRIMARY KEY,
            email VARCHAR NOT NULL UNIQUE,
            password_hash VARCHAR NOT NULL,
            enc_salt BLOB,
            enc_wrapped_dek BLOB,
            enc_wrap_nonce BLOB,
            created_at BIGINT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS events (
            id VARCHAR PRIMARY KEY,
            user_id VARCHAR NOT NULL,
            details BLOB NOT NULL,
            details_encrypted BOOLEAN NOT NULL,
            note BLOB,
            note_encrypted BOOLEAN,
            created_at BIGINT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS attachments (
            id VARCHAR PRIMARY KEY,
            user_id VARCHAR NOT NULL,
            event_id VARCHAR NOT NULL,
            filename VARCHAR NOT NULL,
            data BLOB NOT NULL,
            data_encrypted BOOLEAN NOT NULL
        );
        CREATE TABLE IF NOT EXISTS analysis_cache (
            id VARCHAR PRIMARY KEY,
            user_id VARCHAR NOT NULL,
            result BLOB NOT NULL,
            result_encrypted BOOLEAN NOT NULL,
            created_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);
        CREATE INDEX IF NOT EXISTS idx_attachments_user ON attachments(user_id);
        CREATE INDEX IF NOT EXISTS idx_analysis_user ON analysis_cache(user_id);
        "#,
    )?;
    Ok(())
}

fn parse_uuid(s: &str) -> StorageResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::Corrupt(format!("invalid id {s:?}: {e}")))
}

type RawUser = (String, String, String, Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>, i64);

const USER_COLUMNS: &str =
    "id, email, password_hash, enc_salt, enc_wrapped_dek, enc_wrap_nonce, created_at";

fn read_raw_user(row: &duckdb::Row<'_>) -> duckdb::Result<RawUser> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn user_from_raw(raw: RawUser) -> StorageResult<UserRecord> {
    let (id, email, password_hash, salt, wrapped, nonce, created_at) = raw;
    Ok(UserRecord {
        id: UserId::parse(&id)?,
        email,
        password_hash,
        encryption: EncryptionRecord::from_columns(salt, wrapped, nonce)?,
        created_at,
    })
}

type RawEvent = (String, String, Vec<u8>, bool, Option<Vec<u8>>, Option<bool>, i64);

const EVENT_COLUMNS: &str =
    "id, user_id, details, details_encrypted, note, note_encrypted, created_at";

fn read_raw_event(row: &duckdb::Row<'_>) -> duckdb::Result<RawEvent> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn event_from_raw(raw: RawEvent) -> StorageResult<EventRow> {
    let (id, user_id, details, details_encrypted, note, note_encrypted, created_at) = raw;
    let note = match note {
        Some(bytes) => Some(StoredValue::from_columns(bytes, note_encrypted.unwrap_or(false))?),
        None => None,
    };
    Ok(EventRow {
        id: parse_uuid(&id)?,
        user_id: UserId::parse(&user_id)?,
        details: StoredValue::from_columns(details, details_encrypted)?,
        note,
        created_at,
    })
}

fn note_columns(note: &Option<StoredValue>) -> (Option<Vec<u8>>, Option<bool>) {
    match note {
        Some(value) => {
            let (bytes, encrypted) = value.to_columns();
            (Some(bytes), Some(encrypted))
        }
        None => (None, None),
    }
}

impl UserStore for DuckStore {
    fn create_user(&self, user: &UserRecord) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let taken: i64 = tx.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ? OR id = ?",
            params![user.email, user.id.to_string()],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(StorageError::Conflict(format!("email {} already registered", user.email)));
        }

        let (salt, wrapped, nonce) = match &user.encryption {
            Some(r) => (
                Some(r.salt.as_bytes().to_vec()),
                Some(r.wrapped_data_key.clone()),
                Some(r.wrap_nonce.to_vec()),
            ),
            None => (None, None, None),
        };
        tx.execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                user.id.to_string(),
                user.email,
                user.password_hash,
                salt,
                wrapped,
                nonce,
                user.created_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_user(&self, id: &UserId) -> StorageResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                params![id.to_string()],
                read_raw_user,
            )
            .optional()?;
        raw.map(user_from_raw).transpose()
    }

    fn find_user_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"),
                params![email],
                read_raw_user,
            )
            .optional()?;
        raw.map(user_from_raw).transpose()
    }

    fn set_encryption_record(&self, id: &UserId, record: &EncryptionRecord) -> StorageResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE users SET enc_salt = ?, enc_wrapped_dek = ?, enc_wrap_nonce = ? \
             WHERE id = ? AND enc_salt IS NULL",
            params![
                record.salt.as_bytes().to_vec(),
                record.wrapped_data_key,
                record.wrap_nonce.to_vec(),
                id.to_string(),
            ],
        )?;
        if affected > 0 {
            return Ok(());
        }

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StorageError::NotFound(format!("user {id}")));
        }
        Err(StorageError::Conflict(format!("user {id} already has a data key")))
    }

    fn update_credentials(
        &self,
        id: &UserId,
        password_hash: &str,
        record: &EncryptionRecord,
    ) -> StorageResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE users SET password_hash = ?, enc_salt = ?, enc_wrapped_dek = ?, enc_wrap_nonce = ? \
             WHERE id = ?",
            params![
                password_hash,
                record.salt.as_bytes().to_vec(),
                record.wrapped_data_key,
                record.wrap_nonce.to_vec(),
                id.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    fn delete_user(&self, id: &UserId) -> StorageResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM users WHERE id = ?", params![id.to_string()])?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

impl ContentStore for DuckStore {
    fn insert_event(&self, event: &EventRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (details, details_encrypted) = event.details.to_columns();
        let (note, note_encrypted) = note_columns(&event.note);
        conn.execute(
            &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                event.id.to_string(),
                event.user_id.to_string(),
                details,
                details_encrypted,
                note,
                note_encrypted,
                event.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, id: &Uuid) -> StorageResult<Option<EventRow>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"),
                params![id.to_string()],
                read_raw_event,
            )
            .optional()?;
        raw.map(event_from_raw).transpose()
    }

    fn list_events(&self, user: &UserId) -> StorageResult<Vec<EventRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ? ORDER BY created_at, id"
        ))?;
        let raws = stmt
            .query_map(params![user.to_string()], read_raw_event)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(event_from_raw).collect()
    }

    fn update_event(&self, event: &EventRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (details, details_encrypted) = event.details.to_columns();
        let (note, note_encrypted) = note_columns(&event.note);
        let affected = conn.execute(
            "UPDATE events SET details = ?, details_encrypted = ?, note = ?, note_encrypted = ? \
             WHERE id = ?",
            params![details, details_encrypted, note, note_encrypted, event.id.to_string()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("event {}", event.id)));
        }
        Ok(())
    }

    fn insert_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (data, encrypted) = attachment.data.to_columns();
        conn.execute(
            "INSERT INTO attachments (id, user_id, event_id, filename, data, data_encrypted) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                attachment.id.to_string(),
                attachment.user_id.to_string(),
                attachment.event_id.to_string(),
                attachment.filename,
                data,
                encrypted,
            ],
        )?;
        Ok(())
    }

    fn list_attachments(&self, user: &UserId) -> StorageResult<Vec<AttachmentRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, event_id, filename, data, data_encrypted \
             FROM attachments WHERE user_id = ? ORDER BY id",
        )?;
        let raws = stmt
            .query_map(params![user.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|(id, user_id, event_id, filename, data, encrypted)| {
                Ok(AttachmentRow {
                    id: parse_uuid(&id)?,
                    user_id: UserId::parse(&user_id)?,
                    event_id: parse_uuid(&event_id)?,
                    filename,
                    data: StoredValue::from_columns(data, encrypted)?,
                })
            })
            .collect()
    }

    fn update_attachment(&self, attachment: &AttachmentRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (data, encrypted) = attachment.data.to_columns();
        let affected = conn.execute(
            "UPDATE attachments SET data = ?, data_encrypted = ? WHERE id = ?",
            params![data, encrypted, attachment.id.to_string()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("attachment {}", attachment.id)));
        }
        Ok(())
    }

    fn insert_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (result, encrypted) = analysis.result.to_columns();
        conn.execute(
            "INSERT INTO analysis_cache (id, user_id, result, result_encrypted, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                analysis.id.to_string(),
                analysis.user_id.to_string(),
                result,
                encrypted,
                analysis.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_analyses(&self, user: &UserId) -> StorageResult<Vec<AnalysisRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, result, result_encrypted, created_at \
             FROM analysis_cache WHERE user_id = ? ORDER BY created_at, id",
        )?;
        let raws = stmt
            .query_map(params![user.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|(id, user_id, result, encrypted, created_at)| {
                Ok(AnalysisRow {
                    id: parse_uuid(&id)?,
                    user_id: UserId::parse(&user_id)?,
                    result: StoredValue::from_columns(result, encrypted)?,
                    created_at,
                })
            })
            .collect()
    }

    fn update_analysis(&self, analysis: &AnalysisRow) -> StorageResult<()> {
        let conn = self.lock()?;
        let (result, encrypted) = analysis.result.to_columns();
        let affected = conn.execute(
            "UPDATE analysis_cache SET result = ?, result_encrypted = ? WHERE id = ?",
            params![result, encrypted, analysis.id.to_string()],
        )?;
        if affected == 0 {
            return Err(StorageError::NotFound(format!("analysis {}", analysis.id)));
        }
        Ok(())
    }

    fn count_plaintext(&self, user: &UserId) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT \
                (SELECT COUNT(*) FROM events WHERE user_id = $1 AND NOT details_encrypted) + \
                (SELECT COUNT(*) FROM events WHERE user_id = $1 AND note IS NOT NULL \
                    AND NOT COALESCE(note_encrypted, FALSE)) + \
                (SELECT COUNT(*) FROM attachments WHERE user_id = $1 AND NOT data_encrypted) + \
                (SELECT COUNT(*) FROM analysis_cache WHERE user_id = $1 AND NOT result_encrypted)",
            params![user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn purge_sealed_content(&self, user: &UserId) -> StorageResult<PurgeCounts> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let uid = user.to_string();

        let attachments = tx.execute(
            "DELETE FROM attachments WHERE user_id = $1 AND (data_encrypted OR event_id IN ( \
                SELECT id FROM events WHERE user_id = $1 \
                    AND (details_encrypted OR COALESCE(note_encrypted, FALSE))))",
            params![uid],
        )?;
        let events = tx.execute(
            "DELETE FROM events WHERE user_id = $1 \
                AND (details_encrypted OR COALESCE(note_encrypted, FALSE))",
            params![uid],
        )?;
        let analyses = tx.execute(
            "DELETE FROM analysis_cache WHERE user_id = $1 AND result_encrypted",
            params![uid],
        )?;
        tx.commit()?;

        Ok(PurgeCounts {
            events,
            attachments,
            analyses,
        })
    }

    fn delete_all_content(&self, user: &UserId) -> StorageResult<PurgeCounts> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let uid = user.to_string();

        let attachments = tx.execute("DELETE FROM attachments WHERE user_id = ?", params![uid])?;
        let events = tx.execute("DELETE FROM events WHERE user_id = ?", params![uid])?;
        let analyses = tx.execute("DELETE FROM analysis_cache WHERE user_id = ?", params![uid])?;
        tx.commit()?;

        Ok(PurgeCounts {
            events,
            attachments,
            analyses,
        })
    }
}
