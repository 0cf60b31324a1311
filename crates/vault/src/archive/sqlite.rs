//! SQLite-based archive with blob storage for message bodies

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::blob::BlobStore;
use super::traits::{ArchiveRecord, ArchiveStore};
use crate::models::{MessageKind, MessageMetadata, StableId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per archived message
            CREATE TABLE records (
                stable_id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                internal_date INTEGER NOT NULL,  -- unix millis
                subject TEXT NOT NULL,
                flags TEXT NOT NULL DEFAULT '[]',  -- JSON array
                compressed INTEGER NOT NULL DEFAULT 0,
                quarantined INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_records_kind_date
                ON records(kind, internal_date ASC, stable_id ASC);

            -- Labels on records (many-to-many)
            CREATE TABLE record_labels (
                stable_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (stable_id, label),
                FOREIGN KEY (stable_id) REFERENCES records(stable_id) ON DELETE CASCADE
            );

            -- Logins associated with the archive
            CREATE TABLE owners (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                login TEXT NOT NULL UNIQUE,
                added_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        ),
    ])
}

/// SQLite-based archive store
///
/// Uses SQLite for queryable metadata and a BlobStore for bodies.
pub struct SqliteArchiveStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    blob_store: Box<dyn BlobStore>,
}

impl SqliteArchiveStore {
    /// Create a new SQLite archive store
    ///
    /// - `db_path`: Path to the SQLite database file
    /// - `blob_store`: Storage for message bodies
    pub fn new(db_path: impl AsRef<Path>, blob_store: Box<dyn BlobStore>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let mut conn = Connection::open(&path)
            .with_context(|| format!("Failed to open archive at {:?}", path))?;

        // WAL with NORMAL sync, a 64MB page cache, in-memory temp tables,
        // 256MB mmap. Foreign keys are needed for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run archive migrations")?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            blob_store,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Archive connection lock poisoned"))
    }

    fn load_labels(&self, conn: &Connection, id: StableId) -> Result<BTreeSet<String>> {
        let mut stmt =
            conn.prepare("SELECT label FROM record_labels WHERE stable_id = ? ORDER BY label")?;
        let labels = stmt
            .query_map([to_sql_id(id)?], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(labels)
    }

    fn save_labels(&self, conn: &Connection, id: StableId, labels: &BTreeSet<String>) -> Result<()> {
        conn.execute("DELETE FROM record_labels WHERE stable_id = ?", [to_sql_id(id)?])?;
        let mut stmt =
            conn.prepare("INSERT INTO record_labels (stable_id, label) VALUES (?, ?)")?;
        for label in labels {
            stmt.execute(params![to_sql_id(id)?, label])?;
        }
        Ok(())
    }
}

/// SQLite integers are signed; ids above `i64::MAX` cannot be stored
fn to_sql_id(id: StableId) -> Result<i64> {
    i64::try_from(id.as_u64()).map_err(|_| anyhow!("Stable id {} does not fit the archive", id))
}

fn from_sql_id(id: i64) -> Result<StableId> {
    u64::try_from(id)
        .map(StableId::new)
        .map_err(|_| anyhow!("Negative stable id {} in the archive", id))
}

fn parse_flags(json: &str) -> Result<BTreeSet<String>> {
    serde_json::from_str(json).context("Malformed flags column")
}

impl ArchiveStore for SqliteArchiveStore {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn get_record(&self, id: StableId) -> Result<Option<ArchiveRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT kind, internal_date, subject, flags, compressed, quarantined
                 FROM records WHERE stable_id = ?",
                [to_sql_id(id)?],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((kind, date, subject, flags, compressed, quarantined)) = row else {
            return Ok(None);
        };

        let kind = MessageKind::parse(&kind)
            .ok_or_else(|| anyhow!("Unknown record kind {:?} for {}", kind, id))?;
        let internal_date = DateTime::<Utc>::from_timestamp_millis(date)
            .ok_or_else(|| anyhow!("Invalid internal date {} for {}", date, id))?;

        let metadata = MessageMetadata {
            stable_id: id,
            flags: parse_flags(&flags)?,
            labels: self.load_labels(&conn, id)?,
            internal_date,
            subject,
        };

        Ok(Some(ArchiveRecord {
            metadata,
            kind,
            compressed,
            quarantined,
        }))
    }

    fn get_body(&self, id: StableId) -> Result<Option<Vec<u8>>> {
        self.blob_store.get(id)
    }

    fn bury(
        &self,
        metadata: &MessageMetadata,
        kind: MessageKind,
        body: &[u8],
        compress: bool,
    ) -> Result<()> {
        let id = metadata.stable_id;
        let sql_id = to_sql_id(id)?;

        // Body first so a record never points at a missing body
        self.blob_store
            .put(id, body, compress)
            .with_context(|| format!("Failed to store body of {}", id))?;

        let flags = serde_json::to_string(&metadata.flags)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO records (stable_id, kind, internal_date, subject, flags, compressed, quarantined)
             VALUES (?, ?, ?, ?, ?, ?, 0)
             ON CONFLICT(stable_id) DO UPDATE SET
                kind = excluded.kind,
                internal_date = excluded.internal_date,
                subject = excluded.subject,
                flags = excluded.flags,
                compressed = excluded.compressed,
                quarantined = 0",
            params![
                sql_id,
                kind.as_str(),
                metadata.internal_date.timestamp_millis(),
                metadata.subject,
                flags,
                compress,
            ],
        )?;
        self.save_labels(&tx, id, &metadata.labels)?;
        tx.commit()?;

        Ok(())
    }

    fn update_metadata(&self, metadata: &MessageMetadata) -> Result<()> {
        let id = metadata.stable_id;
        let flags = serde_json::to_string(&metadata.flags)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE records SET internal_date = ?, subject = ?, flags = ? WHERE stable_id = ?",
            params![
                metadata.internal_date.timestamp_millis(),
                metadata.subject,
                flags,
                to_sql_id(id)?,
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("Cannot update metadata of unknown record {}", id));
        }
        self.save_labels(&tx, id, &metadata.labels)?;
        tx.commit()?;

        Ok(())
    }

    fn list_ids(&self, kind: MessageKind, since: Option<NaiveDate>) -> Result<Vec<StableId>> {
        let floor = since
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(i64::MIN);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT stable_id FROM records
             WHERE kind = ? AND internal_date >= ?
             ORDER BY internal_date ASC, stable_id ASC",
        )?;
        let raw = stmt
            .query_map(params![kind.as_str(), floor], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(from_sql_id).collect()
    }

    fn quarantine(&self, id: StableId) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE records SET quarantined = 1 WHERE stable_id = ?",
            [to_sql_id(id)?],
        )?;
        Ok(updated > 0)
    }

    fn delete(&self, ids: &[StableId]) -> Result<usize> {
        let mut deleted = 0;
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM records WHERE stable_id = ?")?;
                for id in ids {
                    deleted += stmt.execute([to_sql_id(*id)?])?;
                }
            }
            tx.commit()?;
        }

        for id in ids {
            self.blob_store.delete(*id)?;
        }

        Ok(deleted)
    }

    fn owners(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT login FROM owners ORDER BY position")?;
        let owners = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(owners)
    }

    fn store_owner(&self, login: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("INSERT OR IGNORE INTO owners (login) VALUES (?)", [login])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileBlobStore;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteArchiveStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("archive.test.sqlite");
        let blob_path = dir.path().join("bodies.test");

        let blob_store = Box::new(FileBlobStore::new(&blob_path).unwrap());
        let store = SqliteArchiveStore::new(&db_path, blob_store).unwrap();

        (store, dir)
    }

    fn make_metadata(id: u64, day: u32) -> MessageMetadata {
        MessageMetadata::new(
            StableId::new(id),
            Utc.with_ymd_and_hms(2019, 6, day, 12, 0, 0).unwrap(),
        )
        .with_flags(["\\Seen"])
        .with_labels(["Work", "Receipts"])
        .with_subject(format!("Message {}", id))
    }

    #[test]
    fn test_record_crud() {
        let (store, _dir) = create_test_store();
        let meta = make_metadata(100, 1);

        store.bury(&meta, MessageKind::Email, b"raw body", true).unwrap();

        let record = store.get_record(StableId::new(100)).unwrap().unwrap();
        assert_eq!(record.metadata, meta);
        assert_eq!(record.kind, MessageKind::Email);
        assert!(record.compressed);
        assert!(!record.quarantined);
        assert_eq!(store.get_body(StableId::new(100)).unwrap().unwrap(), b"raw body");
        assert!(!store.has_record(StableId::new(101)).unwrap());
    }

    #[test]
    fn test_update_metadata_keeps_quarantine() {
        let (store, _dir) = create_test_store();
        let meta = make_metadata(100, 1);
        store.bury(&meta, MessageKind::Chat, b"chat", false).unwrap();
        assert!(store.quarantine(StableId::new(100)).unwrap());

        let changed = meta.clone().with_labels(["Work"]).with_flags(["\\Seen", "\\Flagged"]);
        store.update_metadata(&changed).unwrap();

        let record = store.get_record(StableId::new(100)).unwrap().unwrap();
        assert_eq!(record.metadata.labels.len(), 1);
        assert!(record.metadata.flags.contains("\\Flagged"));
        assert!(record.quarantined);
        assert_eq!(record.kind, MessageKind::Chat);
    }

    #[test]
    fn test_update_unknown_record_fails() {
        let (store, _dir) = create_test_store();
        assert!(store.update_metadata(&make_metadata(5, 1)).is_err());
    }

    #[test]
    fn test_list_ids_ordered_and_filtered() {
        let (store, _dir) = create_test_store();
        store.bury(&make_metadata(30, 3), MessageKind::Email, b"c", false).unwrap();
        store.bury(&make_metadata(10, 1), MessageKind::Email, b"a", false).unwrap();
        store.bury(&make_metadata(20, 3), MessageKind::Email, b"b", false).unwrap();
        store.bury(&make_metadata(40, 2), MessageKind::Chat, b"d", false).unwrap();

        let all = store.list_ids(MessageKind::Email, None).unwrap();
        assert_eq!(all, vec![StableId::new(10), StableId::new(20), StableId::new(30)]);

        let since = NaiveDate::from_ymd_opt(2019, 6, 2).unwrap();
        let recent = store.list_ids(MessageKind::Email, Some(since)).unwrap();
        assert_eq!(recent, vec![StableId::new(20), StableId::new(30)]);

        assert_eq!(store.list_ids(MessageKind::Chat, None).unwrap(), vec![StableId::new(40)]);
    }

    #[test]
    fn test_delete_removes_bodies() {
        let (store, _dir) = create_test_store();
        store.bury(&make_metadata(1, 1), MessageKind::Email, b"a", true).unwrap();
        store.bury(&make_metadata(2, 1), MessageKind::Email, b"b", true).unwrap();

        let deleted = store.delete(&[StableId::new(1), StableId::new(99)]).unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_record(StableId::new(1)).unwrap().is_none());
        assert!(store.get_body(StableId::new(1)).unwrap().is_none());
        assert!(store.has_record(StableId::new(2)).unwrap());
    }

    #[test]
    fn test_owners() {
        let (store, _dir) = create_test_store();
        assert!(store.owners().unwrap().is_empty());

        store.store_owner("a@x.com").unwrap();
        store.store_owner("b@x.com").unwrap();
        store.store_owner("a@x.com").unwrap();

        assert_eq!(store.owners().unwrap(), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_ids_beyond_i64_are_refused() {
        let (store, _dir) = create_test_store();
        let largest = i64::MAX as u64;
        store
            .bury(&make_metadata(largest, 1), MessageKind::Email, b"x", false)
            .unwrap();

        let result = store.bury(&make_metadata(largest + 1, 1), MessageKind::Email, b"y", false);
        assert!(result.is_err());
        assert!(store.get_record(StableId::new(largest + 1)).is_err());
        assert_eq!(
            store.list_ids(MessageKind::Email, None).unwrap(),
            vec![StableId::new(largest)]
        );
        assert_eq!(store.get_body(StableId::new(largest + 1)).unwrap(), None);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("archive.test.sqlite");
        let blob_path = dir.path().join("bodies.test");
        {
            let store = SqliteArchiveStore::new(
                &db_path,
                Box::new(FileBlobStore::new(&blob_path).unwrap()),
            )
            .unwrap();
            store.bury(&make_metadata(7, 1), MessageKind::Email, b"x", false).unwrap();
            store.store_owner("a@x.com").unwrap();
        }

        let store =
            SqliteArchiveStore::new(&db_path, Box::new(FileBlobStore::new(&blob_path).unwrap()))
                .unwrap();
        assert!(store.has_record(StableId::new(7)).unwrap());
        assert_eq!(store.owners().unwrap(), vec!["a@x.com"]);
    }
}
