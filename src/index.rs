//! C2 — Relational index.
//!
//! A `rusqlite` connection guarded by a `Mutex`, exactly like
//! `cache/local/metadata.rs::LocalMetadata`: calls are synchronous and made
//! from inside async call sites without `spawn_blocking`, since SQLite
//! operations here are small and local-disk bound. Schema is installed with
//! `execute_batch` + `CREATE TABLE IF NOT EXISTS`, same as the teacher.
//!
//! Table shapes follow `jupyter_cache/cache/db.py`'s `Setting`,
//! `NbCommitRecord`, and `NbStageRecord` tables, renamed to this crate's
//! vocabulary (`cache_record`, `project_record`) and with `created`/
//! `accessed` stored as RFC 3339 text via `time::OffsetDateTime` rather than
//! SQLAlchemy's native datetime column.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// A single entry in the cache: one executed notebook, keyed by fingerprint.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheRecord {
    pub id: i64,
    pub fingerprint: Fingerprint,
    pub origin_uri: Option<String>,
    pub description: String,
    pub data: Map<String, Value>,
    pub created_at: OffsetDateTime,
    pub accessed_at: OffsetDateTime,
}

/// One notebook known to a project: a path plus the reader used to load it.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectRecord {
    pub id: i64,
    pub uri: String,
    pub assets: Vec<PathBuf>,
    pub reader_key: String,
    pub traceback: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Lookup key for project record operations that accept either form.
#[derive(Clone, Copy, Debug)]
pub enum ProjectKey<'a> {
    Id(i64),
    Uri(&'a str),
}

/// The relational index backing a cache instance.
pub struct Index {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("conn", &"<connection>").finish()
    }
}

impl Index {
    #[instrument(name = "Index::open", skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let index = Self { conn: Mutex::new(conn) };
        index.init_schema()?;
        Ok(index)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let index = Self { conn: Mutex::new(conn) };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS setting (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL UNIQUE,
                origin_uri TEXT,
                description TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                accessed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uri TEXT NOT NULL UNIQUE,
                assets TEXT NOT NULL DEFAULT '[]',
                reader_key TEXT NOT NULL,
                traceback TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // -- settings --------------------------------------------------------

    #[instrument(name = "Index::setting_get", skip(self))]
    pub fn setting_get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let raw: Option<String> = conn
            .query_row("SELECT value FROM setting WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(match raw {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        })
    }

    #[instrument(name = "Index::setting_set", skip(self, value))]
    pub fn setting_set(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute(
            "INSERT INTO setting (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        )?;
        Ok(())
    }

    #[instrument(name = "Index::all_settings", skip(self))]
    pub fn all_settings(&self) -> Result<Map<String, Value>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn.prepare("SELECT key, value FROM setting")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Map::new();
        for row in rows {
            let (key, raw) = row?;
            out.insert(key, serde_json::from_str(&raw)?);
        }
        Ok(out)
    }

    // -- cache records -----------------------------------------------------

    #[instrument(name = "Index::insert_cache_record", skip(self, data))]
    pub fn insert_cache_record(
        &self,
        fingerprint: &Fingerprint,
        origin_uri: Option<&str>,
        description: &str,
        data: &Map<String, Value>,
    ) -> Result<CacheRecord> {
        let now = OffsetDateTime::now_utc();
        let now_text = now.format(&Rfc3339).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let data_text = serde_json::to_string(data)?;
        let conn = self.conn.lock().expect("index connection poisoned");
        let outcome = conn.execute(
            "INSERT INTO cache_record (fingerprint, origin_uri, description, data, created_at, accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![fingerprint.as_str(), origin_uri, description, data_text, now_text],
        );
        match outcome {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::DuplicateFingerprint(fingerprint.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        Ok(CacheRecord {
            id,
            fingerprint: fingerprint.clone(),
            origin_uri: origin_uri.map(str::to_string),
            description: description.to_string(),
            data: data.clone(),
            created_at: now,
            accessed_at: now,
        })
    }

    #[instrument(name = "Index::touch_cache_record", skip(self))]
    pub fn touch_cache_record(&self, id: i64) -> Result<()> {
        let now_text = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let conn = self.conn.lock().expect("index connection poisoned");
        let updated = conn.execute("UPDATE cache_record SET accessed_at = ?1 WHERE id = ?2", params![now_text, id])?;
        if updated == 0 {
            return Err(Error::NotFound(format!("no cache record with id {id}")));
        }
        Ok(())
    }

    #[instrument(name = "Index::cache_record_by_fingerprint", skip(self))]
    pub fn cache_record_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<CacheRecord>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.query_row(
            "SELECT id, fingerprint, origin_uri, description, data, created_at, accessed_at
             FROM cache_record WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
            row_to_cache_record,
        )
        .optional()
        .map_err(Into::into)
    }

    #[instrument(name = "Index::cache_record_by_id", skip(self))]
    pub fn cache_record_by_id(&self, id: i64) -> Result<Option<CacheRecord>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.query_row(
            "SELECT id, fingerprint, origin_uri, description, data, created_at, accessed_at
             FROM cache_record WHERE id = ?1",
            params![id],
            row_to_cache_record,
        )
        .optional()
        .map_err(Into::into)
    }

    #[instrument(name = "Index::list_cache_records", skip(self))]
    pub fn list_cache_records(&self) -> Result<Vec<CacheRecord>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, fingerprint, origin_uri, description, data, created_at, accessed_at
             FROM cache_record ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_cache_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Ids of cache records to evict so that at most `keep` remain, oldest
    /// `accessed_at` first, ties broken by the higher id first (the most
    /// recently-inserted of a tie is kept).
    ///
    /// Mirrors `NbCommitRecord.records_to_delete`: order by `accessed_at`
    /// descending, keep the first `keep`, the rest are the eviction set.
    #[instrument(name = "Index::oldest_to_evict", skip(self))]
    pub fn oldest_to_evict(&self, keep: usize) -> Result<Vec<i64>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id FROM cache_record
             ORDER BY accessed_at DESC, id DESC
             LIMIT -1 OFFSET ?1",
        )?;
        let rows = stmt.query_map(params![keep as i64], |row| row.get::<_, i64>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    #[instrument(name = "Index::remove_cache_records", skip(self, ids))]
    pub fn remove_cache_records(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("DELETE FROM cache_record WHERE id IN ({placeholders})");
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    #[instrument(name = "Index::clear_cache_records", skip(self))]
    pub fn clear_cache_records(&self) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute("DELETE FROM cache_record", [])?;
        Ok(())
    }

    // -- project records -----------------------------------------------------

    #[instrument(name = "Index::insert_project_record", skip(self, assets))]
    pub fn insert_project_record(&self, uri: &str, assets: &[PathBuf], reader_key: &str) -> Result<ProjectRecord> {
        let now = OffsetDateTime::now_utc();
        let now_text = now.format(&Rfc3339).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let assets_text = serde_json::to_string(assets)?;
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute(
            "INSERT INTO project_record (uri, assets, reader_key, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![uri, assets_text, reader_key, now_text],
        )?;
        let id = conn.last_insert_rowid();
        Ok(ProjectRecord {
            id,
            uri: uri.to_string(),
            assets: assets.to_vec(),
            reader_key: reader_key.to_string(),
            traceback: None,
            created_at: now,
        })
    }

    #[instrument(name = "Index::project_record", skip(self))]
    pub fn project_record(&self, key: ProjectKey<'_>) -> Result<Option<ProjectRecord>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let sql = "SELECT id, uri, assets, reader_key, traceback, created_at FROM project_record WHERE ";
        match key {
            ProjectKey::Id(id) => conn
                .query_row(&format!("{sql}id = ?1"), params![id], row_to_project_record)
                .optional()
                .map_err(Into::into),
            ProjectKey::Uri(uri) => conn
                .query_row(&format!("{sql}uri = ?1"), params![uri], row_to_project_record)
                .optional()
                .map_err(Into::into),
        }
    }

    #[instrument(name = "Index::list_project_records", skip(self))]
    pub fn list_project_records(&self) -> Result<Vec<ProjectRecord>> {
        let conn = self.conn.lock().expect("index connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, uri, assets, reader_key, traceback, created_at FROM project_record ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_project_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    #[instrument(name = "Index::remove_project_record", skip(self))]
    pub fn remove_project_record(&self, key: ProjectKey<'_>) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        match key {
            ProjectKey::Id(id) => conn.execute("DELETE FROM project_record WHERE id = ?1", params![id])?,
            ProjectKey::Uri(uri) => conn.execute("DELETE FROM project_record WHERE uri = ?1", params![uri])?,
        };
        Ok(())
    }

    #[instrument(name = "Index::set_traceback", skip(self, traceback))]
    pub fn set_traceback(&self, id: i64, traceback: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute("UPDATE project_record SET traceback = ?1 WHERE id = ?2", params![traceback, id])?;
        Ok(())
    }

    #[instrument(name = "Index::clear_tracebacks", skip(self, ids))]
    pub fn clear_tracebacks(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("UPDATE project_record SET traceback = NULL WHERE id IN ({placeholders})");
        let conn = self.conn.lock().expect("index connection poisoned");
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }
}

fn row_to_cache_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRecord> {
    let fingerprint_text: String = row.get(1)?;
    let data_text: String = row.get(4)?;
    let created_text: String = row.get(5)?;
    let accessed_text: String = row.get(6)?;
    Ok(CacheRecord {
        id: row.get(0)?,
        fingerprint: Fingerprint::from(fingerprint_text),
        origin_uri: row.get(2)?,
        description: row.get(3)?,
        data: serde_json::from_str(&data_text).unwrap_or_default(),
        created_at: parse_rfc3339(&created_text),
        accessed_at: parse_rfc3339(&accessed_text),
    })
}

fn row_to_project_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRecord> {
    let assets_text: String = row.get(2)?;
    let created_text: String = row.get(5)?;
    Ok(ProjectRecord {
        id: row.get(0)?,
        uri: row.get(1)?,
        assets: serde_json::from_str(&assets_text).unwrap_or_default(),
        reader_key: row.get(3)?,
        traceback: row.get(4)?,
        created_at: parse_rfc3339(&created_text),
    })
}

fn parse_rfc3339(text: &str) -> OffsetDateTime {
    OffsetDateTime::parse(text, &Rfc3339).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from(s.to_string())
    }

    #[test]
    fn insert_and_lookup_cache_record() {
        let index = Index::in_memory().unwrap();
        let record = index
            .insert_cache_record(&fp("abc123"), Some("notebooks/a.ipynb"), "first run", &Map::new())
            .unwrap();
        let fetched = index.cache_record_by_fingerprint(&fp("abc123")).unwrap().unwrap();
        pretty_assert_eq!(record.id, fetched.id);
        pretty_assert_eq!(fetched.description, "first run");
    }

    #[test]
    fn duplicate_fingerprint_is_rejected() {
        let index = Index::in_memory().unwrap();
        index.insert_cache_record(&fp("abc123"), None, "", &Map::new()).unwrap();
        let err = index
            .insert_cache_record(&fp("abc123"), None, "", &Map::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateFingerprint(_)));
    }

    #[test]
    fn oldest_to_evict_respects_keep_and_tie_break() {
        let index = Index::in_memory().unwrap();
        let a = index.insert_cache_record(&fp("a"), None, "", &Map::new()).unwrap();
        let b = index.insert_cache_record(&fp("b"), None, "", &Map::new()).unwrap();
        let c = index.insert_cache_record(&fp("c"), None, "", &Map::new()).unwrap();
        // All three were inserted at (effectively) the same instant in this
        // fast test, so accessed_at ties; the tie-break keeps higher ids.
        let to_evict = index.oldest_to_evict(2).unwrap();
        pretty_assert_eq!(to_evict, vec![a.id]);
        let _ = (b.id, c.id);
    }

    #[test]
    fn touch_updates_accessed_at() {
        let index = Index::in_memory().unwrap();
        let record = index.insert_cache_record(&fp("abc"), None, "", &Map::new()).unwrap();
        index.touch_cache_record(record.id).unwrap();
        let fetched = index.cache_record_by_id(record.id).unwrap().unwrap();
        assert!(fetched.accessed_at >= record.accessed_at);
    }

    #[test]
    fn touch_nonexistent_record_is_not_found() {
        let index = Index::in_memory().unwrap();
        let err = index.touch_cache_record(999).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn project_record_round_trips_assets() {
        let index = Index::in_memory().unwrap();
        let assets = vec![PathBuf::from("data/a.csv"), PathBuf::from("data/b.csv")];
        index.insert_project_record("notebooks/a.ipynb", &assets, "default").unwrap();
        let record = index
            .project_record(ProjectKey::Uri("notebooks/a.ipynb"))
            .unwrap()
            .unwrap();
        pretty_assert_eq!(record.assets, assets);
    }

    #[test]
    fn settings_round_trip() {
        let index = Index::in_memory().unwrap();
        index.setting_set("commit_limit", &Value::from(1000)).unwrap();
        pretty_assert_eq!(index.setting_get("commit_limit").unwrap(), Some(Value::from(1000)));
        let all = index.all_settings().unwrap();
        pretty_assert_eq!(all.get("commit_limit"), Some(&Value::from(1000)));
    }
}
