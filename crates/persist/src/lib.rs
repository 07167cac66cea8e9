//! Multiverse persistence: tracked state kept in SQLite between invocations.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use multiverse_core::TrackedState;
use tracing::debug;

/// Tracked-state records keyed by `ResourceDescriptor::key()`.
pub trait StateStore {
    fn load(&self, key: &str) -> Result<Option<TrackedState>>;
    /// Save `state`; an untracked state (empty id) removes the record.
    fn save(&self, key: &str, state: &TrackedState) -> Result<()>;
    fn remove(&self, key: &str) -> Result<bool>;
    fn list(&self) -> Result<Vec<(String, TrackedState)>>;
}

/// SQLite-backed store. Simple, synchronous.
pub struct SqliteStateStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStateStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("MULTIVERSE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS tracked_state (
                key         TEXT PRIMARY KEY,
                id          TEXT NOT NULL,
                name        TEXT NOT NULL,
                kind        TEXT NOT NULL,
                namespace   TEXT NOT NULL,
                api_version TEXT NOT NULL,
                spec        BLOB NOT NULL,
                updated_at  INTEGER NOT NULL
            )",
            [],
        )
        .context("creating tracked_state table")?;
        let me = Self { db: std::sync::Mutex::new(db) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("state db lock poisoned"))
    }
}

fn row_to_state(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<TrackedState> {
    let spec: Vec<u8> = row.get(offset + 5)?;
    Ok(TrackedState {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        kind: row.get(offset + 2)?,
        namespace: row.get(offset + 3)?,
        api_version: row.get(offset + 4)?,
        spec: maybe_decompress(&spec),
    })
}

impl StateStore for SqliteStateStore {
    fn load(&self, key: &str) -> Result<Option<TrackedState>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT id, name, kind, namespace, api_version, spec FROM tracked_state WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(row_to_state(row, 0)?),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn save(&self, key: &str, state: &TrackedState) -> Result<()> {
        if state.id.is_empty() {
            self.remove(key)?;
            return Ok(());
        }
        let started = std::time::Instant::now();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO tracked_state(key, id, name, kind, namespace, api_version, spec, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(key) DO UPDATE SET
                id = excluded.id, name = excluded.name, kind = excluded.kind,
                namespace = excluded.namespace, api_version = excluded.api_version,
                spec = excluded.spec, updated_at = excluded.updated_at",
            (
                key,
                &state.id,
                &state.name,
                &state.kind,
                &state.namespace,
                &state.api_version,
                maybe_compress(&state.spec),
                now_ts(),
            ),
        )
        .with_context(|| format!("saving tracked state for {}", key))?;
        debug!(key = %key, id = %state.id, "tracked state saved");
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM tracked_state WHERE key = ?1", [key])?;
        if n > 0 {
            debug!(key = %key, "tracked state removed");
            counter!("persist_remove_total", 1u64);
        }
        Ok(n > 0)
    }

    fn list(&self) -> Result<Vec<(String, TrackedState)>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT key, id, name, kind, namespace, api_version, spec FROM tracked_state ORDER BY key")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            out.push((key, row_to_state(row, 1)?));
        }
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".multiverse");
        let _ = std::fs::create_dir_all(&p);
        p.push("state.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "multiverse.db".to_string()
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(feature = "zstd")]
pub fn maybe_compress(text: &str) -> Vec<u8> {
    let lvl: i32 = std::env::var("MULTIVERSE_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
    zstd::encode_all(text.as_bytes(), lvl).unwrap_or_else(|_| text.as_bytes().to_vec())
}

#[cfg(not(feature = "zstd"))]
pub fn maybe_compress(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Accepts both compressed and plain blobs, so toggling the feature keeps old rows readable.
pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("multiverse-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn tracked(id: &str, spec: &str) -> TrackedState {
        TrackedState {
            id: id.into(),
            name: "n".into(),
            kind: "Job".into(),
            namespace: "ns".into(),
            api_version: "batch/v1".into(),
            spec: spec.into(),
        }
    }

    #[test]
    fn save_load_overwrite() {
        let s = SqliteStateStore::open(&temp_db()).unwrap();
        let key = "batch/v1/Job/ns/n";
        assert_eq!(s.load(key).unwrap(), None);
        s.save(key, &tracked("uid-1", "replicas: 3\n")).unwrap();
        s.save(key, &tracked("uid-1", "replicas: 4\n")).unwrap();
        assert_eq!(s.load(key).unwrap(), Some(tracked("uid-1", "replicas: 4\n")));
        assert_eq!(s.list().unwrap().len(), 1);
    }

    #[test]
    fn saving_untracked_state_removes_row() {
        let s = SqliteStateStore::open(&temp_db()).unwrap();
        let key = "batch/v1/Job/ns/n";
        s.save(key, &tracked("uid-1", "a: 1\n")).unwrap();
        s.save(key, &TrackedState::default()).unwrap();
        assert_eq!(s.load(key).unwrap(), None);
        assert!(!s.remove(key).unwrap());
    }

    #[test]
    fn list_is_ordered_by_key() {
        let s = SqliteStateStore::open(&temp_db()).unwrap();
        s.save("b", &tracked("2", "")).unwrap();
        s.save("a", &tracked("1", "")).unwrap();
        let keys: Vec<_> = s.list().unwrap().into_iter().map(|(k, st)| (k, st.id)).collect();
        assert_eq!(keys, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn compress_round_trip() {
        let text = "spec:\n  replicas: 3\n";
        assert_eq!(maybe_decompress(&maybe_compress(text)), text);
    }
}
