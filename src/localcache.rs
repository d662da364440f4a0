//! Client-side optimisation from Design Notes §9: "a client-side in-memory
//! map from plaintext-name -> FileInfo (invalidated when user-revision
//! changes) is the intended optimisation." Backed by sqlite rather than a
//! pure in-memory map so it survives across CLI invocations (precedent:
//! `client/cli/src/db.rs`'s `LocalDb`).

use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub struct LocalCache {
    conn: Connection,
}

/// Default on-disk location for a given server+user pair, so repeated
/// `syncdir` invocations against the same account reuse one cache.
pub fn default_cache_path(server: &str, user: &str) -> PathBuf {
    let dir = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir).join("coldstore");
    let key = format!("{server}-{user}").replace(['/', ':'], "_");
    dir.join(format!("{key}.cache.db"))
}

#[derive(Debug, Clone)]
pub struct CachedFile {
    pub plaintext_name: String,
    pub file_id: i64,
    pub current_version_id: Option<i64>,
}

impl LocalCache {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                plaintext_name TEXT PRIMARY KEY,
                file_id INTEGER NOT NULL,
                current_version_id INTEGER
             );
             CREATE TABLE IF NOT EXISTS cache_state (
                key TEXT PRIMARY KEY,
                value TEXT
             );",
        )?;
        Ok(Self { conn })
    }

    pub fn known_revision(&self) -> anyhow::Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM cache_state WHERE key = 'revision'")?;
        match stmt.query_row([], |row| row.get::<_, String>(0)) {
            Ok(v) => Ok(v.parse().ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Invalidate and repopulate the cache when the server's observed
    /// revision has advanced past what we last saw.
    pub fn refresh(&self, revision: i64, files: &[CachedFile]) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM files", [])?;
        for f in files {
            self.conn.execute(
                "INSERT INTO files (plaintext_name, file_id, current_version_id) VALUES (?, ?, ?)",
                (&f.plaintext_name, f.file_id, f.current_version_id),
            )?;
        }
        self.conn.execute(
            "INSERT OR REPLACE INTO cache_state (key, value) VALUES ('revision', ?)",
            [revision.to_string()],
        )?;
        Ok(())
    }

    pub fn lookup(&self, plaintext_name: &str) -> anyhow::Result<Option<CachedFile>> {
        let mut stmt = self
            .conn
            .prepare("SELECT plaintext_name, file_id, current_version_id FROM files WHERE plaintext_name = ?")?;
        let result = stmt.query_row([plaintext_name], |row| {
            Ok(CachedFile {
                plaintext_name: row.get(0)?,
                file_id: row.get(1)?,
                current_version_id: row.get(2)?,
            })
        });
        match result {
            Ok(f) => Ok(Some(f)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_replaces_prior_contents_and_records_revision() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::open(&dir.path().join("cache.db")).unwrap();
        cache
            .refresh(
                3,
                &[CachedFile {
                    plaintext_name: "a.txt".into(),
                    file_id: 1,
                    current_version_id: Some(10),
                }],
            )
            .unwrap();
        assert_eq!(cache.known_revision().unwrap(), Some(3));
        let found = cache.lookup("a.txt").unwrap().unwrap();
        assert_eq!(found.file_id, 1);
        assert!(cache.lookup("missing.txt").unwrap().is_none());
    }
}
