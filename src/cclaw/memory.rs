//! Durable keyed memory with vector similarity search.
//!
//! Backed by a single SQLite table.  Values are plain text; each row may
//! additionally carry an embedding stored as little-endian `f32` bytes, which
//! makes the store searchable by cosine similarity.  Search is a full scan —
//! linear in stored rows and fine up to ~10⁵ entries at typical embedding
//! dimensions; an index is out of scope.
//!
//! All operations degrade instead of failing: storage errors are logged and
//! surface as `false`/`None`/empty results, matching the runtime's policy
//! that nothing after startup tears the process down.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

/// A row returned by [`Memory::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub key: String,
    pub value: String,
    pub score: f32,
}

/// Durable key-value store with optional embeddings.
///
/// The inner connection is mutex-guarded; SQLite serializes writers anyway
/// and every caller shares one handle.
pub struct Memory {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memory (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    embedding  BLOB,
    embed_dim  INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);";

impl Memory {
    /// Open (or create) the backing database and ensure the table exists.
    pub fn open(path: &Path) -> Result<Memory, Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Memory::from_connection(Connection::open(path)?)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Memory, Box<dyn std::error::Error>> {
        Memory::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Memory, Box<dyn std::error::Error>> {
        conn.execute_batch(SCHEMA)?;
        Ok(Memory {
            conn: Mutex::new(conn),
        })
    }

    /// Upsert a value and its optional embedding.
    ///
    /// Re-storing an existing key replaces value and embedding atomically and
    /// bumps `updated_at`; `created_at` is preserved.
    pub fn store(&self, key: &str, value: &str, embedding: Option<&[f32]>) -> bool {
        let now = chrono::Utc::now().to_rfc3339();
        let (blob, dim) = match embedding {
            Some(vector) => (Some(vector_to_bytes(vector)), vector.len() as i64),
            None => (None, 0),
        };
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = conn.execute(
            "INSERT INTO memory (key, value, embedding, embed_dim, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                embedding = excluded.embedding,
                embed_dim = excluded.embed_dim,
                updated_at = excluded.updated_at",
            params![key, value, blob, dim, now],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                log::error!("memory: store {} failed: {}", key, e);
                false
            }
        }
    }

    /// Exact key lookup.
    pub fn get(&self, key: &str) -> Option<String> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = conn
            .query_row(
                "SELECT value FROM memory WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional();
        match result {
            Ok(value) => value,
            Err(e) => {
                log::error!("memory: get {} failed: {}", key, e);
                None
            }
        }
    }

    /// Remove a key.  Returns `true` when a row was deleted.
    pub fn delete(&self, key: &str) -> bool {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        match conn.execute("DELETE FROM memory WHERE key = ?1", params![key]) {
            Ok(rows) => rows > 0,
            Err(e) => {
                log::error!("memory: delete {} failed: {}", key, e);
                false
            }
        }
    }

    /// Top-k rows by cosine similarity against `query`.
    ///
    /// Only rows whose stored dimension matches `query.len()` and whose blob
    /// has the expected byte length participate.  Ties keep first-seen order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<SearchHit> {
        if query.is_empty() || top_k == 0 {
            return Vec::new();
        }
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut stmt = match conn.prepare(
            "SELECT key, value, embedding FROM memory WHERE embed_dim = ?1 ORDER BY rowid",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                log::error!("memory: search prepare failed: {}", e);
                return Vec::new();
            }
        };

        let rows = stmt.query_map(params![query.len() as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
            ))
        });
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("memory: search failed: {}", e);
                return Vec::new();
            }
        };

        let mut hits: Vec<SearchHit> = Vec::new();
        for row in rows.flatten() {
            let (key, value, blob) = row;
            let Some(blob) = blob else { continue };
            if blob.len() != query.len() * std::mem::size_of::<f32>() {
                continue;
            }
            let stored = bytes_to_vector(&blob);
            hits.push(SearchHit {
                key,
                value,
                score: cosine_sim(query, &stored),
            });
        }

        // Stable sort keeps first-seen order among equal scores.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}

/// Cosine similarity; `0.0` when either vector has zero norm.
pub fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identities() {
        let v = [0.3f32, -1.2, 4.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_sim(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_sim(&v, &neg) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_sim(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn store_get_delete_round_trip() {
        let memory = Memory::open_in_memory().unwrap();
        assert!(memory.store("greeting", "hello", None));
        assert_eq!(memory.get("greeting").as_deref(), Some("hello"));
        assert!(memory.store("greeting", "hi again", None));
        assert_eq!(memory.get("greeting").as_deref(), Some("hi again"));
        assert!(memory.delete("greeting"));
        assert!(!memory.delete("greeting"));
        assert_eq!(memory.get("greeting"), None);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let memory = Memory::open_in_memory().unwrap();
        memory.store("e1", "one", Some(&[1.0, 0.0, 0.0]));
        memory.store("e2", "two", Some(&[0.0, 1.0, 0.0]));
        memory.store("e3", "three", Some(&[1.0, 1.0, 0.0]));

        let hits = memory.search(&[1.0, 0.1, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "e1");
        assert!((hits[0].score - 0.995).abs() < 0.005);
        assert_eq!(hits[1].key, "e3");
        assert!((hits[1].score - 0.778).abs() < 0.005);
    }

    #[test]
    fn search_skips_mismatched_dimensions() {
        let memory = Memory::open_in_memory().unwrap();
        memory.store("short", "2d", Some(&[1.0, 0.0]));
        memory.store("plain", "no embedding", None);
        memory.store("full", "3d", Some(&[1.0, 0.0, 0.0]));

        let hits = memory.search(&[1.0, 0.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "full");
    }
}
