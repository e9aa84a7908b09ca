use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

use crate::dataset::{self, DatasetRow};

/// Where cumulative datasets live inside the object namespace.
pub const DATASET_PREFIX: &str = "datasets/";

pub fn dataset_key(name: &str) -> String {
    format!("{DATASET_PREFIX}{name}")
}

/// Object storage the analysis reads chat exports from and writes datasets to.
///
/// Every accessor degrades instead of failing: an unreachable backend looks
/// like an empty one, and writes report `false`.
pub trait Storage {
    /// `(display_name, handle)` for every `.txt` object under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Vec<(String, String)>;
    fn read(&self, handle: &str) -> Option<String>;
    fn write(&self, handle: &str, bytes: &[u8]) -> bool;
    fn ping(&self) -> bool;

    fn read_table(&self, name: &str) -> Option<Vec<DatasetRow>> {
        let content = self.read(&dataset_key(name))?;
        Some(dataset::decode_csv(&content))
    }

    fn write_table(&self, rows: &[DatasetRow], name: &str) -> bool {
        match dataset::encode_dataset(rows) {
            Ok(csv) => self.write(&dataset_key(name), csv.as_bytes()),
            Err(e) => {
                warn!(name = %name, error = %e, "Could not encode dataset");
                false
            }
        }
    }
}

/// Keep only chat exports and label them by file name.
fn export_listing(keys: impl IntoIterator<Item = String>) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = keys
        .into_iter()
        .filter(|k| k.ends_with(".txt") && !k.ends_with('/'))
        .map(|k| (k.rsplit('/').next().unwrap_or(&k).to_string(), k))
        .collect();
    files.sort();
    files
}

fn content_type(key: &str) -> &'static str {
    if key.ends_with(".csv") { "text/csv" } else { "text/plain" }
}

/// SQLite-backed object store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the object store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                key TEXT PRIMARY KEY,
                body BLOB NOT NULL,
                content_type TEXT NOT NULL DEFAULT 'text/plain',
                sha256 TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_objects_content_type ON objects(content_type)",
            [],
        )?;

        info!("Object store initialized");
        Ok(Self { conn })
    }

    /// Hex SHA-256 of an object body.
    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Insert or replace an object.
    pub fn put_object(&self, key: &str, bytes: &[u8]) -> SqliteResult<()> {
        let sha = Self::digest(bytes);
        self.conn.execute(
            "INSERT INTO objects (key, body, content_type, sha256)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                body = excluded.body,
                content_type = excluded.content_type,
                sha256 = excluded.sha256,
                updated_at = CURRENT_TIMESTAMP",
            params![key, bytes, content_type(key), sha],
        )?;
        info!(key = %key, bytes = bytes.len(), sha256 = %sha, "Object stored");
        Ok(())
    }

    pub fn get_object(&self, key: &str) -> SqliteResult<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT body FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn get_digest(&self, key: &str) -> SqliteResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT sha256 FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    /// Keys starting with `prefix`, in key order.
    pub fn list_keys(&self, prefix: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT key FROM objects
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let keys = stmt.query_map(params![prefix], |row| row.get(0))?;
        keys.collect()
    }

    /// Total objects and how many of them are datasets.
    pub fn get_counts(&self) -> SqliteResult<(usize, usize)> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        let datasets: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE content_type = 'text/csv'",
            [],
            |row| row.get(0),
        )?;
        Ok((total, datasets))
    }
}

impl Storage for SqliteStore {
    fn list(&self, prefix: &str) -> Vec<(String, String)> {
        match self.list_keys(prefix) {
            Ok(keys) => export_listing(keys),
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Listing failed");
                Vec::new()
            }
        }
    }

    fn read(&self, handle: &str) -> Option<String> {
        let bytes = match self.get_object(handle) {
            Ok(found) => found?,
            Err(e) => {
                warn!(key = %handle, error = %e, "Read failed");
                return None;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(key = %handle, error = %e, "Object is not UTF-8");
                None
            }
        }
    }

    fn write(&self, handle: &str, bytes: &[u8]) -> bool {
        match self.put_object(handle, bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %handle, error = %e, "Write failed");
                false
            }
        }
    }

    fn ping(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

/// Stand-in used when the backing store cannot be opened.
pub struct OfflineStore;

impl Storage for OfflineStore {
    fn list(&self, _prefix: &str) -> Vec<(String, String)> {
        Vec::new()
    }

    fn read(&self, _handle: &str) -> Option<String> {
        None
    }

    fn write(&self, handle: &str, _bytes: &[u8]) -> bool {
        warn!(key = %handle, "Storage offline; write dropped");
        false
    }

    fn ping(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub use memory::MemoryStore;


#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_digest_is_stable() {
        let a = SqliteStore::digest(b"hola");
        let b = SqliteStore::digest(b"hola");
        let c = SqliteStore::digest(b"adios");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_sqlite_roundtrip_and_overwrite() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.ping());
        assert!(store.write("pedidos/ana.txt", "primero".as_bytes()));
        let first = store.get_digest("pedidos/ana.txt").unwrap();
        assert!(store.write("pedidos/ana.txt", "segundo".as_bytes()));
        assert_eq!(store.read("pedidos/ana.txt").as_deref(), Some("segundo"));
        assert_ne!(store.get_digest("pedidos/ana.txt").unwrap(), first);
        assert_eq!(store.read("pedidos/missing.txt"), None);
    }

    #[test]
    fn test_list_only_chat_exports() {
        let store = SqliteStore::in_memory().unwrap();
        for key in ["pedidos/beto.txt", "pedidos/ana.txt", "pedidos/notes.md", "otros/carla.txt"] {
            store.write(key, b"x");
        }
        assert_eq!(
            store.list("pedidos/"),
            vec![
                ("ana.txt".to_string(), "pedidos/ana.txt".to_string()),
                ("beto.txt".to_string(), "pedidos/beto.txt".to_string()),
            ]
        );
    }

    #[test]
    fn test_table_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.read_table("dataset_global.csv"), None);
        let rows = vec![DatasetRow {
            date: Some(date!(2024 - 01 - 01)),
            establishment: "Kfc".into(),
            product: "Pollo".into(),
            shipping_fee: 40,
            courier: "Ana".into(),
        }];
        assert!(store.write_table(&rows, "dataset_global.csv"));
        assert_eq!(store.read_table("dataset_global.csv"), Some(rows));
        assert_eq!(store.get_counts().unwrap(), (1, 1));
    }

    #[test]
    fn test_offline_store_degrades() {
        let store = OfflineStore;
        assert!(!store.ping());
        assert!(store.list("pedidos/").is_empty());
        assert_eq!(store.read("pedidos/ana.txt"), None);
        assert_eq!(store.read_table("dataset_global.csv"), None);
        assert!(!store.write_table(&[], "dataset_global.csv"));
    }
}
