//! Shared handle to the relational store.

use crate::error::Result;
use crate::schema;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Escape character used in every `LIKE ... ESCAPE` clause.
pub(crate) const LIKE_ESCAPE: char = '\\';

/// SQL function lowercasing text with full Unicode case mapping. The
/// built-in `lower()` and `LIKE` only fold ASCII letters.
pub(crate) const LOWER_FN: &str = "unicode_lower";

/// Cloneable handle to one SQLite connection. Every store holds a clone, so
/// all of them see the same data and serialize on the same lock.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Private in-memory database, used by tests and benches.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.create_scalar_function(
            LOWER_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )?;
        // ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch(schema::SCHEMA_SQL)?;
        tracing::info!(path = ?self.path, "membership schema ready");
        Ok(())
    }

    /// File backing this database, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Escape `LIKE` wildcards so `pattern` matches literally.
pub(crate) fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Escaped `LIKE` operand: `%p%` when `medial`, `p%` otherwise.
pub(crate) fn like_pattern(pattern: &str, medial: bool) -> String {
    let escaped = escape_like(pattern);
    if medial {
        format!("%{escaped}%")
    } else {
        format!("{escaped}%")
    }
}

/// `LIMIT`/`OFFSET` suffix; either bound may be absent. SQLite needs a
/// `LIMIT` before `OFFSET`, `-1` meaning unbounded.
pub(crate) fn page_clause(limit: Option<u32>, offset: Option<u32>) -> String {
    match (limit, offset) {
        (None, None) => String::new(),
        (Some(limit), None) => format!(" LIMIT {limit}"),
        (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
        (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_wildcards() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }

    #[test]
    fn like_pattern_modes() {
        assert_eq!(like_pattern("bob", true), "%bob%");
        assert_eq!(like_pattern("bob", false), "bob%");
        assert_eq!(like_pattern("", true), "%%");
    }

    #[test]
    fn page_clause_bounds() {
        assert_eq!(page_clause(None, None), "");
        assert_eq!(page_clause(Some(2), None), " LIMIT 2");
        assert_eq!(page_clause(Some(2), Some(4)), " LIMIT 2 OFFSET 4");
        assert_eq!(page_clause(None, Some(4)), " LIMIT -1 OFFSET 4");
    }

    #[test]
    fn schema_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hub.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO backend_groups (group_id, backend) VALUES ('g', 'test')",
                    [],
                )
                .unwrap();
        }
        // reopening must not recreate or wipe the tables
        let db = Database::open(&path).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM backend_groups", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn lower_function_folds_non_ascii() {
        let db = Database::open_in_memory().unwrap();
        let lowered: String = db
            .conn()
            .query_row("SELECT unicode_lower('ÉLODIE Über')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(lowered, "élodie über");
        let null: Option<String> = db
            .conn()
            .query_row("SELECT unicode_lower(NULL)", [], |row| row.get(0))
            .unwrap();
        assert!(null.is_none());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let enabled: i64 = db
            .conn()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
        let err = db
            .conn()
            .execute(
                "INSERT INTO memberships (backend_group_id, account_id, membership_type) VALUES (1, 1, 0)",
                [],
            )
            .unwrap_err();
        assert!(!crate::error::is_unique_violation(&err));
    }
}
