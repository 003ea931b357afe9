// ABOUTME: SQLite backend built on rusqlite
// ABOUTME: Streams query rows from a blocking thread through a bounded channel

use super::{ColumnInfo, KeyInfo, Row, RowStream, Value};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Rows buffered between the reader thread and the consumer
const ROW_CHANNEL_CAPACITY: usize = 256;

/// An open SQLite database file
///
/// Statements and catalog lookups share one connection. Each query stream
/// opens its own read-only connection on a blocking thread, so two streams
/// over the same file can be consumed side by side.
pub struct SqliteDbms {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteDbms {
    /// Open an existing database file, read-write unless `write` is false
    pub fn open(path: PathBuf, write: bool) -> Result<Self> {
        let mode = if write {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        };
        let flags = mode | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;

        let conn = Connection::open_with_flags(&path, flags)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        tracing::debug!("Opened SQLite database {} (write={})", path.display(), write);

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .context("Failed to list tables")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list tables")?;
        Ok(names)
    }

    pub fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
            )
            .with_context(|| format!("Failed to get columns for {}", table))?;
        let columns = stmt
            .query_map([table], |row| {
                let pk: u32 = row.get(4)?;
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    not_null: row.get(2)?,
                    default: row.get(3)?,
                    primary_key_seq: (pk != 0).then_some(pk),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to get columns for {}", table))?;
        Ok(columns)
    }

    pub fn list_keys(&self, table: &str) -> Result<Vec<KeyInfo>> {
        let conn = self.lock_conn()?;
        let mut index_stmt = conn
            .prepare(
                "SELECT name, \"unique\" FROM pragma_index_list(?1)
                 WHERE origin != 'pk' ORDER BY name",
            )
            .with_context(|| format!("Failed to get keys for {}", table))?;
        let indexes = index_stmt
            .query_map([table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to get keys for {}", table))?;

        let mut field_stmt =
            conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
        let mut keys = Vec::with_capacity(indexes.len());
        for (name, unique) in indexes {
            // Expression columns have no name
            let fields = field_stmt
                .query_map([&name], |row| row.get::<_, Option<String>>(0))?
                .map(|field| field.map(|f| f.unwrap_or_else(|| "<expression>".to_string())))
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("Failed to get fields of key {}", name))?;
            keys.push(KeyInfo {
                name,
                unique,
                fields,
            });
        }
        Ok(keys)
    }

    pub fn query(&self, sql: &str) -> RowStream<'_> {
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let path = self.path.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = send_rows(&path, &sql, &tx) {
                // Receiver may already be gone; nothing left to report to
                let _ = tx.blocking_send(Err(e));
            }
        });

        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    pub fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.lock_conn()?;
        let changed = conn
            .execute(sql, [])
            .context("Failed to execute statement")?;
        Ok(changed as u64)
    }
}

/// Run `sql` on a private read-only connection, sending each row to `tx`
///
/// Stops early without error when the receiving stream has been dropped.
fn send_rows(path: &Path, sql: &str, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )
    .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;

    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Failed to prepare query: {}", sql))?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query([]).context("Failed to run query")?;

    let mut sent = 0u64;
    while let Some(row) = rows.next().context("Failed to read row")? {
        let values = (0..column_count)
            .map(|i| row.get_ref(i).map(Value::from))
            .collect::<rusqlite::Result<Row>>()?;
        if tx.blocking_send(Ok(values)).is_err() {
            tracing::debug!("Row stream dropped after {} rows", sent);
            return Ok(());
        }
        sent += 1;
    }
    tracing::trace!("Streamed {} rows from {}", sent, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbms::Dbms;
    use futures::TryStreamExt;
    use tempfile::NamedTempFile;

    fn scratch_db(setup: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(setup).unwrap();
        file
    }

    #[test]
    fn test_list_tables_and_columns() {
        let file = scratch_db(
            "CREATE TABLE people (
                 id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER DEFAULT 0
             );
             CREATE TABLE pets (owner INTEGER, name TEXT, PRIMARY KEY (owner, name));",
        );
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();

        assert_eq!(db.list_tables().unwrap(), ["people", "pets"]);

        let columns = db.list_columns("people").unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].data_type, "INTEGER");
        assert_eq!(columns[0].primary_key_seq, Some(1));
        assert!(columns[1].not_null);
        assert_eq!(columns[2].default.as_deref(), Some("0"));

        let pets = db.list_columns("pets").unwrap();
        assert_eq!(pets[0].primary_key_seq, Some(1));
        assert_eq!(pets[1].primary_key_seq, Some(2));
    }

    #[test]
    fn test_list_keys_skips_primary_key() {
        let file = scratch_db(
            "CREATE TABLE people (id TEXT PRIMARY KEY, email TEXT UNIQUE, last TEXT, first TEXT);
             CREATE INDEX people_name ON people (last, first);
             CREATE INDEX people_lower ON people (lower(email));",
        );
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();

        let keys = db.list_keys("people").unwrap();
        let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["people_lower", "people_name", "sqlite_autoindex_people_2"]);

        assert_eq!(keys[0].fields, ["<expression>"]);
        assert!(!keys[1].unique);
        assert_eq!(keys[1].fields, ["last", "first"]);
        assert!(keys[2].unique);
        assert_eq!(keys[2].fields, ["email"]);
    }

    #[test]
    fn test_missing_table_has_no_columns() {
        let file = scratch_db("CREATE TABLE t (a);");
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();
        assert!(db.list_columns("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SqliteDbms::open(dir.path().join("absent.db"), true);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_streams_all_storage_classes() {
        let file = scratch_db(
            "CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB, n);
             INSERT INTO t VALUES (1, 1.5, 'one', X'0102', NULL);",
        );
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();

        let rows: Vec<Row> = db.query("SELECT * FROM t").try_collect().await.unwrap();
        assert_eq!(
            rows,
            vec![vec![
                Value::Integer(1),
                Value::Real(1.5),
                Value::Text("one".to_string()),
                Value::Blob(vec![1, 2]),
                Value::Null,
            ]]
        );
    }

    #[tokio::test]
    async fn test_query_more_rows_than_channel_capacity() {
        let file = scratch_db(
            "CREATE TABLE n (v INTEGER);
             WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000)
             INSERT INTO n SELECT x FROM c;",
        );
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();

        let rows: Vec<Row> = db
            .query("SELECT v FROM n ORDER BY v")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1000);
        assert_eq!(rows[999], vec![Value::Integer(1000)]);
    }

    #[tokio::test]
    async fn test_query_error_surfaces_in_stream() {
        let file = scratch_db("CREATE TABLE t (a);");
        let db = SqliteDbms::open(file.path().to_path_buf(), false).unwrap();

        let result: Result<Vec<Row>> = db.query("SELECT nope FROM t").try_collect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_quoted_values_round_trip() {
        let file = scratch_db("CREATE TABLE t (i, r, s, b, n);");
        let db = Dbms::Sqlite(SqliteDbms::open(file.path().to_path_buf(), true).unwrap());

        let values = vec![
            Value::Integer(-3),
            Value::Real(0.25),
            Value::Text("it's \"quoted\"".to_string()),
            Value::Blob(vec![0, 255, 16]),
            Value::Null,
        ];
        let quoted: Vec<String> = values.iter().map(|v| db.quote(v)).collect();
        let fields: Vec<String> = ["i", "r", "s", "b", "n"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let sql = db.insert_statement("t", &fields, &[quoted], false);
        assert_eq!(db.execute(&sql).await.unwrap(), 1);

        let rows: Vec<Row> = db.query("SELECT * FROM t").try_collect().await.unwrap();
        assert_eq!(rows, vec![values]);
    }

    #[test]
    fn test_shares_file_with() {
        let file = scratch_db("CREATE TABLE t (a);");
        let other = scratch_db("CREATE TABLE t (a);");
        let open = |path: PathBuf| Dbms::Sqlite(SqliteDbms::open(path, true).unwrap());

        let dir = file.path().parent().unwrap();
        let name = file.path().file_name().unwrap();
        let first = open(file.path().to_path_buf());
        let same = open(dir.join(".").join(name));
        let different = open(other.path().to_path_buf());

        assert!(first.shares_file_with(&same));
        assert!(!first.shares_file_with(&different));
    }

    #[tokio::test]
    async fn test_insert_select_copies_in_one_statement() {
        let file = scratch_db(
            "CREATE TABLE src (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE dst (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO src VALUES (1, 'a'), (2, 'b'), (3, 'c');
             INSERT INTO dst VALUES (2, 'old');",
        );
        let db = Dbms::Sqlite(SqliteDbms::open(file.path().to_path_buf(), true).unwrap());
        let fields = vec!["id".to_string(), "name".to_string()];

        let sql = db.insert_select_statement("dst", &fields, "SELECT id, name FROM src", true);
        assert_eq!(
            sql,
            "INSERT OR IGNORE INTO dst (id, name) SELECT id, name FROM src"
        );
        assert_eq!(db.execute(&sql).await.unwrap(), 2);
    }
}
