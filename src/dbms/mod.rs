// ABOUTME: Backend-neutral database access layer for PostgreSQL and SQLite
// ABOUTME: Parses colon-delimited connection specs and dispatches queries to the right backend

pub mod bulk;
pub mod postgres;
pub mod sqlite;
pub mod value;

pub use bulk::BulkInserter;
pub use postgres::PostgresDbms;
pub use sqlite::SqliteDbms;
pub use value::{Row, Value};

use crate::error::UsageError;
use anyhow::{Context, Result};
use dialoguer::Password;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lazily produced, single-pass sequence of rows
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Database engines a connection spec can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "postgres" => Some(Backend::Postgres),
            "sqlite" => Some(Backend::Sqlite),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }

    /// Connection params the backend accepts
    fn param_names(&self) -> &'static [&'static str] {
        match self {
            Backend::Postgres => &["database", "host", "password", "port", "user"],
            Backend::Sqlite => &["filename", "write"],
        }
    }

    /// Checks a param value parses as the type the backend expects
    fn check_param(&self, name: &str, value: &str) -> Result<(), String> {
        match (self, name) {
            (Backend::Postgres, "port") => value
                .parse::<u16>()
                .map(|_| ())
                .map_err(|e| e.to_string()),
            (Backend::Sqlite, "write") => parse_bool(value).map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interpret a user-supplied string of various common forms as a boolean
///
/// Only the first character matters: `y`, `t` or `1` mean true and `n`, `f`
/// or `0` mean false, in either case.
///
/// # Examples
///
/// ```
/// # use sql_utils::dbms::parse_bool;
/// assert_eq!(parse_bool("Yes"), Ok(true));
/// assert_eq!(parse_bool("false"), Ok(false));
/// assert!(parse_bool("maybe").is_err());
/// ```
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('y') | Some('t') | Some('1') => Ok(true),
        Some('n') | Some('f') | Some('0') => Ok(false),
        _ => Err(format!("invalid bool value {:?}", s)),
    }
}

/// A parsed `backend:name=value:...` connection descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    backend: Backend,
    params: BTreeMap<String, String>,
}

impl ConnectionSpec {
    /// Parse a colon-separated connection spec
    ///
    /// The item before the first colon names the backend; every following
    /// item takes the form `name=value`. `doing_what` is appended to error
    /// messages to say which connection was being described (for example
    /// "for source").
    ///
    /// # Errors
    ///
    /// Returns a [`UsageError`] if the backend is missing or unknown, an item
    /// lacks `=`, a param is not recognized for the backend, or a typed param
    /// does not parse. `create` is never accepted: every tool works on tables
    /// that already exist.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sql_utils::dbms::{Backend, ConnectionSpec};
    /// let spec = ConnectionSpec::parse("sqlite:filename=/tmp/app.db:write=no", "").unwrap();
    /// assert_eq!(spec.backend(), Backend::Sqlite);
    /// assert_eq!(spec.param("filename"), Some("/tmp/app.db"));
    ///
    /// assert!(ConnectionSpec::parse("oracle:host=db", "").is_err());
    /// ```
    pub fn parse(spec: &str, doing_what: &str) -> Result<Self, UsageError> {
        let mut items = spec.split(':');
        let dbms = items.next().unwrap_or_default();
        if dbms.is_empty() {
            return Err(UsageError::MissingDbms {
                doing_what: doing_what.to_string(),
            });
        }
        let backend = Backend::from_name(dbms).ok_or_else(|| UsageError::UnknownDbms {
            dbms: dbms.to_string(),
            doing_what: doing_what.to_string(),
        })?;

        let mut params = BTreeMap::new();
        let mut unrecognized = Vec::new();
        for item in items {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| UsageError::MalformedParam {
                    param: item.to_string(),
                    doing_what: doing_what.to_string(),
                })?;
            if !backend.param_names().contains(&name) {
                unrecognized.push(name.to_string());
                continue;
            }
            backend
                .check_param(name, value)
                .map_err(|reason| UsageError::InvalidParamValue {
                    dbms: dbms.to_string(),
                    name: name.to_string(),
                    value: value.to_string(),
                    reason,
                })?;
            params.insert(name.to_string(), value.to_string());
        }

        if !unrecognized.is_empty() {
            unrecognized.sort();
            unrecognized.dedup();
            return Err(UsageError::UnknownParams {
                dbms: dbms.to_string(),
                params: unrecognized.join(","),
                doing_what: doing_what.to_string(),
            });
        }

        if backend == Backend::Sqlite && !params.contains_key("filename") {
            return Err(UsageError::MissingParam {
                dbms: dbms.to_string(),
                name: "filename".to_string(),
                doing_what: doing_what.to_string(),
            });
        }

        Ok(Self { backend, params })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// True when a password was given explicitly empty, asking for a prompt
    pub fn wants_password_prompt(&self) -> bool {
        self.param("password") == Some("")
    }

    /// Replace an empty `password` param with one typed at the terminal
    ///
    /// Call once per spec: commands open several connections from the same
    /// spec and the user should only be asked once.
    pub fn prompt_for_password(mut self) -> Result<Self> {
        if !self.wants_password_prompt() {
            return Ok(self);
        }
        let prompt = match self.param("database") {
            Some(database) => format!("{} password for {}", self.backend, database),
            None => format!("{} password", self.backend),
        };
        let password = Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .context("Failed to read password")?;
        self.params.insert("password".to_string(), password);
        Ok(self)
    }

    /// Open a new connection described by this spec
    pub async fn connect(&self) -> Result<Dbms> {
        match self.backend {
            Backend::Postgres => {
                let mut config = tokio_postgres::Config::new();
                if let Some(host) = self.param("host") {
                    config.host(host);
                } else {
                    config.host("localhost");
                }
                if let Some(port) = self.param("port") {
                    config.port(port.parse().context("Invalid port")?);
                }
                if let Some(user) = self.param("user") {
                    config.user(user);
                }
                if let Some(password) = self.param("password") {
                    config.password(password);
                }
                if let Some(database) = self.param("database") {
                    config.dbname(database);
                }
                let dbms = postgres::connect_with_retry(&config).await?;
                Ok(Dbms::Postgres(dbms))
            }
            Backend::Sqlite => {
                let filename = self
                    .param("filename")
                    .context("sqlite connection spec has no filename")?;
                let write = match self.param("write") {
                    Some(value) => parse_bool(value).map_err(anyhow::Error::msg)?,
                    None => true,
                };
                let dbms = SqliteDbms::open(PathBuf::from(filename), write)?;
                Ok(Dbms::Sqlite(dbms))
            }
        }
    }
}

/// Definition of one table column, in ordinal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// Position within the primary key, starting at 1
    pub primary_key_seq: Option<u32>,
}

/// A secondary (non-primary) index of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub name: String,
    pub unique: bool,
    /// Indexed fields in key order
    pub fields: Vec<String>,
}

/// A live connection to one of the supported backends
pub enum Dbms {
    Postgres(PostgresDbms),
    Sqlite(SqliteDbms),
}

impl Dbms {
    pub fn backend(&self) -> Backend {
        match self {
            Dbms::Postgres(_) => Backend::Postgres,
            Dbms::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// The database file when connected to SQLite
    pub fn sqlite_path(&self) -> Option<&Path> {
        match self {
            Dbms::Sqlite(db) => Some(db.path()),
            Dbms::Postgres(_) => None,
        }
    }

    /// True when both connections point at the same SQLite file
    ///
    /// A reader and a writer on separate connections to one file would lock
    /// each other out, so such copies must stay on a single connection.
    pub fn shares_file_with(&self, other: &Dbms) -> bool {
        match (self.sqlite_path(), other.sqlite_path()) {
            (Some(a), Some(b)) => match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => a == b,
            },
            _ => false,
        }
    }

    /// Names of the user tables in the database
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        match self {
            Dbms::Postgres(db) => db.list_tables().await,
            Dbms::Sqlite(db) => db.list_tables(),
        }
    }

    /// Column definitions of a single table
    pub async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let columns = match self {
            Dbms::Postgres(db) => db.list_columns(table).await?,
            Dbms::Sqlite(db) => db.list_columns(table)?,
        };
        if columns.is_empty() {
            anyhow::bail!("Table {} not found or has no columns", table);
        }
        Ok(columns)
    }

    /// Indexes of a single table other than its primary key, ordered by name
    pub async fn list_keys(&self, table: &str) -> Result<Vec<KeyInfo>> {
        match self {
            Dbms::Postgres(db) => db.list_keys(table).await,
            Dbms::Sqlite(db) => db.list_keys(table),
        }
    }

    /// Column names of a single table
    pub async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .list_columns(table)
            .await?
            .into_iter()
            .map(|column| column.name)
            .collect())
    }

    /// Run a query, yielding its rows one at a time
    ///
    /// The stream is forward-only and cannot be restarted. Only one stream
    /// should be open per connection; open another connection for a second
    /// concurrent stream.
    pub fn query(&self, sql: &str) -> RowStream<'_> {
        tracing::debug!("Query: {}", sql);
        match self {
            Dbms::Postgres(db) => db.query(sql),
            Dbms::Sqlite(db) => db.query(sql),
        }
    }

    /// Execute a statement, returning the number of affected rows
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        match self {
            Dbms::Postgres(db) => db.execute(sql).await,
            Dbms::Sqlite(db) => db.execute(sql),
        }
    }

    /// Render a value as an SQL literal for this backend
    ///
    /// Needed where values are spliced into statement text, such as the
    /// multi-row inserts built by [`BulkInserter`].
    pub fn quote(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) if f.is_finite() => format!("{:?}", f),
            Value::Real(f) => quote_text(&f.to_string()),
            Value::Text(s) => quote_text(s),
            Value::Blob(bytes) => match self.backend() {
                Backend::Sqlite => format!("X'{}'", hex::encode_upper(bytes)),
                Backend::Postgres => format!("'\\x{}'::bytea", hex::encode(bytes)),
            },
        }
    }

    /// Build a multi-row insert of already quoted records
    pub fn insert_statement(
        &self,
        table: &str,
        fields: &[String],
        records: &[Vec<String>],
        ignore_duplicates: bool,
    ) -> String {
        let values = records
            .iter()
            .map(|record| format!("({})", record.join(", ")))
            .collect::<Vec<_>>()
            .join(", ");
        self.insert_select_statement(
            table,
            fields,
            &format!("VALUES {}", values),
            ignore_duplicates,
        )
    }

    /// Build an `INSERT INTO table (fields) <source>`
    ///
    /// `source` is a `SELECT` or `VALUES` list producing rows in field order.
    pub fn insert_select_statement(
        &self,
        table: &str,
        fields: &[String],
        source: &str,
        ignore_duplicates: bool,
    ) -> String {
        let verb = match (self.backend(), ignore_duplicates) {
            (Backend::Sqlite, true) => "INSERT OR IGNORE",
            _ => "INSERT",
        };
        let mut sql = format!("{} INTO {} ({}) {}", verb, table, fields.join(", "), source);
        if ignore_duplicates && self.backend() == Backend::Postgres {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        sql
    }
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_postgres_spec() {
        let spec = ConnectionSpec::parse(
            "postgres:host=db.example.com:port=5433:user=admin:database=sales",
            "for source",
        )
        .unwrap();
        assert_eq!(spec.backend(), Backend::Postgres);
        assert_eq!(spec.param("host"), Some("db.example.com"));
        assert_eq!(spec.param("port"), Some("5433"));
        assert_eq!(spec.param("user"), Some("admin"));
        assert_eq!(spec.param("database"), Some("sales"));
        assert!(!spec.wants_password_prompt());
    }

    #[test]
    fn test_parse_keeps_equals_in_value() {
        let spec = ConnectionSpec::parse("postgres:password=a=b", "").unwrap();
        assert_eq!(spec.param("password"), Some("a=b"));
    }

    #[test]
    fn test_empty_password_asks_for_prompt() {
        let spec = ConnectionSpec::parse("postgres:user=admin:password=", "").unwrap();
        assert!(spec.wants_password_prompt());
    }

    #[test]
    fn test_parse_missing_dbms() {
        let err = ConnectionSpec::parse("", "for source").unwrap_err();
        assert_eq!(
            err,
            UsageError::MissingDbms {
                doing_what: "for source".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unknown_dbms() {
        let err = ConnectionSpec::parse("oracle:host=x", "for target").unwrap_err();
        assert_eq!(err.to_string(), "unrecognized DBMS \"oracle\" for target");
    }

    #[test]
    fn test_parse_reports_all_unknown_params_sorted() {
        let err = ConnectionSpec::parse("sqlite:filename=a.db:zoom=1:create=yes:alpha=2", "")
            .unwrap_err();
        assert_eq!(
            err,
            UsageError::UnknownParams {
                dbms: "sqlite".to_string(),
                params: "alpha,create,zoom".to_string(),
                doing_what: String::new(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_param_without_equals() {
        let err = ConnectionSpec::parse("postgres:localhost", "").unwrap_err();
        assert!(matches!(err, UsageError::MalformedParam { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_typed_values() {
        assert!(matches!(
            ConnectionSpec::parse("postgres:port=abc", "").unwrap_err(),
            UsageError::InvalidParamValue { .. }
        ));
        assert!(matches!(
            ConnectionSpec::parse("sqlite:filename=a.db:write=perhaps", "").unwrap_err(),
            UsageError::InvalidParamValue { .. }
        ));
    }

    #[test]
    fn test_sqlite_requires_filename() {
        let err = ConnectionSpec::parse("sqlite:write=no", "").unwrap_err();
        assert!(matches!(err, UsageError::MissingParam { .. }));
    }

    #[test]
    fn test_parse_bool() {
        for s in ["y", "Yes", "t", "TRUE", "1"] {
            assert_eq!(parse_bool(s), Ok(true), "{}", s);
        }
        for s in ["n", "No", "f", "False", "0"] {
            assert_eq!(parse_bool(s), Ok(false), "{}", s);
        }
        assert!(parse_bool("").is_err());
        assert!(parse_bool("x").is_err());
    }

    #[test]
    fn test_quote_text_doubles_single_quotes() {
        assert_eq!(quote_text("it's"), "'it''s'");
        assert_eq!(quote_text(""), "''");
    }
}
