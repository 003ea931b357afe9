// ABOUTME: PostgreSQL backend built on tokio-postgres
// ABOUTME: Handles TLS connection setup, catalog introspection, and cursor-based row streaming

use super::{ColumnInfo, KeyInfo, Row, RowStream, Value};
use crate::utils;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_postgres::{Client, Config, SimpleQueryMessage, SimpleQueryRow};

/// Rows requested from the server per FETCH
const FETCH_SIZE: usize = 1000;

static CURSOR_SEQ: AtomicU64 = AtomicU64::new(0);

/// An open PostgreSQL connection
pub struct PostgresDbms {
    client: Client,
}

/// Connect to PostgreSQL with TLS support
pub async fn connect(config: &Config) -> Result<PostgresDbms> {
    // Set up TLS connector; servers without TLS fall back to plaintext
    let tls_connector = TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls_connector);

    let (client, connection) = config.connect(tls).await.map_err(|e| {
        // Parse error and provide helpful context
        let error_msg = e.to_string();

        if error_msg.contains("password authentication failed") {
            anyhow::anyhow!(
                "Authentication failed: Invalid username or password.\n\
                 Please verify your database credentials."
            )
        } else if error_msg.contains("database") && error_msg.contains("does not exist") {
            anyhow::anyhow!(
                "Database does not exist: {}\n\
                 Please check the database param of the connection spec.",
                error_msg
            )
        } else if error_msg.contains("Connection refused")
            || error_msg.contains("could not connect")
        {
            anyhow::anyhow!(
                "Connection refused: Unable to reach database server.\n\
                 Please check:\n\
                 - The host and port are correct\n\
                 - The database server is running\n\
                 - Firewall rules allow connections\n\
                 Error: {}",
                error_msg
            )
        } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
            anyhow::anyhow!(
                "Connection timeout: Database server did not respond in time.\n\
                 Error: {}",
                error_msg
            )
        } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
            anyhow::anyhow!(
                "TLS/SSL error: Failed to establish secure connection.\n\
                 Error: {}",
                error_msg
            )
        } else {
            anyhow::anyhow!("Failed to connect to database: {}", error_msg)
        }
    })?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(PostgresDbms { client })
}

/// Connect with automatic retry for transient failures
pub async fn connect_with_retry(config: &Config) -> Result<PostgresDbms> {
    utils::retry_with_backoff(
        || connect(config),
        3,                      // Max 3 retries
        Duration::from_secs(1), // Start with 1 second delay
    )
    .await
    .context("Failed to connect after retries")
}

impl PostgresDbms {
    /// List all non-system tables
    ///
    /// Tables in `public` are named bare, others as `schema.table`.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT schemaname, tablename
                 FROM pg_catalog.pg_tables
                 WHERE schemaname NOT IN ('pg_catalog', 'information_schema')
                 ORDER BY schemaname, tablename",
                &[],
            )
            .await
            .context("Failed to list tables")?;

        let tables = rows
            .iter()
            .map(|row| {
                let schema: String = row.get(0);
                let name: String = row.get(1);
                if schema == "public" {
                    name
                } else {
                    format!("{}.{}", schema, name)
                }
            })
            .collect();

        Ok(tables)
    }

    /// Column definitions of `table`, optionally written `schema.table`
    pub async fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let (schema, name) = self.split_table(table).await?;

        let column_rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable = 'NO', column_default::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &name],
            )
            .await
            .with_context(|| format!("Failed to get columns for {}.{}", schema, name))?;

        let key_rows = self
            .client
            .query(
                "SELECT k.column_name::text, k.ordinal_position::int
                 FROM information_schema.table_constraints c
                 JOIN information_schema.key_column_usage k
                   ON k.constraint_schema = c.constraint_schema
                  AND k.constraint_name = c.constraint_name
                 WHERE c.constraint_type = 'PRIMARY KEY'
                   AND c.table_schema = $1 AND c.table_name = $2",
                &[&schema, &name],
            )
            .await
            .with_context(|| format!("Failed to get primary key for {}.{}", schema, name))?;

        let key_positions: Vec<(String, i32)> =
            key_rows.iter().map(|row| (row.get(0), row.get(1))).collect();

        let columns = column_rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let primary_key_seq = key_positions
                    .iter()
                    .find(|(key_column, _)| *key_column == name)
                    .map(|(_, seq)| *seq as u32);
                ColumnInfo {
                    name,
                    data_type: row.get(1),
                    not_null: row.get(2),
                    default: row.get(3),
                    primary_key_seq,
                }
            })
            .collect();

        Ok(columns)
    }

    /// Non-primary indexes of `table`, with their columns in key order
    ///
    /// Expression columns of an index are left out.
    pub async fn list_keys(&self, table: &str) -> Result<Vec<KeyInfo>> {
        let (schema, name) = self.split_table(table).await?;
        let rows = self
            .client
            .query(
                "SELECT i.relname::text, ix.indisunique,
                        ARRAY(SELECT a.attname::text
                              FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                              JOIN pg_attribute a
                                ON a.attrelid = ix.indrelid AND a.attnum = k.attnum
                              ORDER BY k.ord)
                 FROM pg_index ix
                 JOIN pg_class i ON i.oid = ix.indexrelid
                 JOIN pg_class t ON t.oid = ix.indrelid
                 JOIN pg_namespace n ON n.oid = t.relnamespace
                 WHERE n.nspname::text = $1 AND t.relname::text = $2
                   AND NOT ix.indisprimary
                 ORDER BY i.relname",
                &[&schema, &name],
            )
            .await
            .with_context(|| format!("Failed to get keys for {}.{}", schema, name))?;

        Ok(rows
            .iter()
            .map(|row| KeyInfo {
                name: row.get(0),
                unique: row.get(1),
                fields: row.get(2),
            })
            .collect())
    }

    /// Split `schema.table`, defaulting to the current schema
    async fn split_table(&self, table: &str) -> Result<(String, String)> {
        match table.split_once('.') {
            Some((schema, name)) => Ok((schema.to_string(), name.to_string())),
            None => {
                let row = self
                    .client
                    .query_one("SELECT current_schema()::text", &[])
                    .await
                    .context("Failed to query current schema")?;
                Ok((row.get(0), table.to_string()))
            }
        }
    }

    /// Stream the rows of `sql` through a server-side cursor
    ///
    /// Rows are fetched `FETCH_SIZE` at a time over the simple query protocol,
    /// so every value arrives in PostgreSQL's own text form. The cursor lives in
    /// a read-only transaction that is committed once the rows run out, so the
    /// connection must not be used for anything else until then.
    pub fn query(&self, sql: &str) -> RowStream<'_> {
        let cursor = format!(
            "sql_utils_cursor_{}",
            CURSOR_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let state = CursorState {
            client: &self.client,
            declare: Some(format!(
                "BEGIN READ ONLY; DECLARE {} NO SCROLL CURSOR FOR {}",
                cursor, sql
            )),
            cursor,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(state, CursorState::next_row).boxed()
    }

    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.client
            .execute(sql, &[])
            .await
            .context("Failed to execute statement")
    }
}

struct CursorState<'a> {
    client: &'a Client,
    cursor: String,
    declare: Option<String>,
    buffered: VecDeque<Row>,
    exhausted: bool,
}

impl<'a> CursorState<'a> {
    async fn next_row(mut self) -> Result<Option<(Row, CursorState<'a>)>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some((row, self)));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch().await?;
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        if let Some(declare) = self.declare.take() {
            self.client
                .batch_execute(&declare)
                .await
                .context("Failed to open query cursor")?;
        }

        let messages = self
            .client
            .simple_query(&format!("FETCH FORWARD {} FROM {}", FETCH_SIZE, self.cursor))
            .await
            .context("Failed to fetch rows")?;

        let mut fetched = 0;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                self.buffered.push_back(text_row(&row));
                fetched += 1;
            }
        }
        tracing::trace!("Fetched {} rows from {}", fetched, self.cursor);

        if fetched < FETCH_SIZE {
            self.exhausted = true;
            self.client
                .batch_execute(&format!("CLOSE {}; COMMIT", self.cursor))
                .await
                .context("Failed to close query cursor")?;
        }
        Ok(())
    }
}

fn text_row(row: &SimpleQueryRow) -> Row {
    (0..row.len()).map(|i| Value::from(row.get(i))).collect()
}
