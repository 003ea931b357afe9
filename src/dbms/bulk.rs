// ABOUTME: Batched multi-row inserts into a destination table
// ABOUTME: Buffers quoted records and flushes them as single INSERT statements

use super::{Dbms, Value};
use anyhow::{bail, Context, Result};

/// Default number of records per INSERT; SQLite builds older than 3.8.8
/// refuse more VALUES rows than this in one statement
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Bulk insertion of many records into one table
///
/// Records are quoted as they are added and written out `batch_size` at a time.
/// Call [`BulkInserter::finish`] after the last record to flush the tail.
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use sql_utils::dbms::{BulkInserter, ConnectionSpec, Value};
/// # async fn example() -> Result<()> {
/// let spec = ConnectionSpec::parse("sqlite:filename=app.db", "for target")?;
/// let dbms = spec.connect().await?;
/// let mut inserter = BulkInserter::new(&dbms, "people", vec!["id".into(), "name".into()], false);
/// inserter.add_record(vec![Value::Integer(1), Value::Text("Ann".into())]).await?;
/// let inserted = inserter.finish().await?;
/// # Ok(())
/// # }
/// ```
pub struct BulkInserter<'a> {
    dbms: &'a Dbms,
    table: String,
    fields: Vec<String>,
    ignore_duplicates: bool,
    batch_size: usize,
    pending: Vec<Vec<String>>,
    added: u64,
}

impl<'a> BulkInserter<'a> {
    /// Create an inserter for `fields` of `table`
    ///
    /// With `ignore_duplicates`, rows violating a unique constraint are
    /// silently dropped instead of failing the statement.
    pub fn new(dbms: &'a Dbms, table: &str, fields: Vec<String>, ignore_duplicates: bool) -> Self {
        Self {
            dbms,
            table: table.to_string(),
            fields,
            ignore_duplicates,
            batch_size: DEFAULT_BATCH_SIZE,
            pending: Vec::new(),
            added: 0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Add one record, its values in the same order as the field list
    pub async fn add_record(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.fields.len() {
            bail!(
                "Record has {} values but {} fields were named for {}",
                values.len(),
                self.fields.len(),
                self.table
            );
        }
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        let quoted = values.iter().map(|value| self.dbms.quote(value)).collect();
        self.pending.push(quoted);
        self.added += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let sql = self.dbms.insert_statement(
            &self.table,
            &self.fields,
            &self.pending,
            self.ignore_duplicates,
        );
        let inserted = self
            .dbms
            .execute(&sql)
            .await
            .with_context(|| {
                format!(
                    "Failed to insert {} records into {}",
                    self.pending.len(),
                    self.table
                )
            })?;
        tracing::debug!(
            "Flushed {} records into {} ({} inserted)",
            self.pending.len(),
            self.table,
            inserted
        );
        self.pending.clear();
        Ok(())
    }

    /// Flush any buffered records, returning how many records were added
    pub async fn finish(mut self) -> Result<u64> {
        self.flush().await?;
        Ok(self.added)
    }
}
