// ABOUTME: Copy command implementation - stream rows from one table into another
// ABOUTME: Works across backends, inserting in batches through BulkInserter

use crate::compare::FieldSpec;
use crate::dbms::{BulkInserter, ConnectionSpec};
use crate::utils::{sanitize_identifier, unqualified};
use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub fields: FieldSpec,
    pub source_table: String,
    pub dest_table: String,
    pub criteria: Option<String>,
    pub order: Option<String>,
    pub ignore_duplicates: bool,
    pub batch_size: usize,
}

impl CopyOptions {
    fn select_statement(&self, fields: &[String]) -> String {
        let mut sql = format!("SELECT {} FROM {}", fields.join(", "), self.source_table);
        if let Some(criteria) = &self.criteria {
            sql.push_str(&format!(" WHERE {}", criteria));
        }
        if let Some(order) = &self.order {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        sql
    }
}

/// Copy the selected rows of `source_table` into `dest_table`
///
/// Destination columns take the source field names with any table qualifier
/// removed, so `p.*` on the source fills the same-named columns of the
/// destination. Returns the number of records handed to the destination.
///
/// When both sides are the same SQLite file the copy runs as a single
/// `INSERT ... SELECT`, and the count is the number of rows inserted.
pub async fn copy(
    source: &ConnectionSpec,
    dest: &ConnectionSpec,
    options: &CopyOptions,
) -> Result<u64> {
    options.fields.wildcard_tables(&options.source_table)?;

    tracing::info!("Connecting to source ({})...", source.backend());
    let source_dbms = source
        .connect()
        .await
        .context("Failed to connect to source database")?;
    tracing::info!("Connecting to destination ({})...", dest.backend());
    let dest_dbms = dest
        .connect()
        .await
        .context("Failed to connect to destination database")?;

    let fields = options
        .fields
        .resolve_with(&source_dbms, &options.source_table)
        .await
        .context("Failed to resolve field names")?;
    if fields.is_empty() {
        anyhow::bail!(
            "Field list for {} resolved to no fields",
            sanitize_identifier(&options.source_table)
        );
    }
    let dest_fields: Vec<String> = fields.iter().map(|f| unqualified(f).to_string()).collect();

    tracing::info!(
        "Copying {} field(s) from {} to {}",
        fields.len(),
        sanitize_identifier(&options.source_table),
        sanitize_identifier(&options.dest_table)
    );

    let sql = options.select_statement(&fields);

    if source_dbms.shares_file_with(&dest_dbms) {
        // One statement on one connection; a separate reader would hold the
        // file lock the inserts need
        drop(source_dbms);
        tracing::debug!("Source and destination share one SQLite file");
        let insert = dest_dbms.insert_select_statement(
            &options.dest_table,
            &dest_fields,
            &sql,
            options.ignore_duplicates,
        );
        let copied = dest_dbms
            .execute(&insert)
            .await
            .with_context(|| format!("Failed to copy rows into {}", options.dest_table))?;
        tracing::info!(
            "✓ Copied {} record(s) into {}",
            copied,
            sanitize_identifier(&options.dest_table)
        );
        return Ok(copied);
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed_precise}] {pos} records {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let mut inserter = BulkInserter::new(
        &dest_dbms,
        &options.dest_table,
        dest_fields,
        options.ignore_duplicates,
    )
    .with_batch_size(options.batch_size);

    let mut rows = source_dbms.query(&sql);
    while let Some(row) = rows.next().await {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                progress.abandon();
                return Err(e.context(format!("Failed to read from {}", options.source_table)));
            }
        };
        if let Err(e) = inserter.add_record(row).await {
            progress.abandon();
            return Err(e);
        }
        progress.inc(1);
    }
    drop(rows);

    let copied = inserter.finish().await;
    progress.finish_and_clear();
    let copied = copied?;

    tracing::info!(
        "✓ Copied {} record(s) into {}",
        copied,
        sanitize_identifier(&options.dest_table)
    );
    Ok(copied)
}
