// ABOUTME: Extract command implementation - write a blob field of each row to a file
// ABOUTME: Names files from a template over other fields and writes them atomically

use crate::compare::to_text_record;
use crate::dbms::ConnectionSpec;
use crate::template::FilenameTemplate;
use anyhow::{Context, Result};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub table: String,
    pub blob_field: String,
    pub template: FilenameTemplate,
    pub criteria: Option<String>,
    pub order: Option<String>,
    pub out_dir: PathBuf,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub written: u64,
    pub skipped: u64,
}

impl ExtractOptions {
    /// The SELECT for the blob field followed by the template's fields
    pub fn select_statement(&self) -> String {
        let mut projection = vec![self.blob_field.as_str()];
        projection.extend(self.template.fields().iter().map(String::as_str));
        let mut sql = format!("SELECT {} FROM {}", projection.join(", "), self.table);
        if let Some(criteria) = &self.criteria {
            sql.push_str(&format!(" WHERE {}", criteria));
        }
        if let Some(order) = &self.order {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        sql
    }
}

/// Write the blob field of every selected row to its own file
///
/// Rows whose blob is NULL are skipped with a warning. Each file is written
/// to a temporary name in the output directory and renamed into place, so a
/// failed run never leaves a partial file under a final name. Without
/// `overwrite`, an existing file (including one written earlier in the same
/// run) is an error.
pub async fn extract(spec: &ConnectionSpec, options: &ExtractOptions) -> Result<ExtractSummary> {
    tracing::info!("Connecting to {} database...", spec.backend());
    let dbms = spec.connect().await.context("Failed to connect")?;

    std::fs::create_dir_all(&options.out_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            options.out_dir.display()
        )
    })?;

    let sql = options.select_statement();
    tracing::debug!("Extract query: {}", sql);

    let mut summary = ExtractSummary::default();
    let mut rows = dbms.query(&sql);
    while let Some(row) = rows.next().await {
        let mut row = row?;
        let names = to_text_record(&row.split_off(1));
        let file_name = options.template.render(&names)?;

        let Some(bytes) = row.remove(0).into_bytes()? else {
            tracing::warn!("⚠ Skipping {}: {} is NULL", file_name, options.blob_field);
            summary.skipped += 1;
            continue;
        };

        let path = options.out_dir.join(&file_name);
        let dir = path.parent().unwrap_or(&options.out_dir);
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        temp.write_all(&bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if options.overwrite {
            temp.persist(&path)
        } else {
            temp.persist_noclobber(&path)
        }
        .with_context(|| format!("Failed to save {}", path.display()))?;

        tracing::debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        summary.written += 1;
    }

    tracing::info!(
        "✓ Extracted {} file(s) to {}",
        summary.written,
        options.out_dir.display()
    );
    Ok(summary)
}
