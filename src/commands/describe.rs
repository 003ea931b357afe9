// ABOUTME: Describe command implementation - list tables or the columns of one table
// ABOUTME: Prints one table, column, or secondary key per line for quick inspection

use crate::dbms::{ColumnInfo, ConnectionSpec, KeyInfo};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use std::io::Write;

/// List the tables of the database, or the columns of `table` when given
///
/// Columns are followed by the table's non-primary keys, one per line.
pub async fn describe<W: Write>(
    spec: &ConnectionSpec,
    table: Option<&str>,
    out: &mut W,
) -> Result<()> {
    let dbms = spec.connect().await.context("Failed to connect")?;

    match table {
        None => {
            let tables = dbms.list_tables().await?;
            tracing::debug!("Found {} table(s)", tables.len());
            for table in tables {
                writeln!(out, "{}", sanitize_identifier(&table))?;
            }
        }
        Some(table) => {
            for column in dbms.list_columns(table).await? {
                writeln!(out, "{}", format_column(&column))?;
            }
            for key in dbms.list_keys(table).await? {
                writeln!(out, "{}", format_key(&key))?;
            }
        }
    }

    out.flush().context("Failed to flush output")?;
    Ok(())
}

/// `name type [NOT NULL] [DEFAULT expr] [PRIMARY KEY n]`
fn format_column(column: &ColumnInfo) -> String {
    let mut line = format!("{} {}", sanitize_identifier(&column.name), column.data_type);
    if column.not_null {
        line.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        line.push_str(&format!(" DEFAULT {}", default));
    }
    if let Some(seq) = column.primary_key_seq {
        line.push_str(&format!(" PRIMARY KEY {}", seq));
    }
    line
}

/// `[UNIQUE ]KEY name (field, ...)`
fn format_key(key: &KeyInfo) -> String {
    format!(
        "{}KEY {} ({})",
        if key.unique { "UNIQUE " } else { "" },
        sanitize_identifier(&key.name),
        key.fields.join(", ")
    )
}
