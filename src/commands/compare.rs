// ABOUTME: Compare command implementation - diff two ordered record sets
// ABOUTME: Resolves the field list, opens one connection per side, and reports mismatches

use crate::compare::{
    compare_streams, select_statement, CompareSummary, FieldSpec, OrderSpec, RemapTable,
};
use crate::dbms::ConnectionSpec;
use anyhow::{Context, Result};
use std::io::Write;

/// Everything that shapes one comparison, fixed before any query runs
#[derive(Debug, Clone)]
pub struct CompareOptions {
    pub fields: FieldSpec,
    pub table: String,
    pub criteria1: String,
    pub criteria2: String,
    pub order: OrderSpec,
    pub remap: RemapTable,
}

/// Compare the rows selected by two criteria against the same table or join
///
/// Writes one `Mismatch: ...` line per differing position to `out`, followed
/// by a `Records examined: ...` summary line.
///
/// Each side gets its own connection so both cursors can be read in
/// lockstep. Misuse of `*` on a join is reported before connecting.
///
/// # Errors
///
/// This function will return an error if:
/// - The field list uses `*` with a join (a usage error)
/// - A connection cannot be opened or a query fails
/// - Writing to `out` fails
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use sql_utils::commands::{compare, CompareOptions};
/// # use sql_utils::compare::{FieldSpec, OrderSpec, RemapTable};
/// # use sql_utils::dbms::ConnectionSpec;
/// # async fn example() -> Result<()> {
/// let spec = ConnectionSpec::parse("sqlite:filename=shop.db:write=no", "")?;
/// let options = CompareOptions {
///     fields: FieldSpec::parse("*,-updated_at")?,
///     table: "orders".to_string(),
///     criteria1: "batch = 1".to_string(),
///     criteria2: "batch = 2".to_string(),
///     order: OrderSpec::default(),
///     remap: RemapTable::parse(["status:0:inactive"])?,
/// };
/// let summary = compare(&spec, &options, &mut std::io::stdout()).await?;
/// println!("{} mismatches", summary.mismatches);
/// # Ok(())
/// # }
/// ```
pub async fn compare<W: Write>(
    spec: &ConnectionSpec,
    options: &CompareOptions,
    out: &mut W,
) -> Result<CompareSummary> {
    // Usage errors first, before touching the database
    options.fields.wildcard_tables(&options.table)?;

    tracing::info!("Connecting to {} database...", spec.backend());
    let dbms1 = spec.connect().await.context("Failed to connect for first query")?;
    let dbms2 = spec.connect().await.context("Failed to connect for second query")?;

    let fields = options
        .fields
        .resolve_with(&dbms1, &options.table)
        .await
        .context("Failed to resolve field names")?;
    if fields.is_empty() {
        anyhow::bail!("Field list for {} resolved to no fields", options.table);
    }
    tracing::info!("Comparing {} field(s): {}", fields.len(), fields.join(", "));
    if !options.remap.is_empty() {
        tracing::info!("Remapping values of the first record set before comparing");
    }

    let (order1, order2) = options.order.effective(&fields);
    let sql1 = select_statement(&fields, &options.table, &options.criteria1, &order1);
    let sql2 = select_statement(&fields, &options.table, &options.criteria2, &order2);
    tracing::debug!("First query: {}", sql1);
    tracing::debug!("Second query: {}", sql2);

    let summary = compare_streams(
        &fields,
        &options.remap,
        dbms1.query(&sql1),
        dbms2.query(&sql2),
        |mismatch| writeln!(out, "{}", mismatch).context("Failed to write mismatch"),
    )
    .await?;

    writeln!(out, "{}", summary).context("Failed to write summary")?;
    out.flush().context("Failed to flush output")?;

    if summary.mismatches == 0 {
        tracing::info!("✓ Record sets match");
    } else {
        tracing::warn!("⚠ {} mismatch(es) found", summary.mismatches);
    }

    Ok(summary)
}
