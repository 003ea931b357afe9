// ABOUTME: Ordered record comparator walking two row streams in lockstep
// ABOUTME: Stringifies rows, remaps side-one values, and reports positional mismatches

pub mod fields;
pub mod remap;

pub use fields::{FieldSpec, FieldToken};
pub use remap::RemapTable;

use crate::dbms::{Row, RowStream, Value};
use anyhow::Result;
use futures::StreamExt;
use std::fmt;

/// A row reduced to the textual form of each value; `None` is SQL NULL
pub type TextRecord = Vec<Option<String>>;

/// Stringify a row for comparison
pub fn to_text_record(row: &Row) -> TextRecord {
    row.iter().map(Value::to_text).collect()
}

/// Display adapter rendering a record like a tuple: `("a", NULL)`, `("x",)`
pub struct RecordDisplay<'a>(pub Option<&'a [Option<String>]>);

impl fmt::Display for RecordDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(record) = self.0 else {
            return f.write_str("None");
        };
        f.write_str("(")?;
        for (i, value) in record.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Some(text) => write!(f, "{:?}", text)?,
                None => f.write_str("NULL")?,
            }
        }
        if record.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// One position where the two sides disagree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Side-one record after remapping, or `None` once side one ran out
    pub left: Option<TextRecord>,
    /// Side-two record, or `None` once side two ran out
    pub right: Option<TextRecord>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mismatch: {} vs {}",
            RecordDisplay(self.left.as_deref()),
            RecordDisplay(self.right.as_deref())
        )
    }
}

/// Counters accumulated over one comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareSummary {
    pub count1: u64,
    pub count2: u64,
    pub mismatches: u64,
}

impl fmt::Display for CompareSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Records examined: {} vs {}, diffs found {}",
            self.count1, self.count2, self.mismatches
        )
    }
}

/// Ordering for the two queries: shared, per side, or the field list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSpec {
    pub shared: Option<String>,
    pub side1: Option<String>,
    pub side2: Option<String>,
}

impl OrderSpec {
    /// Effective ORDER BY expressions for side one and side two
    ///
    /// A per-side order wins over the shared one; with neither, both sides
    /// sort by the comma-joined field list.
    pub fn effective(&self, fields: &[String]) -> (String, String) {
        let fallback = || self.shared.clone().unwrap_or_else(|| fields.join(", "));
        (
            self.side1.clone().unwrap_or_else(fallback),
            self.side2.clone().unwrap_or_else(fallback),
        )
    }
}

/// Build `SELECT <fields> FROM <table> WHERE <criteria> ORDER BY <order>`
pub fn select_statement(fields: &[String], table: &str, criteria: &str, order: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        fields.join(", "),
        table,
        criteria,
        order
    )
}

/// Walk two row streams in lockstep, reporting every position that differs
///
/// Each step takes the next row from each side that still has rows; the walk
/// ends only when both sides are exhausted. Rows are paired by position, not
/// matched by key, so once one side runs out every remaining row of the
/// other side is a mismatch against an absent record.
///
/// Side-one rows pass through `remap` before comparison; side-two rows never
/// do. Values are compared by their textual form. `on_mismatch` is called for
/// each mismatch in order; an error from it stops the walk.
pub async fn compare_streams<F>(
    fields: &[String],
    remap: &RemapTable,
    mut side1: RowStream<'_>,
    mut side2: RowStream<'_>,
    mut on_mismatch: F,
) -> Result<CompareSummary>
where
    F: FnMut(&Mismatch) -> Result<()>,
{
    let mut summary = CompareSummary::default();
    let mut done1 = false;
    let mut done2 = false;

    loop {
        let left = if done1 {
            None
        } else {
            match side1.next().await.transpose()? {
                Some(row) => Some(remap.apply(fields, &to_text_record(&row))),
                None => {
                    done1 = true;
                    None
                }
            }
        };
        let right = if done2 {
            None
        } else {
            match side2.next().await.transpose()? {
                Some(row) => Some(to_text_record(&row)),
                None => {
                    done2 = true;
                    None
                }
            }
        };

        if left.is_none() && right.is_none() {
            break;
        }
        if left.is_some() {
            summary.count1 += 1;
        }
        if right.is_some() {
            summary.count2 += 1;
        }
        if left != right {
            summary.mismatches += 1;
            on_mismatch(&Mismatch { left, right })?;
        }
    }

    tracing::debug!("Comparison finished: {}", summary);
    Ok(summary)
}
