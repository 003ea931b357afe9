// ABOUTME: Command implementations for each sql-utils subcommand
// ABOUTME: Exports compare, extract, copy, and describe commands

pub mod compare;
pub mod copy;
pub mod describe;
pub mod extract;

pub use compare::{compare, CompareOptions};
pub use copy::{copy, CopyOptions};
pub use describe::describe;
pub use extract::{extract, ExtractOptions, ExtractSummary};
