// ABOUTME: CLI entry point for sql-utils
// ABOUTME: Parses commands, expands connection aliases, and routes to appropriate handlers

use anyhow::Context;
use clap::{Parser, Subcommand};
use sql_utils::commands::{self, CompareOptions, CopyOptions, ExtractOptions};
use sql_utils::compare::{FieldSpec, OrderSpec, RemapTable};
use sql_utils::config::{load_config, Config};
use sql_utils::dbms::bulk::DEFAULT_BATCH_SIZE;
use sql_utils::dbms::ConnectionSpec;
use sql_utils::error::usage_error;
use sql_utils::template::FilenameTemplate;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sql-utils")]
#[command(
    about = "Compare, copy, and extract table data across PostgreSQL and SQLite",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// TOML file defining `@name` connection aliases
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the rows selected by two criteria, position by position
    Compare {
        /// Connection spec, e.g. postgres:host=db:user=me:password=:database=app
        dbms_params: String,
        /// Comma-separated fields; `*`, `table.*` and `-name` are expanded
        field_names: String,
        /// Table name or join expression
        table_spec: String,
        /// WHERE clause selecting the first record set
        criteria1: String,
        /// WHERE clause selecting the second record set
        criteria2: String,
        /// ORDER BY used for both sides (defaults to the field list)
        #[arg(long)]
        order: Option<String>,
        /// ORDER BY for the first side only
        #[arg(long)]
        order1: Option<String>,
        /// ORDER BY for the second side only
        #[arg(long)]
        order2: Option<String>,
        /// Treat value1 of field as value2 before comparing (field:value1:value2, repeatable)
        #[arg(long)]
        remap: Vec<String>,
    },
    /// Write a blob field of each selected row to its own file
    Extract {
        dbms_params: String,
        table_spec: String,
        blob_field: String,
        /// File name with {field} placeholders, e.g. {id}-{name}.png
        filename_template: String,
        /// WHERE clause selecting the rows
        criteria: Option<String>,
        #[arg(long)]
        order: Option<String>,
        /// Directory the files are written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy rows from one table into another, possibly across databases
    Copy {
        source_params: String,
        source_table: String,
        dest_params: String,
        dest_table: String,
        /// Comma-separated fields to copy; `*`, `table.*` and `-name` are expanded
        #[arg(long, default_value = "*")]
        fields: String,
        /// WHERE clause selecting the source rows
        #[arg(long)]
        criteria: Option<String>,
        #[arg(long)]
        order: Option<String>,
        /// Skip rows that violate a unique constraint on the destination
        #[arg(long)]
        ignore_duplicates: bool,
        /// Records per INSERT statement
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// List the tables of a database, or the columns and keys of one table
    Describe {
        dbms_params: String,
        table: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Err(err) => match usage_error(&err) {
            Some(usage) => {
                eprintln!("usage error: {}", usage);
                std::process::exit(2);
            }
            None => Err(err),
        },
        ok => ok,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Compare {
            dbms_params,
            field_names,
            table_spec,
            criteria1,
            criteria2,
            order,
            order1,
            order2,
            remap,
        } => {
            let options = CompareOptions {
                fields: FieldSpec::parse(&field_names)?,
                table: table_spec,
                criteria1,
                criteria2,
                order: OrderSpec {
                    shared: order,
                    side1: order1,
                    side2: order2,
                },
                remap: RemapTable::parse(&remap)?,
            };
            let spec = connection_spec(&config, &dbms_params, "")?;
            let spec = spec.prompt_for_password()?;

            let stdout = std::io::stdout();
            commands::compare(&spec, &options, &mut stdout.lock()).await?;
            Ok(())
        }
        Commands::Extract {
            dbms_params,
            table_spec,
            blob_field,
            filename_template,
            criteria,
            order,
            out_dir,
            overwrite,
        } => {
            let options = ExtractOptions {
                table: table_spec,
                blob_field,
                template: FilenameTemplate::parse(&filename_template)?,
                criteria,
                order,
                out_dir,
                overwrite,
            };
            let spec = connection_spec(&config, &dbms_params, "")?;
            let spec = spec.prompt_for_password()?;

            let summary = commands::extract(&spec, &options).await?;
            println!(
                "Files written: {}, skipped {}",
                summary.written, summary.skipped
            );
            Ok(())
        }
        Commands::Copy {
            source_params,
            source_table,
            dest_params,
            dest_table,
            fields,
            criteria,
            order,
            ignore_duplicates,
            batch_size,
        } => {
            let options = CopyOptions {
                fields: FieldSpec::parse(&fields)?,
                source_table,
                dest_table,
                criteria,
                order,
                ignore_duplicates,
                batch_size,
            };
            let source = connection_spec(&config, &source_params, "for source")?;
            let dest = connection_spec(&config, &dest_params, "for destination")?;
            let source = source.prompt_for_password()?;
            let dest = dest.prompt_for_password()?;

            let copied = commands::copy(&source, &dest, &options).await?;
            println!("Records copied: {}", copied);
            Ok(())
        }
        Commands::Describe { dbms_params, table } => {
            let spec = connection_spec(&config, &dbms_params, "")?;
            let spec = spec.prompt_for_password()?;

            let stdout = std::io::stdout();
            commands::describe(&spec, table.as_deref(), &mut stdout.lock())
                .await
                .context("Failed to describe database")
        }
    }
}

/// Expand an `@alias` and parse the resulting connection spec
fn connection_spec(
    config: &Config,
    params: &str,
    doing_what: &str,
) -> anyhow::Result<ConnectionSpec> {
    let expanded = config.expand(params)?;
    Ok(ConnectionSpec::parse(expanded, doing_what)?)
}
