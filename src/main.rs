//! Strata CLI
//!
//! Command-line interface for a Strata version store:
//! - Write, append and read symbols (CSV in, table/json/csv out)
//! - Inspect versions and snapshots
//! - Maintenance: prune, fsck, quota

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use strata::codec::{Column, Table};
use strata::config::{generate_default_config, Config, LoggingConfig};
use strata::import::{format_cell, write_csv, CsvImporter};
use strata::storage::{Data, DateRange, ReadOptions, VersionStore, WriteOptions};
use strata::ChunkerSpec;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "strata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned storage for tables and arrays")]
#[command(long_about = "Strata keeps every version of every symbol.\nWrites are chunked and deduplicated; any past version stays readable.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/strata/config.toml, /etc/strata, ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Library to operate on (overrides config)
    #[arg(short = 'L', long, global = true)]
    pub library: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a CSV file as a new version
    Write {
        symbol: String,
        /// Path to CSV file
        path: PathBuf,
        /// Column to use as the index
        #[arg(short, long)]
        index: Option<String>,
        /// Chunker: passthru, date:D, date:M, date:Y (optionally date:M:column)
        #[arg(long)]
        chunker: Option<String>,
        /// Timestamp format for date columns (strftime format)
        #[arg(long, default_value = "%Y-%m-%d")]
        timestamp_format: String,
        /// Version metadata as JSON
        #[arg(short, long)]
        metadata: Option<String>,
        /// Prune superseded versions afterwards
        #[arg(long)]
        prune: bool,
    },

    /// Append CSV rows to the latest version
    Append {
        symbol: String,
        path: PathBuf,
        #[arg(short, long)]
        index: Option<String>,
        #[arg(long, default_value = "%Y-%m-%d")]
        timestamp_format: String,
        #[arg(short, long)]
        metadata: Option<String>,
        /// Fail if the symbol does not exist
        #[arg(long)]
        no_upsert: bool,
    },

    /// Read a version
    Read {
        symbol: String,
        #[arg(short, long)]
        version: Option<u64>,
        #[arg(short, long)]
        snapshot: Option<String>,
        /// Latest version at this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<String>,
        /// Range start, inclusive
        #[arg(long)]
        start: Option<String>,
        /// Range end, exclusive
        #[arg(long)]
        end: Option<String>,
        /// Table columns to read (comma separated)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List symbols
    Symbols {
        /// Regex the symbol must match
        pattern: Option<String>,
        #[arg(short, long)]
        snapshot: Option<String>,
    },

    /// List versions
    Versions {
        symbol: Option<String>,
        #[arg(short, long)]
        snapshot: Option<String>,
        /// Only the latest version of each symbol
        #[arg(long)]
        latest: bool,
    },

    /// Describe a version
    Info {
        symbol: String,
        #[arg(short, long)]
        version: Option<u64>,
    },

    /// Delete a symbol (snapshot-pinned versions survive)
    Delete { symbol: String },

    /// Make an earlier version the latest again
    Restore { symbol: String, version: u64 },

    /// Remove superseded versions
    Prune {
        symbol: String,
        /// Keep versions younger than this many minutes (default: config)
        #[arg(long)]
        keep_mins: Option<u64>,
    },

    /// Snapshot the current version of every symbol
    Snapshot {
        name: String,
        /// Symbols to leave out
        #[arg(long)]
        skip: Vec<String>,
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// List snapshots
    Snapshots,

    /// Delete a snapshot
    DeleteSnapshot { name: String },

    /// Check and repair chunk references
    Fsck {
        /// Report without repairing
        #[arg(long)]
        dry_run: bool,
    },

    /// Library byte budget
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },

    /// Show library statistics
    Stats,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QuotaAction {
    /// Show the configured quota
    Get,
    /// Set the quota in bytes
    Set { bytes: u64 },
    /// Remove the quota
    Clear,
    /// Compare usage with the quota
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(library) = &cli.library {
        config.store.library = library.clone();
    }
    init_logging(&config.logging)?;

    let store = VersionStore::open(&config).context("opening version store")?;
    run(&store, cli.command, cli.format)
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("strata={}", config.level)));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = match config.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
        _ => tracing_subscriber::fmt::layer().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;
    Ok(())
}

fn run(store: &VersionStore, command: Commands, format: Format) -> anyhow::Result<()> {
    match command {
        Commands::Write {
            symbol,
            path,
            index,
            chunker,
            timestamp_format,
            metadata,
            prune,
        } => {
            let table = import_csv(&path, index.as_deref(), &timestamp_format)?;
            let mut options = WriteOptions::new().prune(prune);
            if let Some(spec) = chunker {
                options = options.chunker(spec.parse::<ChunkerSpec>()?);
            }
            let item = store.write(&symbol, table, parse_json(metadata)?, &options)?;
            println!("Wrote {} v{}", item.symbol, item.version);
        }

        Commands::Append {
            symbol,
            path,
            index,
            timestamp_format,
            metadata,
            no_upsert,
        } => {
            let table = import_csv(&path, index.as_deref(), &timestamp_format)?;
            let options = WriteOptions::new().upsert(!no_upsert);
            let item = store.append(&symbol, table, parse_json(metadata)?, &options)?;
            println!("Appended to {} v{}", item.symbol, item.version);
        }

        Commands::Read {
            symbol,
            version,
            snapshot,
            as_of,
            start,
            end,
            columns,
            output,
        } => {
            let mut options = ReadOptions::new();
            if !columns.is_empty() {
                options = options.columns(columns);
            }
            options.version = version;
            options.snapshot = snapshot;
            options.as_of = as_of.as_deref().map(parse_time).transpose()?;
            if start.is_some() || end.is_some() {
                options.range = Some(DateRange::new(
                    start.as_deref().map(parse_bound).transpose()?,
                    end.as_deref().map(parse_bound).transpose()?,
                ));
            }

            let item = store.read(&symbol, &options)?;
            let Some(data) = item.data else {
                bail!("{} v{} has no data", item.symbol, item.version);
            };
            tracing::debug!(symbol = %item.symbol, version = item.version, "Read");

            match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    print_data(&data, format, std::io::BufWriter::new(file))?;
                }
                None => print_data(&data, format, std::io::stdout().lock())?,
            }
        }

        Commands::Symbols { pattern, snapshot } => {
            let symbols = store.list_symbols(pattern.as_deref(), snapshot.as_deref())?;
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&symbols)?);
            } else {
                for symbol in symbols {
                    println!("{}", symbol);
                }
            }
        }

        Commands::Versions {
            symbol,
            snapshot,
            latest,
        } => {
            let versions = store.list_versions(symbol.as_deref(), snapshot.as_deref(), latest)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
                _ => {
                    let rows: Vec<Vec<String>> = versions
                        .iter()
                        .map(|v| {
                            vec![
                                v.symbol.clone(),
                                v.version.to_string(),
                                v.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                                v.handler.clone(),
                                if v.deleted { "yes".into() } else { String::new() },
                                v.snapshots.join(","),
                            ]
                        })
                        .collect();
                    print_rows(
                        &["SYMBOL", "VERSION", "CREATED", "TYPE", "DELETED", "SNAPSHOTS"],
                        &rows,
                        &mut std::io::stdout().lock(),
                    )?;
                }
            }
        }

        Commands::Info { symbol, version } => {
            let mut options = ReadOptions::new();
            options.version = version;
            let info = store.get_info(&symbol, &options)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Delete { symbol } => {
            let removed = store.delete(&symbol)?;
            println!("Deleted {} ({} versions removed)", symbol, removed);
        }

        Commands::Restore { symbol, version } => {
            let item = store.restore_version(&symbol, &ReadOptions::new().version(version))?;
            println!("Restored {} v{} as v{}", symbol, version, item.version);
        }

        Commands::Prune { symbol, keep_mins } => {
            let keep = keep_mins.unwrap_or(store.config().prune_keep_mins);
            let removed = store.prune_previous_versions(&symbol, keep)?;
            println!("Pruned {} versions of {}", removed, symbol);
        }

        Commands::Snapshot {
            name,
            skip,
            metadata,
        } => {
            let snapshot = store.snapshot(&name, parse_json(metadata)?, &skip, None)?;
            println!(
                "Created snapshot {} ({} symbols)",
                snapshot.name,
                snapshot.versions.len()
            );
        }

        Commands::Snapshots => {
            let snapshots = store.list_snapshots()?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
                _ => {
                    let rows: Vec<Vec<String>> = snapshots
                        .iter()
                        .map(|s| {
                            vec![
                                s.name.clone(),
                                s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                                s.versions.len().to_string(),
                            ]
                        })
                        .collect();
                    print_rows(&["NAME", "CREATED", "SYMBOLS"], &rows, &mut std::io::stdout().lock())?;
                }
            }
        }

        Commands::DeleteSnapshot { name } => {
            store.delete_snapshot(&name)?;
            println!("Deleted snapshot {}", name);
        }

        Commands::Fsck { dry_run } => {
            let report = store.fsck(dry_run)?;
            println!("{}", report);
        }

        Commands::Quota { action } => match action {
            QuotaAction::Get => match store.get_quota()? {
                Some(bytes) => println!("{} bytes", bytes),
                None => println!("unlimited"),
            },
            QuotaAction::Set { bytes } => {
                store.set_quota(Some(bytes))?;
                println!("Quota set to {} bytes", bytes);
            }
            QuotaAction::Clear => {
                store.set_quota(None)?;
                println!("Quota cleared");
            }
            QuotaAction::Check => {
                let status = store.check_quota()?;
                match (status.quota, status.usage_ratio()) {
                    (Some(quota), Some(ratio)) => println!(
                        "{} of {} bytes ({:.1}%){}",
                        status.used,
                        quota,
                        ratio * 100.0,
                        if status.is_over() { " OVER QUOTA" } else { "" }
                    ),
                    (Some(quota), None) => println!("{} of {} bytes", status.used, quota),
                    (None, _) => println!("No quota set"),
                }
            }
        },

        Commands::Stats => {
            let stats = store.stats()?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => println!("{}", stats),
            }
        }

        Commands::Config { .. } => unreachable!("handled before the store is opened"),
    }
    Ok(())
}

fn import_csv(path: &Path, index: Option<&str>, timestamp_format: &str) -> anyhow::Result<Table> {
    let mut importer = CsvImporter::new().with_timestamp_format(timestamp_format);
    if let Some(index) = index {
        importer = importer.with_index(index);
    }
    let result = importer
        .import(path)
        .with_context(|| format!("importing {}", path.display()))?;

    for error in &result.errors {
        eprintln!("{}", error);
    }
    if result.rows_failed > 0 {
        tracing::warn!(
            failed = result.rows_failed,
            imported = result.rows_processed,
            "Some CSV rows were skipped"
        );
    }
    Ok(result.table)
}

fn parse_json(raw: Option<String>) -> anyhow::Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).context("metadata is not valid JSON"))
        .transpose()
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    bail!("Invalid time: {} (expected RFC 3339 or YYYY-MM-DD)", s)
}

/// Range bound: a row number for arrays, otherwise a time
fn parse_bound(s: &str) -> anyhow::Result<i64> {
    match s.parse::<i64>() {
        Ok(n) => Ok(n),
        Err(_) => Ok(parse_time(s)?.timestamp_millis()),
    }
}

fn print_data<W: Write>(data: &Data, format: Format, mut out: W) -> anyhow::Result<()> {
    let table = match data {
        Data::Table(t) => t.clone(),
        Data::Array(a) => Table::new(vec![Column::new("value", a.clone())])?,
        Data::Object(v) => {
            writeln!(out, "{}", serde_json::to_string_pretty(v)?)?;
            return Ok(());
        }
    };

    match format {
        Format::Json => writeln!(out, "{}", serde_json::to_string_pretty(data)?)?,
        Format::Csv => write_csv(&table, out)?,
        Format::Table => {
            let columns: Vec<&Column> = table.index().iter().chain(table.columns()).collect();
            let headers: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            let rows: Vec<Vec<String>> = (0..table.num_rows())
                .map(|row| columns.iter().map(|c| format_cell(&c.values, row)).collect())
                .collect();
            print_rows(&headers, &rows, &mut out)?;
        }
    }
    Ok(())
}

fn print_rows<W: Write>(headers: &[&str], rows: &[Vec<String>], out: &mut W) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect::<Vec<_>>()
            .join("  ")
    };

    writeln!(out, "{}", line(headers.to_vec()).trim_end())?;
    for row in rows {
        writeln!(out, "{}", line(row.iter().map(String::as_str).collect()).trim_end())?;
    }
    Ok(())
}

