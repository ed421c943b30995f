//! product-harvester command line
//!
//! `collect` runs the configured sources; `merge` folds result files into one
//! deduplicated dataset. `to-xlsx` and `import-keywords` move data between
//! JSON and spreadsheets.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

use product_harvester::application::{CollectReport, SourceStatus, collect, install_interrupt_handler};
use product_harvester::domain::QueryRange;
use product_harvester::infrastructure::logging::init_logging_with_config;
use product_harvester::infrastructure::merge::{self, MergeStatistics, write_statistics};
use product_harvester::infrastructure::spreadsheet::{export_xlsx, import_keywords, write_keywords};
use product_harvester::infrastructure::{HarvestConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "product-harvester")]
#[command(about = "Collect, enrich and merge product data from remote sources")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run sources over the query list
    Collect {
        /// Configuration file (TOML, JSON or YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Only run the named source; repeatable
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Query list (JSON array of {id, keyword})
        #[arg(long)]
        queries: Option<PathBuf>,

        /// Proxy list, one endpoint per line
        #[arg(long)]
        proxies: Option<PathBuf>,

        /// First query id to process (inclusive)
        #[arg(long, requires = "end_id")]
        start_id: Option<u64>,

        /// Last query id to process (inclusive)
        #[arg(long, requires = "start_id")]
        end_id: Option<u64>,

        /// Directory for per-source result files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Merge every source's output into this file after collecting
        #[arg(long)]
        merge_into: Option<PathBuf>,
    },

    /// Merge result files into one deduplicated dataset
    Merge {
        /// Input files
        files: Vec<PathBuf>,

        /// Glob pattern for input files, e.g. "scraped_data/*.json"
        #[arg(short, long)]
        pattern: Option<String>,

        /// Output file
        #[arg(short, long, default_value = "merged_data.json")]
        output: PathBuf,

        /// Also write the statistics as JSON
        #[arg(long)]
        stats_out: Option<PathBuf>,

        /// Also write the merged dataset as an Excel workbook
        #[arg(long)]
        xlsx_out: Option<PathBuf>,

        /// Only print errors
        #[arg(short, long)]
        quiet: bool,
    },

    /// Convert a result file to an Excel workbook
    ToXlsx {
        /// JSON result file
        input: PathBuf,

        /// Output workbook; defaults to the input name with .xlsx
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the query list from a Keyword/Category/Subcategory workbook
    ImportKeywords {
        /// Source workbook
        #[arg(default_value = "keywords.xlsx")]
        input: PathBuf,

        /// Query list to write
        #[arg(short, long, default_value = "keywords.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Collect {
            config,
            sources,
            queries,
            proxies,
            start_id,
            end_id,
            output_dir,
            merge_into,
        } => {
            let mut config = HarvestConfig::load(config.as_deref()).context("Failed to load configuration")?;
            if let Some(level) = cli.log_level {
                config.logging.level = level;
            }
            if let Some(path) = queries {
                config.paths.queries_file = path;
            }
            if let Some(path) = proxies {
                config.paths.proxies_file = path;
            }
            if let Some(dir) = output_dir {
                config.paths.output_dir = dir;
            }
            if let (Some(start), Some(end)) = (start_id, end_id) {
                config.query_range = Some(QueryRange::new(start, end));
            }
            config.validate().context("Invalid configuration")?;

            init_logging_with_config(&config.logging)?;
            cmd_collect(&config, &sources, merge_into).await
        }
        Commands::Merge {
            files,
            pattern,
            output,
            stats_out,
            xlsx_out,
            quiet,
        } => {
            init_tool_logging(cli.log_level, quiet)?;
            let outputs = MergeOutputs {
                merged: &output,
                stats: stats_out.as_deref(),
                xlsx: xlsx_out.as_deref(),
            };
            cmd_merge(files, pattern.as_deref(), &outputs, quiet)
        }
        Commands::ToXlsx { input, output } => {
            init_tool_logging(cli.log_level, false)?;
            let output = output.unwrap_or_else(|| default_xlsx_path(&input));
            cmd_to_xlsx(&input, &output)
        }
        Commands::ImportKeywords { input, output } => {
            init_tool_logging(cli.log_level, false)?;
            cmd_import_keywords(&input, &output)
        }
    }
}

/// Console-only logging for the file tools
fn init_tool_logging(level: Option<String>, quiet: bool) -> Result<()> {
    let logging = LoggingConfig {
        level: level.unwrap_or_else(|| if quiet { "warn".to_string() } else { "info".to_string() }),
        ..LoggingConfig::default()
    };
    init_logging_with_config(&logging)
}

fn default_xlsx_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map_or_else(|| "output".into(), |s| s.to_string_lossy());
    PathBuf::from(format!("{stem}.xlsx"))
}

async fn cmd_collect(config: &HarvestConfig, names: &[String], merge_into: Option<PathBuf>) -> Result<ExitCode> {
    let sources = config.select_sources(names)?;
    let token = CancellationToken::new();
    let listener = install_interrupt_handler(token.clone());

    let report = collect(config, sources, merge_into.as_deref(), token.clone()).await;
    listener.abort();
    let report = report?;

    print_collect_report(&report);
    if let Some(stats) = &report.merge {
        print_merge_statistics(stats);
    }

    if report.all_failed() {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

struct MergeOutputs<'a> {
    merged: &'a Path,
    stats: Option<&'a Path>,
    xlsx: Option<&'a Path>,
}

fn cmd_merge(files: Vec<PathBuf>, pattern: Option<&str>, outputs: &MergeOutputs<'_>, quiet: bool) -> Result<ExitCode> {
    let files = merge::resolve_inputs(files, pattern)
        .with_context(|| format!("Invalid pattern '{}'", pattern.unwrap_or_default()))?;

    if files.is_empty() {
        eprintln!("No input files found");
        return Ok(ExitCode::from(1));
    }

    let output = outputs.merged;
    info!("Merging {} files into {}", files.len(), output.display());
    let (dataset, stats) = merge::merge(&files);
    dataset
        .write_to(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(path) = outputs.stats {
        write_statistics(&stats, path).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if let Some(path) = outputs.xlsx {
        export_xlsx(dataset.records(), path)?;
    }

    if !quiet {
        print_merge_statistics(&stats);
        println!("Saved {} records to {}", dataset.len(), output.display());
        if let Some(path) = outputs.xlsx {
            println!("Workbook written to {}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_to_xlsx(input: &Path, output: &Path) -> Result<ExitCode> {
    let records = merge::load_records(input)?;
    if records.is_empty() {
        eprintln!("No data found in {}", input.display());
        return Ok(ExitCode::from(1));
    }
    let rows = export_xlsx(&records, output)?;
    let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or_default();
    println!(
        "Converted {} records to {} ({:.2} MB)",
        rows,
        output.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_import_keywords(input: &Path, output: &Path) -> Result<ExitCode> {
    let entries = import_keywords(input)?;
    write_keywords(&entries, output).with_context(|| format!("Failed to write {}", output.display()))?;

    let categories: BTreeSet<&str> = entries.iter().map(|e| e.category.as_str()).collect();
    let subcategories: BTreeSet<&str> = entries.iter().map(|e| e.subcategory.as_str()).collect();
    println!("Wrote {} keywords to {}", entries.len(), output.display());
    println!("  Categories:    {}", categories.len());
    println!("  Subcategories: {}", subcategories.len());
    for entry in entries.iter().take(3) {
        println!(
            "  {}. '{}' ({} / {})",
            entry.id, entry.keyword, entry.category, entry.subcategory
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_collect_report(report: &CollectReport) {
    println!("\n=== Collection summary ===");
    for outcome in &report.outcomes {
        let status = match outcome.status {
            SourceStatus::Completed => "completed",
            SourceStatus::Interrupted => "interrupted",
            SourceStatus::Failed => "failed",
        };
        println!(
            "{:<20} {:<12} {:>6} records  {}/{} queries  {} enrichment failures",
            outcome.source,
            status,
            outcome.records_saved,
            outcome.queries_succeeded,
            outcome.queries_total,
            outcome.enrichment_failures
        );
        if let Some(path) = &outcome.output {
            println!("{:<20} -> {}", "", path.display());
        }
        if let Some(error) = &outcome.error {
            println!("{:<20} error: {}", "", error);
        }
    }
}

fn print_merge_statistics(stats: &MergeStatistics) {
    println!("\n=== Merge statistics ===");
    println!("Files processed:     {}", stats.files_processed);
    println!("Records processed:   {}", stats.total_processed);
    println!("Unique records:      {}", stats.unique_count);
    println!(
        "Duplicates removed:  {} ({:.2}%)",
        stats.duplicates_removed, stats.duplicate_percentage
    );
    for file in &stats.per_file {
        println!(
            "  {}: {} loaded, {} kept, {} duplicates",
            file.path.display(),
            file.loaded,
            file.kept,
            file.duplicates
        );
    }
    for skipped in &stats.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
}
