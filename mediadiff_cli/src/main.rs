use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mediadiff_common::{
    load_config, load_default_config, ComparisonResult, HashAlgorithm, HashColumn, ResultKind,
    RunConfig,
};
use mediadiff_core::inventory::ValueCount;
use mediadiff_core::{
    manifest_parser, ColumnInventory, DiffReport, FileDigestComparison, HashEngine,
    InventoryDiff, Manifest, MediaScanner, Reconciler, ValueInventory, ValueInventoryDiff,
};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_CLEAN: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_DISCREPANCIES: i32 = 2;

#[derive(Parser)]
#[command(name = "mediadiff")]
#[command(author = "MediaDiff Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Verify produced media against load files", long_about = None)]
struct Cli {
    /// Run configuration file (TOML); defaults to the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a load file against the files under a media root
    Disk {
        /// Load file to validate
        manifest: PathBuf,

        /// Directory the load file paths are relative to
        media_root: PathBuf,

        #[command(flatten)]
        load_file: LoadFileArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Ignore patterns for the media scan (can be specified multiple times)
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Follow symbolic links while scanning
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Compare the declared digests of two load files
    Manifest {
        /// Load file to validate
        left: PathBuf,

        /// Load file to compare against
        right: PathBuf,

        /// Root used to relativize absolute load file paths
        #[arg(long)]
        media_root: Option<PathBuf>,

        #[command(flatten)]
        load_file: LoadFileArgs,

        #[command(flatten)]
        run: RunArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Compare the columns, value counts and raw digests of two load files
    Inventory {
        left: PathBuf,

        right: PathBuf,

        #[command(flatten)]
        load_file: LoadFileArgs,

        /// Also compare how often each value of this column occurs
        #[arg(long)]
        column: Option<String>,

        /// Also compare digests of the two load files themselves (default md5)
        #[arg(long, value_name = "ALGORITHM", num_args = 0..=1, default_missing_value = "md5")]
        file_digest: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct LoadFileArgs {
    /// Field delimiter: a character, \t, or a code point such as U+0014
    #[arg(long, value_parser = parse_char)]
    delimiter: Option<char>,

    /// Quote character: a character or a code point such as U+00FE
    #[arg(long, value_parser = parse_char)]
    quote: Option<char>,

    /// The load file has no header row; requires --columns
    #[arg(long)]
    no_header: bool,

    /// Comma-separated column names for header-less load files
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Text encoding label (utf-8, windows-1252, utf-16le, ...)
    #[arg(long)]
    encoding: Option<String>,

    /// Pad short records and keep extra fields instead of failing
    #[arg(long)]
    lenient: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Identifier column
    #[arg(long)]
    id_column: Option<String>,

    /// Use the normalized path as the identifier
    #[arg(long, conflicts_with = "id_column")]
    no_id_column: bool,

    /// Relative path column
    #[arg(long)]
    path_column: Option<String>,

    /// Digest column as ALGORITHM=COLUMN (replaces configured hash columns)
    #[arg(long = "hash-column", value_parser = parse_hash_column)]
    hash_columns: Vec<HashColumn>,

    /// Only verify these algorithms (can be specified multiple times)
    #[arg(short, long = "algorithm")]
    algorithms: Vec<String>,

    /// Hashing worker threads (0 = available parallelism)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct OutputArgs {
    /// Show only discrepancies
    #[arg(short = 'd', long)]
    diff_only: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Output results as CSV
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Disable ANSI colors in output
    #[arg(long)]
    no_color: bool,
}

fn main() {
    // Logs go to stderr so JSON and CSV output stays clean on stdout
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            process::exit(EXIT_FATAL);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let loaded = load_default_config()?;
            if loaded.exists {
                info!("Using config {}", loaded.path.display());
            }
            loaded.config
        }
    };

    match cli.command {
        Commands::Disk {
            manifest,
            media_root,
            load_file,
            run: run_args,
            ignore,
            follow_symlinks,
            output,
        } => {
            load_file.apply(&mut config);
            run_args.apply(&mut config);
            config.media_root = media_root;
            config.ignore_patterns.extend(ignore);
            config.follow_symlinks |= follow_symlinks;
            config.validate()?;

            if !config.media_root.is_dir() {
                bail!("Media root is not a directory: {}", config.media_root.display());
            }

            let loaded = Manifest::load(&manifest, &config)?;
            info!("Scanning {}", config.media_root.display());
            let scan = MediaScanner::new(&config).scan(&config.media_root)?;
            info!("Found {} files", scan.files.len());

            let progress = progress_bar(output.json || output.csv);
            let mut reconciler = Reconciler::new(config);
            if let Some(bar) = progress.clone() {
                reconciler = reconciler.with_progress(Arc::new(move |done, total| {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                }));
            }
            let report = reconciler.reconcile_scan(&loaded, scan)?;
            if let Some(bar) = progress {
                bar.finish_and_clear();
            }

            render_report(&report, &output, "Load File vs Media")?;
            Ok(exit_code(&report))
        }
        Commands::Manifest {
            left,
            right,
            media_root,
            load_file,
            run: run_args,
            output,
        } => {
            load_file.apply(&mut config);
            run_args.apply(&mut config);
            if let Some(media_root) = media_root {
                config.media_root = media_root;
            }
            config.validate()?;

            let left = Manifest::load(&left, &config)?;
            let right = Manifest::load(&right, &config)?;
            let report = Reconciler::new(config).reconcile_manifests(&left, &right)?;

            render_report(&report, &output, "Load File vs Load File")?;
            Ok(exit_code(&report))
        }
        Commands::Inventory {
            left,
            right,
            load_file,
            column,
            file_digest,
            json,
        } => {
            load_file.apply(&mut config);
            config.validate()?;
            let file_digest = file_digest
                .map(|name| name.parse::<HashAlgorithm>())
                .transpose()?;

            let dialect = config.dialect();
            let left_parsed = manifest_parser::parse_file(&left, &dialect)?;
            let right_parsed = manifest_parser::parse_file(&right, &dialect)?;
            let mut diff = InventoryDiff::between(
                &ColumnInventory::from_records(&left_parsed.header, &left_parsed.records),
                &ColumnInventory::from_records(&right_parsed.header, &right_parsed.records),
            );

            if let Some(column) = column {
                let left_values =
                    ValueInventory::for_column(&left_parsed.header, &left_parsed.records, &column)
                        .with_context(|| format!("In {}", left.display()))?;
                let right_values = ValueInventory::for_column(
                    &right_parsed.header,
                    &right_parsed.records,
                    &column,
                )
                .with_context(|| format!("In {}", right.display()))?;
                diff = diff.with_values(ValueInventoryDiff::between(&left_values, &right_values));
            }
            if let Some(algorithm) = file_digest {
                diff = diff.with_file_digests(FileDigestComparison::compute(
                    &left,
                    &right,
                    algorithm,
                    &HashEngine::new(),
                )?);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else {
                render_inventory(&diff);
            }
            Ok(if diff.has_differences() {
                EXIT_DISCREPANCIES
            } else {
                EXIT_CLEAN
            })
        }
    }
}

impl LoadFileArgs {
    fn apply(self, config: &mut RunConfig) {
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(quote) = self.quote {
            config.quote_char = quote;
        }
        if self.no_header {
            config.has_header = false;
        }
        if !self.columns.is_empty() {
            config.positional_columns = self.columns;
        }
        if let Some(encoding) = self.encoding {
            config.encoding = encoding;
        }
        config.lenient_parsing |= self.lenient;
    }
}

impl RunArgs {
    fn apply(self, config: &mut RunConfig) {
        if let Some(id_column) = self.id_column {
            config.columns.identifier = Some(id_column);
        }
        if self.no_id_column {
            config.columns.identifier = None;
        }
        if let Some(path_column) = self.path_column {
            config.columns.relative_path = path_column;
        }
        if !self.hash_columns.is_empty() {
            config.columns.hashes = self.hash_columns;
        }
        if !self.algorithms.is_empty() {
            config.hash_algorithms = self.algorithms;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }
}

fn parse_char(value: &str) -> Result<char, String> {
    let code = value
        .strip_prefix("U+")
        .or_else(|| value.strip_prefix("u+"))
        .or_else(|| value.strip_prefix("0x"));
    if let Some(hex) = code {
        let code = u32::from_str_radix(hex, 16).map_err(|e| format!("{}: {}", value, e))?;
        return char::from_u32(code).ok_or_else(|| format!("{} is not a character", value));
    }
    if value == "\\t" {
        return Ok('\t');
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("expected a single character, got {:?}", value)),
    }
}

fn parse_hash_column(value: &str) -> Result<HashColumn, String> {
    let (algorithm, column) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ALGORITHM=COLUMN, got {:?}", value))?;
    Ok(HashColumn {
        algorithm: algorithm.trim().to_string(),
        column: column.trim().to_string(),
    })
}

fn progress_bar(quiet: bool) -> Option<ProgressBar> {
    if quiet || !io::stderr().is_terminal() {
        return None;
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} hashing [{bar:40}] {pos}/{len} ({eta})")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    Some(bar)
}

fn exit_code(report: &DiffReport) -> i32 {
    if report.has_discrepancies() || !report.complete {
        EXIT_DISCREPANCIES
    } else {
        EXIT_CLEAN
    }
}

fn render_report(report: &DiffReport, output: &OutputArgs, title: &str) -> anyhow::Result<()> {
    let shown: Vec<&ComparisonResult> = report
        .results
        .iter()
        .filter(|r| !output.diff_only || r.kind != ResultKind::Match)
        .collect();

    if output.json {
        let mut filtered = report.clone();
        filtered.results = shown.into_iter().cloned().collect();
        println!("{}", serde_json::to_string_pretty(&filtered)?);
        return Ok(());
    }

    if output.csv {
        let mut writer = csv::Writer::from_writer(io::stdout());
        writer.write_record(["kind", "identifier", "path", "counterpart", "detail"])?;
        for result in shown {
            writer.write_record([
                result.kind.as_str(),
                identifier_of(result),
                result.display_path(),
                result
                    .counterpart
                    .as_ref()
                    .map(|c| c.relative_path())
                    .unwrap_or(""),
                result.detail.as_str(),
            ])?;
        }
        writer.flush()?;
        return Ok(());
    }

    let use_color = !output.no_color && io::stdout().is_terminal();
    println!("\n{}", "=".repeat(80));
    println!("{}", title);
    println!("{}", "=".repeat(80));

    for result in shown {
        let (color, reset) = if use_color {
            (kind_color(result.kind), "\x1b[0m")
        } else {
            ("", "")
        };
        let identifier = identifier_of(result);
        let label = if identifier.is_empty() || identifier == result.display_path() {
            result.display_path().to_string()
        } else {
            format!("{} ({})", result.display_path(), identifier)
        };
        println!(
            "{}{:<20}{} {}  {}",
            color,
            result.kind.as_str(),
            reset,
            label,
            result.detail
        );
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }

    if let Some(header_diff) = &report.header_diff {
        if !header_diff.is_empty() {
            println!("\nHeader differences:");
            if !header_diff.left_only.is_empty() {
                println!("  Left only:  {}", header_diff.left_only.join(", "));
            }
            if !header_diff.right_only.is_empty() {
                println!("  Right only: {}", header_diff.right_only.join(", "));
            }
        }
    }

    let summary = &report.summary;
    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total results:         {}", summary.total);
    for kind in ResultKind::ALL {
        println!("  {:<22} {}", format!("{}:", kind.as_str()), summary.count(kind));
    }
    println!("  Warnings:              {}", report.warnings.len());
    if !report.complete {
        println!(
            "  INCOMPLETE: {} entries were not verified",
            report.unverified.len()
        );
    }
    println!("{}", "=".repeat(80));
    Ok(())
}

fn identifier_of(result: &ComparisonResult) -> &str {
    result
        .manifest_entry
        .as_ref()
        .map(|e| e.identifier.as_str())
        .or_else(|| result.counterpart.as_ref().map(|c| c.label()))
        .unwrap_or("")
}

fn kind_color(kind: ResultKind) -> &'static str {
    match kind {
        ResultKind::Match => "\x1b[32m",
        ResultKind::HashMismatch => "\x1b[31m",
        ResultKind::MissingOnDisk => "\x1b[33m",
        ResultKind::MissingInManifest => "\x1b[34m",
        ResultKind::DuplicateIdentifier | ResultKind::DuplicatePath => "\x1b[35m",
    }
}

fn render_inventory(diff: &InventoryDiff) {
    println!("\n{}", "=".repeat(80));
    println!("Column Inventory");
    println!("{}", "=".repeat(80));
    println!("  Rows: left {}, right {}", diff.left_rows, diff.right_rows);
    print_columns("Left only", &diff.header.left_only);
    print_columns("Right only", &diff.header.right_only);
    if !diff.count_mismatches.is_empty() {
        println!("  Populated counts that differ:");
        for mismatch in &diff.count_mismatches {
            println!(
                "    {}: left {}, right {}",
                mismatch.column, mismatch.left, mismatch.right
            );
        }
    }

    if let Some(values) = &diff.values {
        println!("  Values of {}:", values.column);
        print_values("Left only", &values.left_only);
        print_values("Right only", &values.right_only);
        for mismatch in &values.count_mismatches {
            println!(
                "    {}: left {}, right {}",
                display_value(&mismatch.value),
                mismatch.left,
                mismatch.right
            );
        }
        if !values.has_differences() {
            println!("    identical");
        }
    }

    if let Some(digests) = &diff.file_digests {
        println!(
            "  {} of load files {}: left {}, right {}",
            digests.algorithm,
            if digests.is_equal() { "equal" } else { "differ" },
            digests.left,
            digests.right
        );
    }
    println!("{}", "=".repeat(80));
}

fn print_values(label: &str, values: &[ValueCount]) {
    if values.is_empty() {
        return;
    }
    println!("    {} ({}):", label, values.len());
    for value in values {
        println!("      ({}) {}", value.count, display_value(&value.value));
    }
}

fn display_value(value: &str) -> &str {
    if value.trim().is_empty() {
        "[blank]"
    } else {
        value
    }
}

fn print_columns(label: &str, columns: &[String]) {
    if !columns.is_empty() {
        println!("  {}: {}", label, columns.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_char() {
        assert_eq!(parse_char(",").unwrap(), ',');
        assert_eq!(parse_char("\\t").unwrap(), '\t');
        assert_eq!(parse_char("U+0014").unwrap(), '\u{14}');
        assert_eq!(parse_char("0xFE").unwrap(), 'þ');
        assert_eq!(parse_char("þ").unwrap(), 'þ');
        assert!(parse_char("ab").is_err());
        assert!(parse_char("").is_err());
    }

    #[test]
    fn test_parse_hash_column() {
        let column = parse_hash_column("sha1=SHA1HASH").unwrap();
        assert_eq!(column.algorithm, "sha1");
        assert_eq!(column.column, "SHA1HASH");
        assert!(parse_hash_column("MD5SUM").is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
