//! safe_unpack CLI - recursive sandboxed unpacking
//!
//! # Examples
//!
//! ```bash
//! # Unpack and print the tree of extracted files
//! safe_unpack sample.zip
//!
//! # Custom password and limits
//! safe_unpack sample.7z --password s3cret --max-size 100M --timeout 30
//!
//! # Keep the extracted files under a chosen directory
//! safe_unpack sample.zip --scratch /tmp/triage --keep
//!
//! # Generate shell completions
//! safe_unpack --completions bash > ~/.bash_completion.d/safe_unpack
//! ```

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use safe_unpack::{Error, Limits, Node, NodeKind, Unpacked, Unpacker};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "safe_unpack",
    about = "Sandboxed recursive archive unpacking - detects, extracts and walks nested archives",
    version,
    after_help = "EXAMPLES:
    safe_unpack sample.zip
    safe_unpack sample.7z --password s3cret --timeout 30
    safe_unpack sample.zip --scratch /tmp/triage --keep"
)]
struct Cli {
    /// File to unpack
    #[arg(required_unless_present = "completions")]
    file: Option<PathBuf>,

    /// Archive password (empty: each format's default)
    #[arg(short, long)]
    password: Option<String>,

    /// Extraction program (default: first of 7zz, 7z, 7za on PATH)
    #[arg(long)]
    program: Option<PathBuf>,

    /// Directory that receives the per-archive destination directories
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Keep extracted files instead of deleting them on exit
    #[arg(long)]
    keep: bool,

    /// Generate shell completions for the specified shell
    #[arg(long, value_enum)]
    completions: Option<Shell>,

    /// Wall-clock limit per extraction, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum total size per extraction (e.g., 100M, 1G)
    #[arg(long, value_parser = parse_size)]
    max_size: Option<u64>,

    /// Maximum number of files per extraction
    #[arg(long)]
    max_files: Option<usize>,

    /// Maximum size of a single extracted file (e.g., 50M)
    #[arg(long, value_parser = parse_size)]
    max_single_file: Option<u64>,

    /// Maximum directory depth inside an archive
    #[arg(long)]
    max_depth: Option<usize>,

    /// Maximum archive nesting level
    #[arg(long)]
    max_nesting: Option<usize>,

    /// Refuse to run when the kernel cannot confine the program's writes
    #[arg(long)]
    require_confinement: bool,

    /// Leave extracted paths matching glob patterns out of the tree (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclude_patterns: Vec<String>,

    /// Quiet mode - only show errors
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    let (num, multiplier) = if s.ends_with("G") || s.ends_with("GB") {
        let num_str = s.trim_end_matches("GB").trim_end_matches('G');
        (num_str, 1024 * 1024 * 1024)
    } else if s.ends_with("M") || s.ends_with("MB") {
        let num_str = s.trim_end_matches("MB").trim_end_matches('M');
        (num_str, 1024 * 1024)
    } else if s.ends_with("K") || s.ends_with("KB") {
        let num_str = s.trim_end_matches("KB").trim_end_matches('K');
        (num_str, 1024)
    } else {
        (s.as_str(), 1)
    };

    let n = num
        .parse::<u64>()
        .map_err(|_| format!("Invalid size: {}", s))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("Size too large: {}", s))
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "safe_unpack=debug"
    } else if cli.quiet {
        "safe_unpack=error"
    } else {
        "safe_unpack=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate(shell, &mut Cli::command(), "safe_unpack", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    init_logging(&cli);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", format_error(&e));
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let Some(file) = cli.file.as_ref() else {
        return Ok(());
    };

    let defaults = Limits::default();
    let limits = Limits {
        max_total_bytes: cli.max_size.unwrap_or(defaults.max_total_bytes),
        max_file_count: cli.max_files.unwrap_or(defaults.max_file_count),
        max_single_file: cli.max_single_file.unwrap_or(defaults.max_single_file),
        max_path_depth: cli.max_depth.unwrap_or(defaults.max_path_depth),
        timeout: cli
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        max_nesting: cli.max_nesting.unwrap_or(defaults.max_nesting),
    };

    let mut unpacker = match &cli.program {
        Some(program) => Unpacker::with_program(program),
        None => Unpacker::new()?,
    }
    .limits(limits)
    .require_confinement(cli.require_confinement)
    .exclude_glob(cli.exclude_patterns.as_slice());

    if let Some(password) = &cli.password {
        unpacker = unpacker.password(password);
    }
    if let Some(scratch) = &cli.scratch {
        unpacker = unpacker.scratch_dir(scratch);
    }

    let unpacked = unpacker.unpack_file(file)?;

    if !cli.quiet {
        print_report(&unpacked, file);
    }

    if cli.keep {
        for dir in unpacked.persist() {
            println!("kept {}", dir.display());
        }
    }

    Ok(())
}

fn print_report(unpacked: &Unpacked, file: &std::path::Path) {
    match unpacked.format {
        Some(format) => println!("{} [{}] {}", file.display(), format, unpacked.sha256),
        None => {
            println!("{} is not a recognised archive", file.display());
            return;
        }
    }

    for node in &unpacked.children {
        print_node(node, 1);
    }

    let stats = &unpacked.stats;
    println!();
    println!(
        "{} files, {} archives, {} duplicates, {} failures, {} entries removed",
        stats.files, stats.archives, stats.duplicates, stats.failures, stats.violations
    );
}

fn print_node(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    let format = node
        .format
        .map(|f| format!(" [{}]", f))
        .unwrap_or_default();
    let note = match &node.kind {
        NodeKind::Duplicate { of } => format!(" (duplicate of {})", of.display()),
        NodeKind::Failed { reason } => format!(" (failed: {})", reason),
        _ => String::new(),
    };
    println!(
        "{}{}{} {:>10}  {}{}",
        indent,
        node.name,
        format,
        format_bytes(node.size),
        &node.sha256[..12.min(node.sha256.len())],
        note
    );
    for child in node.children() {
        print_node(child, depth + 1);
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1}G", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1}M", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1}K", bytes as f64 / 1024.0)
    } else {
        format!("{}B", bytes)
    }
}

fn format_error(e: &Error) -> String {
    match e {
        Error::ProgramNotFound { candidates } => {
            format!(
                "No 7-Zip binary found (tried {}); pass --program",
                candidates
            )
        }
        Error::Spawn { program, source } => {
            format!("Cannot run '{}': {}", program, source)
        }
        _ => e.to_string(),
    }
}
