//! flatlens - Verify and annotate FlatBuffers binaries
//!
//! This tool checks untrusted FlatBuffers against a compiled binary schema
//! (`.bfbs`) and writes annotated hex dumps (`.afb`) explaining every byte.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use flatlens_core::{
    Annotator, AnnotatorConfig, BufferOptions, Schema, TextConfig, TextRenderer, VerifierOptions,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Verify and annotate FlatBuffers binaries against a binary schema
#[derive(Parser, Debug)]
#[command(name = "flatlens")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check buffers for structural soundness
    Verify(VerifyArgs),
    /// Write an annotated hex dump of buffers
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Compiled binary schema (.bfbs)
    #[arg(short, long)]
    schema: PathBuf,

    /// Buffers to verify
    #[arg(required = true)]
    buffers: Vec<PathBuf>,

    /// Buffers start with a 32-bit size prefix
    #[arg(long)]
    size_prefixed: bool,

    /// Expected 4-character file identifier (defaults to the schema's)
    #[arg(long, value_parser = parse_identifier)]
    identifier: Option<[u8; 4]>,

    /// Maximum table nesting depth
    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Maximum number of tables visited per buffer
    #[arg(long, default_value_t = 1_000_000)]
    max_tables: usize,

    /// Skip scalar alignment checks
    #[arg(long)]
    no_alignment: bool,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// Compiled binary schema (.bfbs)
    #[arg(short, long)]
    schema: PathBuf,

    #[command(flatten)]
    input: InputMode,

    /// Output directory for .afb files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Bytes shown per line
    #[arg(long, default_value_t = 8)]
    bytes_per_line: usize,

    /// Abbreviate long vectors
    #[arg(long)]
    no_vector_contents: bool,

    /// Buffers start with a 32-bit size prefix
    #[arg(long)]
    size_prefixed: bool,

    /// Dry run - don't write files, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files without prompting
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single buffer to annotate
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of buffers to process
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct AnnotateStats {
    processed: usize,
    with_errors: usize,
    written: usize,
}

impl AnnotateStats {
    fn print_summary(&self) {
        info!(
            "Summary: {} annotated, {} with errors, {} written",
            self.processed, self.with_errors, self.written
        );
    }
}

/// Parses a file identifier of exactly four ASCII characters
fn parse_identifier(s: &str) -> std::result::Result<[u8; 4], String> {
    if !s.is_ascii() {
        return Err(format!("identifier '{s}' is not ASCII"));
    }
    s.as_bytes()
        .try_into()
        .map_err(|_| format!("identifier '{s}' must be exactly 4 characters"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Verify(args) => run_verify(args),
        Command::Annotate(args) => run_annotate(args, cli.verbose),
    }
}

fn load_schema(path: &Path) -> Result<Schema> {
    let schema = Schema::load(path)
        .with_context(|| format!("Failed to load schema: {}", path.display()))?;
    debug!(
        "Loaded schema {} ({} objects, {} enums)",
        path.display(),
        schema.objects().len(),
        schema.enums().len()
    );
    Ok(schema)
}

fn read_buffer(path: &Path) -> flatlens_core::Result<Vec<u8>> {
    trace!("Reading {}", path.display());
    fs::read(path).map_err(|e| flatlens_core::Error::file_read(path, e))
}

/// Verify each buffer and report one line per file
fn run_verify(args: &VerifyArgs) -> Result<()> {
    let schema = load_schema(&args.schema)?;

    let limits = VerifierOptions::for_schema(&schema)
        .max_depth(args.max_depth)
        .max_tables(args.max_tables)
        .check_alignment(!args.no_alignment);
    let mut opts = BufferOptions::new().size_prefixed(args.size_prefixed);
    if let Some(ident) = args.identifier.or_else(|| schema.file_identifier()) {
        opts = opts.identifier(ident);
    }

    let mut failed = 0;
    for path in &args.buffers {
        let data = match read_buffer(path) {
            Ok(data) => data,
            Err(e) if e.is_recoverable() => {
                println!("FAILED {}: {}", path.display(), e);
                failed += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match flatlens_core::try_verify(&schema, &data, &opts, limits) {
            Ok(()) => println!("OK {}", path.display()),
            Err(e) => {
                println!("FAILED {}: {}", path.display(), e);
                if e.is_limit() {
                    warn!(
                        "{} hit a verifier limit; raise --max-depth or --max-tables if the buffer is trusted",
                        path.display()
                    );
                }
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!(
            "{} of {} buffer(s) failed verification",
            failed,
            args.buffers.len()
        );
    }
    Ok(())
}

fn run_annotate(args: &AnnotateArgs, verbose: u8) -> Result<()> {
    let schema = load_schema(&args.schema)?;
    let mut stats = AnnotateStats::default();

    if let Some(ref file) = args.input.file {
        if !file.is_file() {
            bail!("Input path is not a file: {}", file.display());
        }
        let output_path = output_path(&args.output, file, None);
        annotate_buffer(args, &schema, file, &output_path, verbose, &mut stats)?;
    } else if let Some(ref directory) = args.input.directory {
        annotate_directory(args, &schema, directory, verbose, &mut stats)?;
    } else {
        bail!("Either --file or --directory must be specified")
    }

    if !args.dry_run {
        stats.print_summary();
    }
    Ok(())
}

/// Annotate every buffer under a directory, recursively
fn annotate_directory(
    args: &AnnotateArgs,
    schema: &Schema,
    directory: &Path,
    verbose: u8,
    stats: &mut AnnotateStats,
) -> Result<()> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        if !is_likely_buffer(path) {
            trace!("Skipping non-buffer: {}", path.display());
            continue;
        }

        let output_path = output_path(&args.output, path, Some(directory));
        if let Err(e) = annotate_buffer(args, schema, path, &output_path, verbose, stats) {
            // Log error but continue with other files
            warn!("Error processing {}: {}", path.display(), e);
        }
    }

    Ok(())
}

/// Skips schemas, earlier output and obvious text files
fn is_likely_buffer(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return true;
    };
    let skip_extensions = [
        "afb", "bfbs", "fbs", "txt", "md", "json", "yaml", "yml", "toml", "rs", "log",
    ];
    !skip_extensions.contains(&ext.to_lowercase().as_str())
}

/// `<output>/<relative dir>/<stem>.afb`, keeping the layout below `root`
fn output_path(output: &Path, input: &Path, root: Option<&Path>) -> PathBuf {
    let relative = root
        .and_then(|r| input.strip_prefix(r).ok())
        .map(Path::to_path_buf)
        .or_else(|| input.file_name().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("buffer"));
    output.join(relative).with_extension("afb")
}

fn annotate_buffer(
    args: &AnnotateArgs,
    schema: &Schema,
    input: &Path,
    output_path: &Path,
    verbose: u8,
    stats: &mut AnnotateStats,
) -> Result<()> {
    let data = read_buffer(input)?;
    trace!("Read {} bytes from {}", data.len(), input.display());

    let config = AnnotatorConfig::new().size_prefixed(args.size_prefixed);
    let annotations = Annotator::new(schema, &data).with_config(config).annotate();
    stats.processed += 1;

    let errors = annotations.errors().count();
    if errors > 0 {
        warn!("{} has {} error region(s)", input.display(), errors);
        stats.with_errors += 1;
    }

    let text_config = TextConfig::new()
        .max_bytes_per_line(args.bytes_per_line)
        .include_vector_contents(!args.no_vector_contents);
    let content = TextRenderer::new(&annotations, &data)
        .with_config(text_config)
        .with_files(
            args.schema.display().to_string(),
            input.display().to_string(),
        )
        .render();

    if args.dry_run {
        println!("Would write: {}", output_path.display());
        if verbose > 0 {
            println!("---");
            println!("{}", content);
            println!("---");
        }
        return Ok(());
    }

    match write_afb_file(output_path, &content, args.force) {
        Ok(()) => {
            println!("Wrote {}", output_path.display());
            stats.written += 1;
        }
        Err(e) => {
            error!("Failed to write {}: {}", output_path.display(), e);
        }
    }
    Ok(())
}

/// Write an annotation file, refusing to clobber without `force`
fn write_afb_file(output_path: &Path, content: &str, force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier("MONS"), Ok(*b"MONS"));
        assert!(parse_identifier("MON").is_err());
        assert!(parse_identifier("MONST").is_err());
        assert!(parse_identifier("MÖN").is_err());
    }

    #[test]
    fn test_output_path() {
        let out = Path::new("/out");
        assert_eq!(
            output_path(out, Path::new("/data/monster.bin"), None),
            PathBuf::from("/out/monster.afb")
        );
        assert_eq!(
            output_path(out, Path::new("/data/sub/a.bin"), Some(Path::new("/data"))),
            PathBuf::from("/out/sub/a.afb")
        );
        assert_eq!(
            output_path(out, Path::new("/data/raw"), None),
            PathBuf::from("/out/raw.afb")
        );
    }

    #[test]
    fn test_is_likely_buffer() {
        assert!(is_likely_buffer(Path::new("/tmp/monster.bin")));
        assert!(is_likely_buffer(Path::new("/tmp/monster")));
        assert!(!is_likely_buffer(Path::new("/tmp/monster.afb")));
        assert!(!is_likely_buffer(Path::new("/tmp/schema.BFBS")));
    }

    #[test]
    fn test_write_afb_file_respects_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("out.afb");

        write_afb_file(&path, "first", false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        let err = write_afb_file(&path, "second", false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");

        write_afb_file(&path, "second", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_read_buffer_missing_is_recoverable() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_buffer(&temp_dir.path().join("missing.bin")).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
