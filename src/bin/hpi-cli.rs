//! hpi-cli - Command-line interface for HPI archives
//!
//! Lists, extracts, packs and merges HPI archives, and reports duplicate
//! content across folders and archives.

use clap::{Parser, Subcommand};
use hpi::{
    build_archive, build_many, extract_entries, find_duplicates, scan_inputs, Archive,
    CompressionFlavor, DuplicateMap, PathMap, Source, SourceMap,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "hpi-cli")]
#[command(about = "A CLI tool for reading and building HPI archives")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the files in an archive
    List {
        /// Archive to list
        archive: PathBuf,
    },

    /// Extract files from an archive
    Extract {
        /// Archive to read
        archive: PathBuf,

        /// Destination directory
        output: PathBuf,

        /// Only extract these paths (default: everything)
        paths: Vec<String>,
    },

    /// Build an archive from folders and archives; later inputs win
    Pack {
        /// Output archive
        #[arg(short, long)]
        output: PathBuf,

        /// Input folders or archives
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// store, deflate, zopfli or zopfli-i<N>
        #[arg(short, long, default_value = "deflate")]
        flavor: CompressionFlavor,

        /// Store identical files separately
        #[arg(long)]
        no_dedup: bool,

        /// Force overwrite of output file
        #[arg(long)]
        force: bool,
    },

    /// Build several archives in parallel
    Merge {
        /// Targets as OUTPUT=INPUT[,INPUT...]
        #[arg(required = true)]
        targets: Vec<String>,

        /// store, deflate, zopfli or zopfli-i<N>
        #[arg(short, long, default_value = "deflate")]
        flavor: CompressionFlavor,
    },

    /// Report files with identical content
    Dups {
        /// Input folders or archives
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::List { archive } => list(&archive),
        Commands::Extract {
            archive,
            output,
            paths,
        } => extract(&archive, &output, &paths, cli.quiet),
        Commands::Pack {
            output,
            inputs,
            flavor,
            no_dedup,
            force,
        } => pack(&output, &inputs, flavor, no_dedup, force, cli.quiet),
        Commands::Merge { targets, flavor } => merge(&targets, flavor, cli.quiet),
        Commands::Dups { inputs } => dups(&inputs),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string())
    };
    pretty_env_logger::formatted_builder()
        .parse_filters(&filter)
        .init();
}

fn progress_bar(len: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = if len == 0 {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::new(len)
    };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn list(archive: &Path) -> CliResult {
    let archive = Archive::open(archive)?;
    let mut total = (0u64, 0u64);
    for (path, info) in archive.summaries() {
        println!(
            "{:>10} {:>10} {:>6.1}%  {}",
            info.uncompressed_size,
            info.compressed_size,
            info.ratio * 100.0,
            path
        );
        total.0 += info.uncompressed_size;
        total.1 += info.compressed_size;
    }
    println!(
        "{:>10} {:>10}          {} files{}",
        total.0,
        total.1,
        archive.len(),
        if archive.is_encrypted() { " (obfuscated)" } else { "" }
    );
    Ok(())
}

/// Requested archive paths, normalised so any separator or casing matches
fn selection(paths: &[String]) -> hpi::Result<PathMap<()>> {
    let mut wanted = PathMap::new();
    for path in paths {
        wanted.insert(path, ())?;
    }
    Ok(wanted)
}

fn extract(archive_path: &Path, output: &Path, paths: &[String], quiet: bool) -> CliResult {
    let wanted = selection(paths)?;
    let archive = Archive::open(archive_path)?;
    let mut sources = SourceMap::new();
    for (path, _) in archive.entries() {
        if wanted.is_empty() || wanted.contains(path) {
            sources.insert(path, Source::Archive(archive_path.to_path_buf()))?;
        }
    }
    drop(archive);

    let start = Instant::now();
    let pb = progress_bar(sources.len() as u64, quiet);
    let count = extract_entries(&sources, output, |path| {
        pb.set_message(path.to_string());
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    if !quiet {
        println!("Extracted {} files in {:.2?}", count, start.elapsed());
    }
    Ok(())
}

fn pack(
    output: &Path,
    inputs: &[PathBuf],
    flavor: CompressionFlavor,
    no_dedup: bool,
    force: bool,
    quiet: bool,
) -> CliResult {
    if output.exists() && !force {
        return Err(format!(
            "Output file '{}' already exists. Use --force to overwrite",
            output.display()
        )
        .into());
    }

    let start = Instant::now();
    let sources = scan_inputs(inputs)?;
    debug!("{} files from {} inputs", sources.len(), inputs.len());

    let empty = DuplicateMap::new();
    let duplicates = if no_dedup { Some(&empty) } else { None };

    let pb = progress_bar(0, quiet);
    let report = build_archive(&sources, output, flavor, duplicates, |event| {
        pb.set_message(event.to_string());
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }
    if !quiet {
        let ratio = if report.input_bytes == 0 {
            100.0
        } else {
            report.output_bytes as f64 / report.input_bytes as f64 * 100.0
        };
        println!("✓ Wrote {}", output.display());
        println!("  Files:      {}", report.files_written);
        println!("  Duplicates: {}", report.duplicates);
        println!("  Input:      {} bytes", report.input_bytes);
        println!("  Output:     {} bytes", report.output_bytes);
        println!("  Ratio:      {:.1}%", ratio);
        println!("  Time:       {:.2?}", start.elapsed());
    }
    Ok(())
}

fn merge(targets: &[String], flavor: CompressionFlavor, quiet: bool) -> CliResult {
    let mut plan = BTreeMap::new();
    for target in targets {
        let (output, inputs) = target
            .split_once('=')
            .ok_or_else(|| format!("expected OUTPUT=INPUT[,INPUT...], got '{}'", target))?;
        let inputs: Vec<&str> = inputs.split(',').filter(|s| !s.is_empty()).collect();
        plan.insert(PathBuf::from(output), scan_inputs(&inputs)?);
    }

    let pb = progress_bar(0, quiet);
    let results = build_many(&plan, flavor, |event| {
        pb.set_message(event.to_string());
        pb.inc(1);
    });
    pb.finish_and_clear();

    let mut failed = 0;
    for (output, result) in &results {
        match result {
            Ok(report) => {
                if !quiet {
                    println!(
                        "✓ {}: {} files, {} duplicates, {} bytes",
                        output.display(),
                        report.files_written,
                        report.duplicates,
                        report.output_bytes
                    );
                }
                for warning in &report.warnings {
                    eprintln!("Warning: {}: {}", output.display(), warning);
                }
            }
            Err(e) => {
                eprintln!("✗ {}: {}", output.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} archives failed", failed, results.len()).into());
    }
    Ok(())
}

fn dups(inputs: &[PathBuf]) -> CliResult {
    let sources = scan_inputs(inputs)?;
    let duplicates = find_duplicates(&sources)?;
    for (path, canonical) in duplicates.iter() {
        println!("{} -> {}", path, canonical);
    }
    println!("{} duplicates among {} files", duplicates.len(), sources.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_normalises_paths() {
        let wanted = selection(&["Units\\ARMCOM.fbi".to_string(), "maps/big.tnt/".to_string()])
            .unwrap();
        assert!(wanted.contains("units/armcom.fbi"));
        assert!(wanted.contains("maps/big.tnt"));
        assert!(!wanted.contains("maps/other.tnt"));
        assert!(selection(&[]).unwrap().is_empty());
        assert!(selection(&["../etc/passwd".to_string()]).is_err());
    }
}
