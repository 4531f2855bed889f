//! Main entry point for the rnsp CLI application.
//!
//! This binary provides a command-line interface for listing and
//! stream-installing NSP (PFS0) content from both local files and remote
//! HTTP URLs.

use anyhow::{Result, anyhow};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rnsp::install::{FileContentStore, StreamJob, StreamOptions, begin_stream};
use rnsp::{Cli, ContentId, HttpRangeFetcher, LocalFileFetcher, Pfs0Directory, Pfs0FileEntry, RangeFetch};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate handler
/// based on whether the input is a local file or HTTP URL.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.is_http_url() {
        // Handle remote NSP via HTTP Range requests
        let fetcher = HttpRangeFetcher::new(cli.file.clone()).await?;
        let transferred_before = fetcher.transferred_bytes();
        let fetcher = Arc::new(fetcher);

        process_nsp(fetcher.clone(), &cli).await?;

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            let transferred = fetcher.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        // Handle local NSP file
        let fetcher = Arc::new(LocalFileFetcher::new(Path::new(&cli.file))?);
        process_nsp(fetcher, &cli).await?;
    }

    Ok(())
}

/// Process an NSP container based on CLI options.
///
/// List mode (`-l` or `-v`) displays the directory; otherwise the selected
/// entries are streamed into placeholders under the output directory.
async fn process_nsp<R: RangeFetch + 'static>(fetcher: Arc<R>, cli: &Cli) -> Result<()> {
    let mut directory = Pfs0Directory::new(fetcher);
    directory.retrieve_header().await?;

    if cli.list || cli.verbose {
        return list_entries(&directory, cli.verbose);
    }

    let output_dir = cli.output_dir.clone().unwrap_or_else(|| ".".to_string());
    let store = Arc::new(FileContentStore::new(output_dir)?);
    let options = StreamOptions {
        segment_size: cli.segment_size,
        window_segments: cli.window_segments,
    };

    for (id, entry, name) in resolve_targets(&directory, cli)? {
        if !cli.is_quiet() {
            println!("Installing {} ({})", name, format_size(entry.file_size));
        }
        let job = begin_stream(&directory, Arc::clone(&store), id, entry, options).await?;
        run_with_progress(job, cli.is_quiet()).await?;
    }

    Ok(())
}

/// List entries in the container.
fn list_entries<R: RangeFetch>(directory: &Pfs0Directory<R>, verbose: bool) -> Result<()> {
    let entries = directory.entries()?;

    if verbose {
        println!("{:>12}  {:>12}  Name", "Size", "Offset");
        println!("{}", "-".repeat(50));
    }

    let mut total_size = 0u64;
    for (name, entry) in &entries {
        if verbose {
            println!("{:>12}  {:>12}  {}", entry.file_size, entry.data_offset, name);
            total_size += entry.file_size;
        } else {
            println!("{name}");
        }
    }

    if verbose {
        println!("{}", "-".repeat(50));
        println!("{:>12}  {:>12}  {} files", total_size, "", entries.len());
    }

    Ok(())
}

/// Work out which entries to install: an explicit content id, explicit
/// entry names, or by default every content entry in the package.
fn resolve_targets<R: RangeFetch>(
    directory: &Pfs0Directory<R>,
    cli: &Cli,
) -> Result<Vec<(ContentId, Pfs0FileEntry, String)>> {
    let mut targets = Vec::new();

    if let Some(hex) = &cli.content_id {
        let id: ContentId = hex.parse()?;
        let entry = directory
            .entry_by_content_id(&id)?
            .ok_or_else(|| anyhow!("no content entry for id {id}"))?;
        let name = directory.name_of(&entry)?;
        targets.push((id, entry, name));
    }

    if !cli.entries.is_empty() {
        for name in &cli.entries {
            let entry = directory
                .entry_by_name(name)?
                .ok_or_else(|| anyhow!("no entry named {name}"))?;
            let id = content_id_of(name)
                .ok_or_else(|| anyhow!("entry {name} is not content (expected <hex>.nca)"))?;
            targets.push((id, entry, name.clone()));
        }
    } else if cli.content_id.is_none() {
        for (name, entry) in directory.entries()? {
            match content_id_of(&name) {
                Some(id) => targets.push((id, entry, name)),
                None => {
                    if !cli.is_quiet() {
                        eprintln!("Skipping: {name} (not a content entry)");
                    }
                }
            }
        }
    }

    Ok(targets)
}

/// Parse the content id out of an entry name like `"<hex>.nca"`.
fn content_id_of(name: &str) -> Option<ContentId> {
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    stem.parse().ok()
}

/// Drive one stream to completion, rendering the two progress phases as
/// re-rendered-in-place lines.
async fn run_with_progress(job: StreamJob, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(job.join().await?);
    }

    let staging = job.progress();
    let total_mb = staging.total_bytes() / 1_000_000;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_buffered = 0u64;
    let mut last_tick = Instant::now();
    let mut speed = 0.0f64;
    let mut rendered = false;

    // Download phase: throughput derived from bytes-buffered deltas.
    while !staging.is_buffer_complete() && !job.is_finished() {
        ticker.tick().await;

        let buffered = staging.buffered_bytes();
        let elapsed = last_tick.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            speed = (buffered - last_buffered) as f64 / 1_000_000.0 / elapsed;
        }
        last_buffered = buffered;
        last_tick = Instant::now();

        print!(
            "\r> Download progress: {}/{} MB ({}%) ({:.2} MB/s)",
            buffered / 1_000_000,
            total_mb,
            percent(buffered, staging.total_bytes()),
            speed
        );
        std::io::stdout().flush().ok();
        rendered = true;
    }
    if rendered {
        println!();
        rendered = false;
    }

    // Install phase: bytes committed to the placeholder.
    while !staging.is_commit_complete() && !job.is_finished() {
        ticker.tick().await;

        let committed = staging.committed_bytes();
        print!(
            "\r> Install progress: {}/{} MB ({}%)",
            committed / 1_000_000,
            total_mb,
            percent(committed, staging.total_bytes())
        );
        std::io::stdout().flush().ok();
        rendered = true;
    }
    if rendered {
        println!();
    }

    Ok(job.join().await?)
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        ((done as f64 / total as f64) * 100.0) as u64
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
