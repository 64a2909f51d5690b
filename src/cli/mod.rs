//! Command-line interface for longbox.
//!
//! Provides commands for registering libraries, previewing and running
//! scans, inspecting scan jobs, and editing archive pages.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{self, ResolvedConfig};
use crate::core::ScanService;
use crate::domain::{Library, ScanJob};
use crate::store::{LibraryStore, SqliteStore};

pub mod archive;

/// longbox - comic library ingestion and archive editing
#[derive(Parser, Debug)]
#[command(name = "longbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage libraries
    Library {
        #[command(subcommand)]
        command: LibraryCommands,
    },

    /// Run a full scan (discover, clean, index, link, covers)
    Scan {
        /// Library name or ID
        library: String,

        /// Queue the scan and return without waiting
        #[arg(long)]
        no_wait: bool,
    },

    /// Show what a scan would change without applying it
    Preview {
        /// Library name or ID
        library: String,

        /// Apply the changes after showing them
        #[arg(long)]
        apply: bool,

        /// List every changed file
        #[arg(short, long)]
        verbose: bool,
    },

    /// List scan jobs, or show one
    Jobs {
        /// Job ID
        job_id: Option<String>,

        /// Only jobs for this library (name or ID)
        #[arg(short, long)]
        library: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Re-run scan jobs interrupted by a previous shutdown
    Resume,

    /// Inspect and edit comic archives
    Archive {
        #[command(subcommand)]
        command: archive::ArchiveCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum LibraryCommands {
    /// Register a library root
    Add {
        /// Display name
        name: String,

        /// Root folder to scan
        path: std::path::PathBuf,
    },

    /// List registered libraries
    List,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Library { command } => match command {
                LibraryCommands::Add { name, path } => add_library(&name, path).await,
                LibraryCommands::List => list_libraries().await,
            },
            Commands::Scan { library, no_wait } => run_scan(&library, no_wait).await,
            Commands::Preview {
                library,
                apply,
                verbose,
            } => preview(&library, apply, verbose).await,
            Commands::Jobs {
                job_id,
                library,
                limit,
            } => match job_id {
                Some(id) => show_job(&id).await,
                None => list_jobs(library.as_deref(), limit).await,
            },
            Commands::Resume => resume().await,
            Commands::Archive { command } => archive::execute(command).await,
            Commands::Config => show_config(),
        }
    }
}

fn open_store(cfg: &ResolvedConfig) -> Result<Arc<dyn LibraryStore>> {
    let store = SqliteStore::open(&cfg.database)
        .with_context(|| format!("Failed to open database {}", cfg.database.display()))?;
    Ok(Arc::new(store))
}

/// Service without a running recovery pass
fn build_service() -> Result<ScanService> {
    let cfg = config::config()?;
    Ok(ScanService::from_config(open_store(cfg)?, cfg))
}

/// Service for commands that run the scan worker; interrupted jobs resume
async fn open_service() -> Result<ScanService> {
    let cfg = config::config()?;
    ScanService::open(open_store(cfg)?, cfg).await
}

async fn resolve_library(store: &dyn LibraryStore, name_or_id: &str) -> Result<Library> {
    store
        .find_library(name_or_id)
        .await?
        .with_context(|| format!("Library not found: {}", name_or_id))
}

/// Register a new library
async fn add_library(name: &str, path: std::path::PathBuf) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Library root not found: {}", path.display()))?;
    if !root.is_dir() {
        bail!("Library root is not a directory: {}", root.display());
    }

    let store = open_store(config::config()?)?;
    let library = store.create_library(name, &root).await?;

    println!("Added library '{}'", library.name);
    println!("   ID:   {}", library.id);
    println!("   Root: {}", library.root_path.display());
    Ok(())
}

async fn list_libraries() -> Result<()> {
    let store = open_store(config::config()?)?;
    let libraries = store.list_libraries().await?;

    if libraries.is_empty() {
        println!("No libraries registered");
        return Ok(());
    }

    println!("{:<38} {:<20} {}", "ID", "NAME", "ROOT");
    println!("{}", "-".repeat(90));
    for library in libraries {
        println!(
            "{:<38} {:<20} {}",
            library.id,
            library.name,
            library.root_path.display()
        );
    }
    Ok(())
}

/// Queue a full scan and (by default) wait for it
async fn run_scan(library: &str, no_wait: bool) -> Result<()> {
    let service = open_service().await?;
    let library = resolve_library(service.store().as_ref(), library).await?;

    let job = service.scan_now(library.id).await?;
    println!("Scan queued for '{}' (job {})", library.name, job.id);

    if no_wait {
        // The worker lives in this process; nothing will run once we exit.
        println!("Run `longbox resume` to process queued jobs.");
        return Ok(());
    }

    let job = service.wait_for_job(job.id).await?;
    print_job(&job);

    // Recovered jobs from earlier runs share this worker
    service.queue().wait_idle().await;

    if let Some(error) = &job.error {
        bail!("Scan failed: {}", error);
    }
    Ok(())
}

/// Diff a library against the index, optionally applying the result
async fn preview(library: &str, apply: bool, verbose: bool) -> Result<()> {
    let service = build_service()?;
    let library = resolve_library(service.store().as_ref(), library).await?;

    let started = service.start_scan(library.id).await?;
    let s = &started.summary;

    println!("Scan of '{}' ({}ms)", library.name, s.duration_ms);
    println!("   New:       {}", s.new_files);
    println!("   Moved:     {}", s.moved_files);
    println!("   Modified:  {}", s.modified_files);
    println!("   Orphaned:  {}", s.orphaned_files);
    println!("   Unchanged: {}", s.unchanged_files);
    println!("   Orphans pending removal: {}", s.existing_orphaned_count);
    if s.errors > 0 {
        println!("   Errors:    {}", s.errors);
    }

    if verbose {
        if let Some(result) = service.pending_result(started.scan_id).await {
            for file in &result.new_files {
                println!("   + {}", file.relative_path);
            }
            for moved in &result.moved_files {
                let tag = if moved.restored { "restored" } else { "moved" };
                println!("   ~ {} -> {} ({})", moved.old_path, moved.new_path, tag);
            }
            for modified in &result.modified_files {
                println!("   * {}", modified.discovered.relative_path);
            }
            for orphan in &result.orphaned_files {
                println!("   - {}", orphan.relative_path);
            }
            for error in &result.errors {
                println!("   ! {}: {}", error.path.display(), error.message);
            }
        }
    }

    if !apply {
        service.discard_pending(started.scan_id).await;
        println!("\nRe-run with --apply to write these changes.");
        return Ok(());
    }

    let outcome = service.apply_pending(started.scan_id).await?;
    println!(
        "\nApplied: {} added, {} moved, {} updated, {} orphaned, {} removed",
        outcome.added, outcome.moved, outcome.updated, outcome.orphaned, outcome.removed
    );
    Ok(())
}

async fn show_job(job_id_str: &str) -> Result<()> {
    let job_id = Uuid::parse_str(job_id_str)
        .with_context(|| format!("Invalid job ID: {}", job_id_str))?;

    let service = build_service()?;
    let job = service.job_status(job_id).await?;
    print_job(&job);

    println!("\nLog:");
    for entry in &job.log {
        println!(
            "  {} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.stage,
            entry.message
        );
    }
    Ok(())
}

async fn list_jobs(library: Option<&str>, limit: usize) -> Result<()> {
    let store = open_store(config::config()?)?;
    let library_id = match library {
        Some(name) => Some(resolve_library(store.as_ref(), name).await?.id),
        None => None,
    };

    let jobs = store.list_scan_jobs(library_id, limit).await?;
    if jobs.is_empty() {
        println!("No scan jobs found");
        return Ok(());
    }

    println!("{:<38} {:<38} {:<12} {}", "JOB ID", "LIBRARY", "STAGE", "CREATED");
    println!("{}", "-".repeat(110));
    for job in jobs {
        println!(
            "{:<38} {:<38} {:<12} {}",
            job.id,
            job.library_id,
            job.stage,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Recover interrupted jobs and run them to completion
async fn resume() -> Result<()> {
    let service = build_service()?;
    let count = service.recover().await?;
    if count == 0 {
        println!("No interrupted scan jobs");
        return Ok(());
    }

    println!("Resuming {} scan job(s)...", count);
    service.queue().wait_idle().await;

    for item in service.queue().snapshot().history {
        let job = service.job_status(item.job_id).await?;
        println!("{}  {}", job.id, job.stage);
    }
    Ok(())
}

fn print_job(job: &ScanJob) {
    let p = &job.progress;
    println!("Job:     {}", job.id);
    println!("Library: {}", job.library_id);
    println!("Stage:   {}", job.stage);
    if let Some(started) = job.started_at {
        println!("Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = job.finished_at {
        println!("Ended:   {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &job.error {
        println!("Error:   {}", error);
    }
    println!();
    println!("  discovered {:>6}  ({} errors)", p.discovering.processed, p.discovering.errors);
    println!(
        "  cleaned    {:>6}  (+{} ~{} -{} orphaned, {} removed)",
        p.cleaning.processed, p.files_added, p.files_moved, p.files_orphaned, p.files_removed
    );
    println!("  indexed    {:>6}/{} ({} errors)", p.indexing.processed, p.indexing.total, p.indexing.errors);
    println!(
        "  linked     {:>6}/{} ({} series created)",
        p.linking.processed, p.linking.total, p.series_created
    );
    println!(
        "  covers     {:>6}/{} ({} new, {} cached)",
        p.covers.processed, p.covers.total, p.covers_extracted, p.covers_cached
    );
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("longbox configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Database:    {}", cfg.database.display());
    println!("  Cover cache: {}", cfg.cover_dir.display());
    println!();
    println!("Scan:");
    println!("  Queue capacity:  {}", cfg.scan.queue_capacity);
    println!("  Job history:     {}", cfg.scan.history_size);
    println!(
        "  Batch sizes:     index {}, link {}, covers {}",
        cfg.scan.index_batch_size, cfg.scan.link_batch_size, cfg.scan.cover_batch_size
    );
    println!("  Pending TTL:     {} min", cfg.scan.pending_ttl_minutes);
    println!("  Hash on scan:    {}", cfg.scan.include_hash);
    println!("  Ignore patterns: {}", cfg.scan.ignore_patterns.join(", "));

    Ok(())
}
