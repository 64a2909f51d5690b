//! longbox - comic library ingestion and archive mutation engine
//!
//! Keeps a persisted index of comic archives in sync with folders on disk
//! and edits archive pages in place without risking the original.
//!
//! # Architecture
//!
//! - Archives are listed through a modification-time keyed cache and
//!   rewritten behind a `.bak` backup that is restored on failure
//! - Scans propose changes (new, moved, modified, orphaned) before anything
//!   is written; orphans are only deleted after two consecutive misses
//! - Full scans run as jobs on a single-worker queue, through five stages
//!   whose progress is persisted so interrupted jobs resume where they were
//!
//! # Modules
//!
//! - `archive`: Format detection, listing, page reorder/delete
//! - `scanner`: Discovery, diff, apply, pending scans
//! - `queue`: Bounded job queue with cooperative cancellation
//! - `core`: Scan orchestrator and service
//! - `collaborators`: Metadata, series linking and cover traits
//! - `store`: Persistence trait and SQLite implementation
//! - `domain`: Records (Library, ComicFile, Series, ScanJob)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register and scan a library
//! longbox library add comics ~/Comics
//! longbox scan comics
//!
//! # See what changed on disk without writing
//! longbox preview comics --verbose
//!
//! # Reorder pages of an archive
//! longbox archive reorder book.cbz "d.jpg=0" "c.jpg=1"
//! ```

pub mod archive;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod domain;
pub mod queue;
pub mod scanner;
pub mod store;

// Re-export main types at crate root for convenience
pub use archive::{ArchiveError, ArchiveFormat, ArchiveListing, PageMutationResult};
pub use core::{ScanOrchestrator, ScanService};
pub use domain::{ComicFile, FileStatus, Library, ScanJob, ScanOperation, ScanStage, Series};
pub use queue::{CancelToken, JobQueue, QueueError};
pub use scanner::{ScanError, ScanResult, Scanner};
pub use store::{LibraryStore, SqliteStore, StoreError};
