//! Domain types for the library engine.
//!
//! This module contains the core data structures:
//! - Library, ComicFile, Series: persisted index records
//! - ScanJob: orchestrated scan state and progress

pub mod comic;
pub mod job;

// Re-export commonly used types
pub use comic::{ComicFile, FileStatus, Library, Series};
pub use job::{JobLogEntry, ScanJob, ScanOperation, ScanProgress, ScanStage, StageProgress};
