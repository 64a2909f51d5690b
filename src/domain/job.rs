//! Scan job state.
//!
//! A ScanJob is the persisted record of one orchestrated library scan. The
//! orchestrator mutates it at every stage boundary; the log is append-only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a scan job currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    /// Persisted and submitted to the queue, not yet picked up
    Queued,
    Discovering,
    Cleaning,
    Indexing,
    Linking,
    Covers,
    Complete,
    Cancelled,
    Failed,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Queued => "queued",
            ScanStage::Discovering => "discovering",
            ScanStage::Cleaning => "cleaning",
            ScanStage::Indexing => "indexing",
            ScanStage::Linking => "linking",
            ScanStage::Covers => "covers",
            ScanStage::Complete => "complete",
            ScanStage::Cancelled => "cancelled",
            ScanStage::Failed => "failed",
        }
    }

    /// Complete, cancelled or failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStage::Complete | ScanStage::Cancelled | ScanStage::Failed
        )
    }

    /// One of the five pipeline stages
    pub fn is_running(&self) -> bool {
        !self.is_terminal() && *self != ScanStage::Queued
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ScanStage::Queued),
            "discovering" => Ok(ScanStage::Discovering),
            "cleaning" => Ok(ScanStage::Cleaning),
            "indexing" => Ok(ScanStage::Indexing),
            "linking" => Ok(ScanStage::Linking),
            "covers" => Ok(ScanStage::Covers),
            "complete" => Ok(ScanStage::Complete),
            "cancelled" => Ok(ScanStage::Cancelled),
            "failed" => Ok(ScanStage::Failed),
            other => Err(format!("unknown scan stage: {}", other)),
        }
    }
}

/// Queue operation kind for scan jobs: the stage a job starts (or resumes) at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOperation {
    Discover,
    Clean,
    Index,
    Link,
    Covers,
}

impl ScanOperation {
    /// Pipeline order
    pub const ALL: [ScanOperation; 5] = [
        ScanOperation::Discover,
        ScanOperation::Clean,
        ScanOperation::Index,
        ScanOperation::Link,
        ScanOperation::Covers,
    ];

    /// Stage a job is in while this operation runs
    pub fn stage(&self) -> ScanStage {
        match self {
            ScanOperation::Discover => ScanStage::Discovering,
            ScanOperation::Clean => ScanStage::Cleaning,
            ScanOperation::Index => ScanStage::Indexing,
            ScanOperation::Link => ScanStage::Linking,
            ScanOperation::Covers => ScanStage::Covers,
        }
    }

    /// Operation to resume a job at, given its last persisted stage.
    ///
    /// Queued jobs restart from discovery; terminal jobs have nothing to resume.
    pub fn resume_from(stage: ScanStage) -> Option<ScanOperation> {
        match stage {
            ScanStage::Queued | ScanStage::Discovering => Some(ScanOperation::Discover),
            ScanStage::Cleaning => Some(ScanOperation::Clean),
            ScanStage::Indexing => Some(ScanOperation::Index),
            ScanStage::Linking => Some(ScanOperation::Link),
            ScanStage::Covers => Some(ScanOperation::Covers),
            ScanStage::Complete | ScanStage::Cancelled | ScanStage::Failed => None,
        }
    }

    /// Operations from this one to the end of the pipeline
    pub fn remaining(self) -> impl Iterator<Item = ScanOperation> {
        Self::ALL.into_iter().skip_while(move |op| *op != self)
    }
}

impl fmt::Display for ScanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanOperation::Discover => "discover",
            ScanOperation::Clean => "clean",
            ScanOperation::Index => "index",
            ScanOperation::Link => "link",
            ScanOperation::Covers => "covers",
        };
        f.write_str(name)
    }
}

/// Counters for a single stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub processed: u64,
    pub total: u64,
    pub errors: u64,
}

/// Progress of every stage of a scan job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub discovering: StageProgress,
    pub cleaning: StageProgress,
    pub indexing: StageProgress,
    pub linking: StageProgress,
    pub covers: StageProgress,

    /// Records inserted by the cleaning stage
    pub files_added: u64,
    /// Records whose path was updated
    pub files_moved: u64,
    /// Records newly marked orphaned
    pub files_orphaned: u64,
    /// Records hard-deleted
    pub files_removed: u64,
    /// Series created while linking
    pub series_created: u64,
    pub covers_extracted: u64,
    pub covers_cached: u64,
}

/// A line in a scan job's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: ScanStage,
    pub message: String,
}

/// Persisted record of one orchestrated scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,

    /// Library being scanned
    pub library_id: Uuid,

    /// Current stage
    pub stage: ScanStage,

    pub progress: ScanProgress,

    /// Append-only log
    pub log: Vec<JobLogEntry>,

    /// Error message when failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    /// Create a new queued job for a library
    pub fn new(library_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            stage: ScanStage::Queued,
            progress: ScanProgress::default(),
            log: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Append a log entry for the current stage
    pub fn log(&mut self, message: impl Into<String>) {
        self.log.push(JobLogEntry {
            timestamp: Utc::now(),
            stage: self.stage,
            message: message.into(),
        });
    }

    /// Move to a new stage and log the transition
    pub fn enter_stage(&mut self, stage: ScanStage) {
        self.stage = stage;
        if stage.is_running() && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if stage.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.log(format!("Entered stage {}", stage));
    }

    /// Mark the job failed with an error message
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.enter_stage(ScanStage::Failed);
        self.log(format!("Failed: {}", error));
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }
}
