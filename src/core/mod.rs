//! Scan orchestration.
//!
//! - ScanOrchestrator: runs a scan job through its five stages
//! - ScanService: preview/apply flow, queued scans, cancellation, recovery

pub mod orchestrator;
pub mod service;

pub use orchestrator::{BatchSizes, ScanOrchestrator};
pub use service::{ScanService, StartedScan, StoreRecovery};
