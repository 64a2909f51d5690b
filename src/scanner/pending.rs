//! Scan results held for confirmation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ScanResult;

/// A scan result waiting to be applied or discarded
#[derive(Debug, Clone)]
pub struct PendingScan {
    pub scan_id: Uuid,
    pub result: ScanResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingScan {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Holds unconfirmed scan results keyed by scan id
#[async_trait]
pub trait PendingScanStore: Send + Sync {
    /// Hold a result; returns the new scan id
    async fn insert(&self, result: ScanResult) -> Uuid;

    /// A live (unexpired) pending scan
    async fn get(&self, scan_id: Uuid) -> Option<PendingScan>;

    /// Take a pending scan out of the store. Expired entries are dropped and
    /// reported as absent.
    async fn remove(&self, scan_id: Uuid) -> Option<PendingScan>;

    /// Drop every expired entry; returns how many were dropped
    async fn purge_expired(&self) -> usize;
}

/// Process-local pending scan store with a fixed time-to-live
pub struct InMemoryPendingScans {
    ttl: Duration,
    scans: Mutex<HashMap<Uuid, PendingScan>>,
}

impl InMemoryPendingScans {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            scans: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.scans.lock().await.len()
    }
}

impl Default for InMemoryPendingScans {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}

#[async_trait]
impl PendingScanStore for InMemoryPendingScans {
    async fn insert(&self, result: ScanResult) -> Uuid {
        let now = Utc::now();
        let scan = PendingScan {
            scan_id: Uuid::new_v4(),
            result,
            created_at: now,
            expires_at: now + self.ttl,
        };
        let scan_id = scan.scan_id;
        self.scans.lock().await.insert(scan_id, scan);
        scan_id
    }

    async fn get(&self, scan_id: Uuid) -> Option<PendingScan> {
        let scans = self.scans.lock().await;
        scans
            .get(&scan_id)
            .filter(|scan| !scan.is_expired(Utc::now()))
            .cloned()
    }

    async fn remove(&self, scan_id: Uuid) -> Option<PendingScan> {
        let scan = self.scans.lock().await.remove(&scan_id)?;
        if scan.is_expired(Utc::now()) {
            return None;
        }
        Some(scan)
    }

    async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut scans = self.scans.lock().await;
        let before = scans.len();
        scans.retain(|_, scan| !scan.is_expired(now));
        before - scans.len()
    }
}
