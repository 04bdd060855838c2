//! Durable, retrying delivery of completion reports.
//!
//! Reports that can't be delivered right away are persisted as
//! [`PendingCompletion`] entries and retried later:
//! - Not authorized: the report is dropped with a warning, never retried
//! - Network down: the report is queued and `submit` returns `Queued`
//! - Network up but delivery fails: the report is queued and the error is
//!   returned to the caller
//!
//! A retry pass runs when the network comes back, or whenever a host calls
//! [`CompletionQueue::retry_pending`]. At most one pass runs at a time.

use crate::persist::{read_json_strict, write_json_atomic, FileLockGuard};
use crate::report::{CompletionReport, ReportSink, SubmitOutcome};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// A report not yet delivered
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PendingCompletion {
    pub id: Uuid,
    pub report: CompletionReport,
    pub created_at: DateTime<Utc>,
    /// Failed retry passes so far; never decreases
    pub retry_count: u32,
}

impl PendingCompletion {
    pub fn new(report: CompletionReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            report,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// How the endpoint acknowledged a delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryReceipt {
    Created,
    /// The endpoint already had this session; still a success
    AlreadyRecorded,
}

/// Sends a report to the backend. Timeouts are the transport's business;
/// they surface as an ordinary `Err`.
pub trait CompletionTransport: Send + Sync {
    fn deliver(&self, report: &CompletionReport) -> Result<DeliveryReceipt>;
}

pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> bool;
}

pub trait AuthValidity: Send + Sync {
    fn is_authorized(&self) -> bool;
}

/// A shared boolean usable as either reachability or auth state
#[derive(Debug)]
pub struct StatusFlag(AtomicBool);

impl StatusFlag {
    pub fn new(value: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(value)))
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Reachability for StatusFlag {
    fn is_reachable(&self) -> bool {
        self.get()
    }
}

impl AuthValidity for StatusFlag {
    fn is_authorized(&self) -> bool {
        self.get()
    }
}

// ============================================================================
// Pending store
// ============================================================================

/// The persisted list of pending completions
///
/// Every read-modify-write happens under an in-process mutex plus an
/// exclusive lock on a sidecar file, so concurrent enqueue and dequeue
/// operations never lose each other's changes.
#[derive(Debug)]
pub struct PendingStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl PendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the pending entries
    pub fn entries(&self) -> Result<Vec<PendingCompletion>> {
        self.update(|entries| entries.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Load, modify and save the list as one critical section
    ///
    /// A file that exists but can't be read is an error, never an empty
    /// list, so pending entries are only removed by delivery or the retry
    /// ceiling.
    pub fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<PendingCompletion>) -> R,
    {
        let _local = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let _file = FileLockGuard::acquire(&self.lock_path)?;

        let mut entries: Vec<PendingCompletion> =
            read_json_strict(&self.path)?.unwrap_or_default();
        let before = entries.clone();
        let result = f(&mut entries);

        if entries != before {
            write_json_atomic(&self.path, &entries)
                .map_err(|e| Error::Persistence(format!("pending queue: {}", e)))?;
            tracing::debug!("Pending queue now holds {} entries", entries.len());
        }
        Ok(result)
    }
}

// ============================================================================
// Completion queue
// ============================================================================

/// Result of one retry pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub delivered: usize,
    /// Dropped after reaching the retry ceiling
    pub abandoned: usize,
    pub remaining: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Another pass was already in progress
    AlreadyRunning,
    Skipped { reason: String },
    Finished(RetrySummary),
}

struct RetryGuard<'a>(&'a AtomicBool);

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CompletionQueue {
    store: PendingStore,
    transport: Box<dyn CompletionTransport>,
    network: Arc<dyn Reachability>,
    auth: Arc<dyn AuthValidity>,
    max_retries: u32,
    retry_running: AtomicBool,
    was_reachable: AtomicBool,
}

impl CompletionQueue {
    pub fn new(
        store: PendingStore,
        transport: impl CompletionTransport + 'static,
        network: Arc<dyn Reachability>,
        auth: Arc<dyn AuthValidity>,
    ) -> Self {
        let reachable = network.is_reachable();
        Self {
            store,
            transport: Box::new(transport),
            network,
            auth,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_running: AtomicBool::new(false),
            was_reachable: AtomicBool::new(reachable),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn pending(&self) -> Result<Vec<PendingCompletion>> {
        self.store.entries()
    }

    /// Deliver a report now, or keep it for later
    pub fn submit(&self, report: CompletionReport) -> Result<SubmitOutcome> {
        if !self.auth.is_authorized() {
            tracing::warn!(
                "Dropping completion report for session {}: device is not paired",
                report.session_id
            );
            return Ok(SubmitOutcome::Dropped {
                reason: "not_authorized".into(),
            });
        }

        if !self.network.is_reachable() {
            let session_id = report.session_id;
            self.enqueue(report)?;
            tracing::info!("Network unavailable, queued report for session {}", session_id);
            return Ok(SubmitOutcome::Queued);
        }

        match self.transport.deliver(&report) {
            Ok(receipt) => {
                tracing::info!(
                    "Delivered report for session {} ({:?})",
                    report.session_id,
                    receipt
                );
                Ok(SubmitOutcome::Delivered)
            }
            Err(e) => {
                tracing::warn!(
                    "Delivery of session {} failed, queued for retry: {}",
                    report.session_id,
                    e
                );
                self.enqueue(report)?;
                Err(match e {
                    Error::Delivery(msg) => Error::Delivery(msg),
                    other => Error::Delivery(other.to_string()),
                })
            }
        }
    }

    /// Attempt every pending entry once
    pub fn retry_pending(&self) -> Result<RetryOutcome> {
        if self
            .retry_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Retry pass already running");
            return Ok(RetryOutcome::AlreadyRunning);
        }
        let _running = RetryGuard(&self.retry_running);

        if !self.network.is_reachable() {
            return Ok(RetryOutcome::Skipped {
                reason: "network_unavailable".into(),
            });
        }
        if !self.auth.is_authorized() {
            return Ok(RetryOutcome::Skipped {
                reason: "not_authorized".into(),
            });
        }

        // Deliver outside the critical section; entries enqueued meanwhile
        // are untouched by the update below.
        let pending = self.store.entries()?;
        let mut delivered = HashSet::new();
        let mut failed = HashSet::new();

        for entry in &pending {
            match self.transport.deliver(&entry.report) {
                Ok(receipt) => {
                    tracing::info!(
                        "Retried session {} delivered ({:?})",
                        entry.report.session_id,
                        receipt
                    );
                    delivered.insert(entry.id);
                }
                Err(e) => {
                    tracing::warn!(
                        "Retry {} for session {} failed: {}",
                        entry.retry_count + 1,
                        entry.report.session_id,
                        e
                    );
                    failed.insert(entry.id);
                }
            }
        }

        let max_retries = self.max_retries;
        let (abandoned, remaining) = self.store.update(|entries| {
            entries.retain(|e| !delivered.contains(&e.id));
            for entry in entries.iter_mut().filter(|e| failed.contains(&e.id)) {
                entry.retry_count += 1;
            }

            let mut abandoned = 0;
            entries.retain(|e| {
                if e.retry_count >= max_retries {
                    tracing::warn!(
                        "Abandoning report for session {} after {} failed retries",
                        e.report.session_id,
                        e.retry_count
                    );
                    abandoned += 1;
                    false
                } else {
                    true
                }
            });
            (abandoned, entries.len())
        })?;

        Ok(RetryOutcome::Finished(RetrySummary {
            attempted: pending.len(),
            delivered: delivered.len(),
            abandoned,
            remaining,
        }))
    }

    /// Feed a reachability change; retries when the network comes back
    pub fn network_changed(&self, available: bool) -> Result<Option<RetryOutcome>> {
        let was = self.was_reachable.swap(available, Ordering::SeqCst);
        if available && !was {
            tracing::info!("Network restored, retrying pending completions");
            return self.retry_pending().map(Some);
        }
        Ok(None)
    }

    fn enqueue(&self, report: CompletionReport) -> Result<()> {
        self.store.update(|entries| {
            if entries
                .iter()
                .any(|e| e.report.session_id == report.session_id)
            {
                tracing::debug!("Session {} already pending", report.session_id);
                return;
            }
            entries.push(PendingCompletion::new(report));
        })
    }
}

impl ReportSink for CompletionQueue {
    fn submit(&self, report: CompletionReport) -> Result<SubmitOutcome> {
        CompletionQueue::submit(self, report)
    }
}
