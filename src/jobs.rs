//! In-memory ingestion job tracking.
//!
//! The tracker maps generated job ids to progress state that callers poll
//! over HTTP until the job is terminal (progress 100 or an error recorded).
//! Entries live only in process memory: the map is keyed per job so
//! concurrent jobs never contend, and updates within one job serialize
//! through that entry's mutex, so batch completions arriving out of order
//! can never lose a counter increment. Observed progress never decreases.
//!
//! Terminal entries are pruned a TTL after finishing, whenever a new job is
//! created, which bounds memory without a background sweeper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Pollable state of one ingestion job.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u64>,
    #[serde(rename = "totalChunks", skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
}

impl JobState {
    /// Placeholder returned for unrecognized job ids. Lookups never fail.
    fn unknown() -> Self {
        Self {
            status: "Unknown upload".to_string(),
            progress: 0,
            error: None,
            chunk: None,
            total_chunks: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.progress >= 100 || self.error.is_some()
    }
}

/// Partial update merged into a job's state. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<String>,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub chunk: Option<u64>,
    pub total_chunks: Option<u64>,
}

struct Entry {
    state: JobState,
    finished_at: Option<Instant>,
}

/// Process-wide job-id → progress map.
pub struct JobTracker {
    ttl: Duration,
    jobs: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl JobTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new job and return its generated id.
    pub fn create(&self) -> String {
        self.prune_expired();

        let id = Uuid::new_v4().to_string();
        let entry = Entry {
            state: JobState {
                status: "Starting upload...".to_string(),
                progress: 0,
                error: None,
                chunk: None,
                total_chunks: None,
            },
            finished_at: None,
        };

        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(entry)));
        id
    }

    /// Last known state, or the benign unknown-job placeholder.
    pub fn get(&self, job_id: &str) -> JobState {
        let entry = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.get(job_id).cloned()
        };
        match entry {
            Some(entry) => entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state
                .clone(),
            None => JobState::unknown(),
        }
    }

    /// Merge the given fields into the job's state. Progress can only move
    /// forward; a lower value than the current one is ignored.
    pub fn update(&self, job_id: &str, update: JobUpdate) {
        self.with_entry(job_id, |state| {
            if let Some(status) = update.status {
                state.status = status;
            }
            if let Some(progress) = update.progress {
                state.progress = state.progress.max(progress.min(100));
            }
            if let Some(error) = update.error {
                state.error = Some(error);
            }
            if let Some(chunk) = update.chunk {
                state.chunk = Some(chunk);
            }
            if let Some(total) = update.total_chunks {
                state.total_chunks = Some(total);
            }
        });
    }

    /// Mark the job failed with a user-facing message.
    pub fn fail(&self, job_id: &str, message: impl Into<String>) {
        self.update(
            job_id,
            JobUpdate {
                status: Some("Upload failed".to_string()),
                error: Some(message.into()),
                ..JobUpdate::default()
            },
        );
    }

    /// Credit `n` embedded chunks to the job and recompute progress.
    ///
    /// Extraction owns the first 10% and storage/finalization the last 10%,
    /// so embedding progress spans 10–90.
    pub fn record_embedded(&self, job_id: &str, n: u64, total: u64) {
        self.with_entry(job_id, |state| {
            let done = (state.chunk.unwrap_or(0) + n).min(total);
            state.chunk = Some(done);
            state.total_chunks = Some(total);
            state.status = format!("Embedding passages ({}/{})...", done, total);
            if total > 0 {
                let progress = 10 + (80 * done / total) as u8;
                state.progress = state.progress.max(progress);
            }
        });
    }

    fn with_entry(&self, job_id: &str, f: impl FnOnce(&mut JobState)) {
        let entry = {
            let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
            jobs.get(job_id).cloned()
        };
        if let Some(entry) = entry {
            let mut guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard.state);
            if guard.state.is_terminal() && guard.finished_at.is_none() {
                guard.finished_at = Some(Instant::now());
            }
        }
    }

    /// Drop terminal entries older than the TTL.
    fn prune_expired(&self) {
        let ttl = self.ttl;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.retain(|_, entry| {
            let guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.finished_at {
                Some(finished) => finished.elapsed() < ttl,
                None => true,
            }
        });
    }
}
