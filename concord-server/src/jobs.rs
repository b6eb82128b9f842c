//! In-memory registry of submitted runs.
//!
//! Every submission gets its own entry keyed by a generated id, so concurrent
//! clients polling different jobs never observe each other's state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle states of a submitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }
}

/// One submitted run.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: Uuid,
    pub status: JobStatus,
    /// Failure description, set only when status is Error.
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Directory the pipeline writes this run's artifacts into.
    pub artifact_dir: PathBuf,
}

struct RegistryInner {
    jobs: HashMap<Uuid, JobEntry>,
    /// Submission order, oldest first. Drives eviction and the legacy
    /// most-recent-run view.
    order: Vec<Uuid>,
}

/// Tracks every run from submission until eviction.
pub struct JobRegistry {
    inner: RwLock<RegistryInner>,
    max_jobs: usize,
}

impl JobRegistry {
    pub fn new(max_jobs: usize) -> Self {
        JobRegistry {
            inner: RwLock::new(RegistryInner {
                jobs: HashMap::new(),
                order: Vec::new(),
            }),
            max_jobs: max_jobs.max(1),
        }
    }

    /// Registers a fresh job in the Processing state and returns its entry.
    /// The job's artifacts live in a per-id subdirectory of `artifact_root`.
    pub fn create(&self, artifact_root: &Path) -> JobEntry {
        let id = Uuid::new_v4();
        let entry = JobEntry {
            id,
            status: JobStatus::Processing,
            error: None,
            submitted_at: Utc::now(),
            finished_at: None,
            artifact_dir: artifact_root.join(id.to_string()),
        };

        let mut inner = self.inner.write();
        inner.order.push(entry.id);
        inner.jobs.insert(entry.id, entry.clone());
        self.evict_locked(&mut inner);
        debug!(job_id = %entry.id, total = inner.order.len(), "job registered");
        entry
    }

    pub fn get(&self, id: &Uuid) -> Option<JobEntry> {
        self.inner.read().jobs.get(id).cloned()
    }

    /// Most recently submitted job, if any.
    pub fn latest(&self) -> Option<JobEntry> {
        let inner = self.inner.read();
        inner
            .order
            .last()
            .and_then(|id| inner.jobs.get(id))
            .cloned()
    }

    pub fn mark_done(&self, id: &Uuid) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.jobs.get_mut(id) {
            entry.status = JobStatus::Done;
            entry.finished_at = Some(Utc::now());
        }
    }

    pub fn mark_error(&self, id: &Uuid, message: String) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.jobs.get_mut(id) {
            entry.status = JobStatus::Error;
            entry.error = Some(message);
            entry.finished_at = Some(Utc::now());
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the oldest finished jobs once the registry exceeds its cap.
    /// Jobs still processing are never evicted.
    fn evict_locked(&self, inner: &mut RegistryInner) {
        while inner.order.len() > self.max_jobs {
            let jobs = &inner.jobs;
            let position = inner.order.iter().position(|id| {
                jobs.get(id)
                    .map(|entry| entry.status != JobStatus::Processing)
                    .unwrap_or(true)
            });
            match position {
                Some(position) => {
                    let evicted = inner.order.remove(position);
                    inner.jobs.remove(&evicted);
                    debug!(job_id = %evicted, "evicted finished job");
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir() -> PathBuf {
        PathBuf::from("/tmp/run")
    }

    #[test]
    fn created_job_starts_processing() {
        let registry = JobRegistry::new(8);
        let entry = registry.create(&dir());

        let fetched = registry.get(&entry.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Processing);
        assert!(fetched.error.is_none());
        assert!(fetched.finished_at.is_none());
        assert_eq!(fetched.artifact_dir, dir().join(entry.id.to_string()));
    }

    #[test]
    fn unknown_id_is_none() {
        let registry = JobRegistry::new(8);
        assert!(registry.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn back_to_back_jobs_stay_distinct() {
        let registry = JobRegistry::new(8);
        let first = registry.create(&dir());
        let second = registry.create(&dir());
        assert_ne!(first.id, second.id);

        registry.mark_done(&first.id);

        assert_eq!(registry.get(&first.id).unwrap().status, JobStatus::Done);
        assert_eq!(
            registry.get(&second.id).unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn mark_error_records_message() {
        let registry = JobRegistry::new(8);
        let entry = registry.create(&dir());
        registry.mark_error(&entry.id, "model exploded".to_string());

        let fetched = registry.get(&entry.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Error);
        assert_eq!(fetched.error.as_deref(), Some("model exploded"));
        assert!(fetched.finished_at.is_some());
    }

    #[test]
    fn latest_tracks_submission_order() {
        let registry = JobRegistry::new(8);
        assert!(registry.latest().is_none());

        registry.create(&dir());
        let second = registry.create(&dir());
        assert_eq!(registry.latest().unwrap().id, second.id);
    }

    #[test]
    fn eviction_drops_oldest_finished_first() {
        let registry = JobRegistry::new(2);
        let a = registry.create(&dir());
        let b = registry.create(&dir());
        registry.mark_done(&a.id);
        registry.mark_done(&b.id);

        let c = registry.create(&dir());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a.id).is_none());
        assert!(registry.get(&b.id).is_some());
        assert!(registry.get(&c.id).is_some());
    }

    #[test]
    fn processing_jobs_survive_eviction() {
        let registry = JobRegistry::new(2);
        let a = registry.create(&dir());
        let b = registry.create(&dir());
        registry.mark_done(&b.id);

        let c = registry.create(&dir());
        // a is oldest but still processing; b is the one evicted.
        assert!(registry.get(&a.id).is_some());
        assert!(registry.get(&b.id).is_none());
        assert!(registry.get(&c.id).is_some());
    }
}
