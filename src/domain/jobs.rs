use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Completed jobs are kept around this long for late pollers.
const RETENTION_MINUTES: i64 = 60;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLine {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone)]
struct Job {
    finished_at: Option<DateTime<Utc>>,
    log: Vec<JobLine>,
    done: bool,
    success: bool,
    message: Option<String>,
    error: Option<String>,
}

/// Pollable view of one job's ledger.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub done: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub log: Vec<JobLine>,
}

/// Progress ledgers for concurrent orchestration runs, one job per run.
/// A single coarse lock serializes all mutations; job volume is low.
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobTracker {
    pub fn new() -> JobTracker {
        JobTracker::default()
    }

    /// Open a new ledger. Completed jobs past retention are purged here
    /// rather than on a timer.
    pub fn create(&self) -> JobId {
        let mut jobs = self.jobs.lock().unwrap();
        let cutoff = Utc::now() - Duration::minutes(RETENTION_MINUTES);
        jobs.retain(|_, job| !(job.done && job.finished_at.map_or(false, |t| t < cutoff)));
        let id = Uuid::new_v4();
        jobs.insert(
            id,
            Job {
                finished_at: None,
                log: Vec::new(),
                done: false,
                success: false,
                message: None,
                error: None,
            },
        );
        id
    }

    pub fn append(&self, id: JobId, severity: Severity, message: impl Into<String>) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.log.push(JobLine {
                at: Utc::now(),
                severity,
                message: message.into(),
            });
        }
    }

    pub fn complete(
        &self,
        id: JobId,
        success: bool,
        message: Option<String>,
        error: Option<String>,
    ) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.done = true;
            job.success = success;
            job.message = message;
            job.error = error;
            job.finished_at = Some(Utc::now());
        }
    }

    /// `None` for unknown or already purged handles.
    pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&id).map(|job| JobSnapshot {
            done: job.done,
            success: job.success,
            message: job.message.clone(),
            error: job.error.clone(),
            log: job.log.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_lifecycle() {
        let tracker = JobTracker::new();
        let id = tracker.create();

        tracker.append(id, Severity::Info, "Pulling image");
        tracker.append(id, Severity::Warn, "Health probe still starting");

        let snap = tracker.snapshot(id).unwrap();
        assert!(!snap.done);
        assert_eq!(snap.log.len(), 2);
        assert_eq!(snap.log[0].message, "Pulling image");
        assert_eq!(snap.log[1].severity, Severity::Warn);

        tracker.complete(id, true, Some("Updated to 5.3.0".into()), None);
        let snap = tracker.snapshot(id).unwrap();
        assert!(snap.done);
        assert!(snap.success);
        assert_eq!(snap.message.as_deref(), Some("Updated to 5.3.0"));
    }

    #[test]
    fn unknown_handle_is_none() {
        let tracker = JobTracker::new();
        assert!(tracker.snapshot(Uuid::new_v4()).is_none());
    }

    #[test]
    fn appending_to_unknown_handle_is_ignored() {
        let tracker = JobTracker::new();
        tracker.append(Uuid::new_v4(), Severity::Info, "lost");
        tracker.complete(Uuid::new_v4(), false, None, None);
    }

    #[test]
    fn stale_completed_jobs_are_purged_on_create() {
        let tracker = JobTracker::new();
        let stale = tracker.create();
        tracker.complete(stale, true, None, None);
        {
            let mut jobs = tracker.jobs.lock().unwrap();
            let job = jobs.get_mut(&stale).unwrap();
            job.finished_at = Some(Utc::now() - Duration::minutes(RETENTION_MINUTES + 5));
        }

        let live = tracker.create();
        assert!(tracker.snapshot(stale).is_none());
        assert!(tracker.snapshot(live).is_some());
    }

    #[test]
    fn incomplete_jobs_survive_purge() {
        let tracker = JobTracker::new();
        let running = tracker.create();
        tracker.create();
        assert!(tracker.snapshot(running).is_some());
    }
}
