//! Live progress reporting from running jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::Stage;

/// Latest progress of one job as seen by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgressSnapshot {
    pub stage: Stage,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgressSnapshot {
    pub fn new(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct JobProgressUpdate {
    pub job_id: String,
    pub snapshot: JobProgressSnapshot,
}

/// Handle a running job uses to publish progress. Reporting never blocks.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    tx: mpsc::Sender<JobProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, tx: mpsc::Sender<JobProgressUpdate>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }

    pub fn noop(job_id: impl Into<String>) -> Self {
        let (tx, _rx) = mpsc::channel::<JobProgressUpdate>(1);
        Self::new(job_id, tx)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn report(&self, mut snapshot: JobProgressSnapshot) {
        snapshot.updated_at = Utc::now();
        let _ = self.tx.try_send(JobProgressUpdate {
            job_id: self.job_id.clone(),
            snapshot,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_delivers_update() {
        let (tx, mut rx) = mpsc::channel(4);
        let reporter = ProgressReporter::new("job-1", tx);
        reporter.report(JobProgressSnapshot::new(Stage::Translate, 60).with_message("Translated"));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.job_id, "job-1");
        assert_eq!(update.snapshot.stage, Stage::Translate);
        assert_eq!(update.snapshot.percent, 60);
        assert_eq!(update.snapshot.message.as_deref(), Some("Translated"));
    }

    #[test]
    fn test_noop_reporter_does_not_panic() {
        let reporter = ProgressReporter::noop("job-1");
        reporter.report(JobProgressSnapshot::new(Stage::Complete, 150));
    }
}
