//! In-process job queue drained by a fixed worker pool.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::job::{JobOutcome, JobRunner};

const QUEUE_CAPACITY: usize = 256;

/// Per-run tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub classified: usize,
    pub missing: usize,
    pub failed: usize,
}

impl JobSummary {
    fn merge(&mut self, other: JobSummary) {
        self.classified += other.classified;
        self.missing += other.missing;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.classified + self.missing + self.failed
    }
}

#[derive(Debug, Error)]
#[error("Job queue is closed")]
pub struct QueueClosed;

pub struct JobQueue {
    tx: mpsc::Sender<String>,
    workers: JoinSet<JobSummary>,
}

impl JobQueue {
    /// Spawn `workers` tasks pulling ticket ids off a shared queue.
    pub fn start(runner: Arc<JobRunner>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let mut set = JoinSet::new();

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let runner = runner.clone();
            set.spawn(async move {
                let mut tally = JobSummary::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(ticket_id) = next else { break };
                    debug!(worker, ticket_id = %ticket_id, "Worker picked up job");
                    match runner.run(&ticket_id).await {
                        Ok(JobOutcome::Classified(_)) => tally.classified += 1,
                        Ok(JobOutcome::Missing) => tally.missing += 1,
                        Err(_) => tally.failed += 1,
                    }
                }
                tally
            });
        }

        Self { tx, workers: set }
    }

    pub async fn dispatch(&self, ticket_id: impl Into<String>) -> Result<(), QueueClosed> {
        self.tx.send(ticket_id.into()).await.map_err(|_| QueueClosed)
    }

    /// Close the queue, let workers drain it, and collect their tallies.
    pub async fn shutdown(self) -> JobSummary {
        let Self { tx, mut workers } = self;
        drop(tx);

        let mut summary = JobSummary::default();
        while let Some(res) = workers.join_next().await {
            match res {
                Ok(tally) => summary.merge(tally),
                Err(e) => warn!(error = %e, "Classification worker panicked"),
            }
        }
        summary
    }
}
