//! Queued classification job: load, classify, apply, save.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use ticket_classifier::{retry_with_backoff, ClassificationResult, ClassifyError, TicketClassifier};
use tracing::{error, info, warn};

use crate::tickets::{RepositoryError, TicketRepository};

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Classified(ClassificationResult),
    /// The ticket was deleted or never existed.
    Missing,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl JobError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Classify(ClassifyError::Contention(_)) => true,
            Self::Repository(e) => e.is_retryable(),
        }
    }
}

/// Classifies one ticket and writes the result back.
#[derive(Clone)]
pub struct ClassifyJob {
    classifier: Arc<dyn TicketClassifier>,
    tickets: Arc<dyn TicketRepository>,
    force: bool,
}

impl ClassifyJob {
    pub fn new(classifier: Arc<dyn TicketClassifier>, tickets: Arc<dyn TicketRepository>) -> Self {
        Self {
            classifier,
            tickets,
            force: false,
        }
    }

    /// Override manual categories when applying.
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub async fn run(&self, ticket_id: &str) -> Result<JobOutcome, JobError> {
        let Some(mut ticket) = self.tickets.get(ticket_id).await? else {
            warn!(ticket_id, "Ticket not found for classification");
            return Ok(JobOutcome::Missing);
        };

        let result = self.classifier.classify(&ticket.snapshot()).await?;
        ticket.apply_classification(&result, self.force);
        self.tickets.save(&ticket).await?;

        info!(
            ticket_id,
            category = %result.category(),
            confidence = result.confidence(),
            provenance = %result.provenance(),
            "Ticket classified"
        );
        Ok(JobOutcome::Classified(result))
    }
}

/// Runs a [`ClassifyJob`] with a fixed number of tries and a release delay
/// between them, like a queue worker re-releasing a job.
#[derive(Clone)]
pub struct JobRunner {
    job: ClassifyJob,
    tries: u32,
    release_delay: Duration,
}

impl JobRunner {
    pub fn new(job: ClassifyJob, tries: u32, release_delay: Duration) -> Self {
        Self {
            job,
            tries: tries.max(1),
            release_delay,
        }
    }

    pub async fn run(&self, ticket_id: &str) -> Result<JobOutcome, JobError> {
        let delay = self.release_delay;
        let job = &self.job;
        let outcome = retry_with_backoff(
            self.tries,
            |_| delay,
            JobError::is_retryable,
            |_| job.run(ticket_id),
        )
        .await;

        if let Err(e) = &outcome {
            error!(ticket_id, error = %e, "Failed to classify ticket");
        }
        outcome
    }
}
