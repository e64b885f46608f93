//! Integration tests for the ticket desk
//!
//! Runs classification jobs through the worker queue against a JSON file
//! store and a chat client that answers from the ticket subject.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ticket_classifier::{
    Category, ChatClient, ChatRequest, Classifier, ClassifierConfig, MemoryCache, MemoryLocks,
    Provenance, UpstreamError,
};
use ticket_desk::{
    select_for_bulk, BulkScope, ClassifyJob, JobQueue, JobRunner, JsonFileTicketRepository,
    Ticket, TicketEdit, TicketRepository,
};

/// Answers `bug` for subjects mentioning a crash. Anything else gets a
/// `billing` category, which is not in the taxonomy and must fall back.
struct SubjectClient {
    calls: AtomicU32,
}

#[async_trait]
impl ChatClient for SubjectClient {
    async fn send(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user = request
            .messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();
        let category = if user.contains("crash") { "bug" } else { "billing" };
        Ok(format!(
            r#"{{"category":"{category}","explanation":"from subject","confidence":0.8}}"#
        ))
    }
}

fn setup(client: Arc<SubjectClient>) -> Arc<Classifier> {
    let config = ClassifierConfig {
        enabled: true,
        ..ClassifierConfig::default()
    };
    Arc::new(Classifier::new(
        &config,
        client,
        MemoryCache::new().shared(),
        MemoryLocks::new().shared(),
    ))
}

async fn seed(repo: &JsonFileTicketRepository) -> (Ticket, Ticket, Ticket) {
    let crash = Ticket::new("App crash on save", "Stack trace attached");
    let invoice = Ticket::new("Invoice question", "Charged twice");
    let mut pinned = Ticket::new("Crash when exporting", "Agent says feature gap");
    pinned.set_manual_category(Category::Feature);
    for ticket in [&crash, &invoice, &pinned] {
        repo.save(ticket).await.unwrap();
    }
    (crash, invoice, pinned)
}

/// Test: a bulk run over unclassified tickets persists model and fallback results to disk
#[tokio::test]
async fn test_bulk_unclassified_run_persists_results() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tickets.json");
    let repo = Arc::new(JsonFileTicketRepository::open(&path).unwrap());
    let (crash, invoice, pinned) = seed(&repo).await;

    let client = Arc::new(SubjectClient {
        calls: AtomicU32::new(0),
    });
    let ids = select_for_bulk(&repo.list().await.unwrap(), BulkScope::Unclassified, false);
    assert_eq!(ids.len(), 2);

    let job = ClassifyJob::new(setup(client.clone()), repo.clone());
    let queue = JobQueue::start(Arc::new(JobRunner::new(job, 3, Duration::from_secs(1))), 2);
    for id in ids {
        queue.dispatch(id).await.unwrap();
    }
    let summary = queue.shutdown().await;
    assert_eq!(summary.classified, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);

    let reopened = JsonFileTicketRepository::open(&path).unwrap();
    let crash = reopened.get(&crash.id).await.unwrap().unwrap();
    let invoice = reopened.get(&invoice.id).await.unwrap().unwrap();
    let pinned = reopened.get(&pinned.id).await.unwrap().unwrap();
    assert_eq!(crash.category, Some(Category::Bug));
    assert_eq!(crash.confidence, Some(0.8));
    let fallback = invoice.category.unwrap();
    assert!(Category::ALL.contains(&fallback));
    assert_eq!(
        invoice.explanation,
        Some(format!("Random classification (fallback): {fallback}"))
    );
    assert!((0.3..=0.7).contains(&invoice.confidence.unwrap()));
    assert_eq!(pinned.category, Some(Category::Feature));
    assert!(pinned.category_is_manual);
    assert!(pinned.explanation.is_none());
}

/// Test: forced jobs override the manual category
#[tokio::test]
async fn test_forced_job_overrides_manual_category() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(JsonFileTicketRepository::open(dir.path().join("t.json")).unwrap());
    let (_, _, pinned) = seed(&repo).await;

    let client = Arc::new(SubjectClient {
        calls: AtomicU32::new(0),
    });
    let job = ClassifyJob::new(setup(client), repo.clone()).forced(true);
    job.run(&pinned.id).await.unwrap();

    let stored = repo.get(&pinned.id).await.unwrap().unwrap();
    assert_eq!(stored.category, Some(Category::Bug));
    assert!(!stored.category_is_manual);
}

/// Test: an unforced job keeps the manual category but records the explanation
#[tokio::test]
async fn test_unforced_job_keeps_manual_category() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(JsonFileTicketRepository::open(dir.path().join("t.json")).unwrap());
    let (_, _, pinned) = seed(&repo).await;

    let client = Arc::new(SubjectClient {
        calls: AtomicU32::new(0),
    });
    ClassifyJob::new(setup(client), repo.clone())
        .run(&pinned.id)
        .await
        .unwrap();

    let stored = repo.get(&pinned.id).await.unwrap().unwrap();
    assert_eq!(stored.category, Some(Category::Feature));
    assert!(stored.category_is_manual);
    assert_eq!(stored.explanation.as_deref(), Some("from subject"));
}

/// Test: editing a ticket after classification forces a fresh model call
#[tokio::test]
async fn test_edit_invalidates_previous_classification() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(JsonFileTicketRepository::open(dir.path().join("t.json")).unwrap());
    let (_, invoice, _) = seed(&repo).await;

    let client = Arc::new(SubjectClient {
        calls: AtomicU32::new(0),
    });
    let job = ClassifyJob::new(setup(client.clone()), repo.clone());

    job.run(&invoice.id).await.unwrap();
    job.run(&invoice.id).await.unwrap();
    // The applier bumps updated_at, so the second run already misses the cache.
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);

    let mut edited = repo.get(&invoice.id).await.unwrap().unwrap();
    edited.apply_edit(TicketEdit {
        subject: Some("App crash after paying".into()),
        ..TicketEdit::default()
    });
    repo.save(&edited).await.unwrap();

    let outcome = job.run(&invoice.id).await.unwrap();
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    match outcome {
        ticket_desk::JobOutcome::Classified(result) => {
            assert_eq!(result.category(), Category::Bug);
            assert_eq!(result.provenance(), Provenance::Model);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
