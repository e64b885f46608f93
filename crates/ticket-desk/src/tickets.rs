//! Ticket records, the repository boundary, and the classification applier.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticket_classifier::{Category, ClassificationResult, TicketSnapshot};
use uuid::Uuid;

/// Ticket workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    New,
    Open,
    Pending,
    Closed,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Open => write!(f, "open"),
            Self::Pending => write!(f, "pending"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown ticket status: {0} (expected new, open, pending or closed)")]
pub struct UnknownStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "open" => Ok(Self::Open),
            "pending" => Ok(Self::Pending),
            "closed" => Ok(Self::Closed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A support ticket as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub explanation: Option<String>,
    /// 0.0..=1.0
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Internal note.
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub category_is_manual: bool,
    #[serde(default)]
    pub category_changed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketEdit {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub status: Option<TicketStatus>,
    pub note: Option<String>,
    pub category: Option<Category>,
}

impl Ticket {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            subject: subject.into(),
            body: body.into(),
            status: TicketStatus::New,
            category: None,
            explanation: None,
            confidence: None,
            note: None,
            category_is_manual: false,
            category_changed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// What the classifier is allowed to see.
    pub fn snapshot(&self) -> TicketSnapshot {
        TicketSnapshot {
            id: self.id.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Bump `updated_at`, strictly increasing even within one clock tick.
    pub fn touch(&mut self) {
        let floor = self.updated_at + Duration::milliseconds(1);
        self.updated_at = Utc::now().max(floor);
    }

    /// A human-chosen category. Changing it pins the ticket against
    /// automatic reclassification.
    pub fn set_manual_category(&mut self, category: Category) {
        if self.category == Some(category) {
            return;
        }
        self.category = Some(category);
        self.category_is_manual = true;
        self.category_changed_at = Some(Utc::now());
    }

    pub fn apply_edit(&mut self, edit: TicketEdit) {
        if let Some(subject) = edit.subject {
            self.subject = subject;
        }
        if let Some(body) = edit.body {
            self.body = body;
        }
        if let Some(status) = edit.status {
            self.status = status;
        }
        if let Some(note) = edit.note {
            self.note = Some(note);
        }
        if let Some(category) = edit.category {
            self.set_manual_category(category);
        }
        self.touch();
    }

    /// Persist a classification onto the ticket.
    ///
    /// Explanation and confidence are always written. The category is only
    /// replaced when the ticket is not manually categorised, or `force` is set.
    pub fn apply_classification(&mut self, result: &ClassificationResult, force: bool) {
        let structured = result.to_structured();
        self.explanation = Some(structured.explanation);
        self.confidence = Some(structured.confidence);
        self.category_changed_at = Some(Utc::now());

        if !self.category_is_manual || force {
            self.category = Some(structured.category);
            self.category_is_manual = false;
        }
        self.touch();
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Ticket store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Ticket store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl RepositoryError {
    /// IO may clear up on its own; a corrupt document will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Ticket persistence boundary.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Ticket>, RepositoryError>;

    /// Insert or replace by id.
    async fn save(&self, ticket: &Ticket) -> Result<(), RepositoryError>;

    /// All tickets, oldest first.
    async fn list(&self) -> Result<Vec<Ticket>, RepositoryError>;
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sorted(map: &HashMap<String, Ticket>) -> Vec<Ticket> {
    let mut tickets: Vec<Ticket> = map.values().cloned().collect();
    tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    tickets
}

#[derive(Default)]
pub struct MemoryTicketRepository {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl MemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for MemoryTicketRepository {
    async fn get(&self, id: &str) -> Result<Option<Ticket>, RepositoryError> {
        Ok(guard(&self.tickets).get(id).cloned())
    }

    async fn save(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        guard(&self.tickets).insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Ticket>, RepositoryError> {
        Ok(sorted(&guard(&self.tickets)))
    }
}

/// On-disk document layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TicketDocument {
    tickets: Vec<Ticket>,
}

/// All tickets in one JSON document, rewritten atomically on every save.
///
/// Saves are serialized by an async mutex and the file IO runs on the
/// blocking pool, so concurrent workers never stall the runtime.
pub struct JsonFileTicketRepository {
    path: PathBuf,
    tickets: tokio::sync::Mutex<HashMap<String, Ticket>>,
}

impl JsonFileTicketRepository {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let tickets = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let doc: TicketDocument =
                    serde_json::from_str(&content).map_err(|source| RepositoryError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                doc.tickets.into_iter().map(|t| (t.id.clone(), t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(RepositoryError::Io { path, source }),
        };
        Ok(Self {
            path,
            tickets: tokio::sync::Mutex::new(tickets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, map: &HashMap<String, Ticket>) -> Result<(), RepositoryError> {
        let doc = TicketDocument {
            tickets: sorted(map),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|source| {
            RepositoryError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_document(&path, json))
            .await
            .map_err(|e| RepositoryError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(format!("task join error: {e}")),
            })?
    }
}

/// Write through a sibling temp file, then rename over `path`.
fn write_document(path: &Path, json: String) -> Result<(), RepositoryError> {
    let io_err = |source| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[async_trait]
impl TicketRepository for JsonFileTicketRepository {
    async fn get(&self, id: &str) -> Result<Option<Ticket>, RepositoryError> {
        Ok(self.tickets.lock().await.get(id).cloned())
    }

    async fn save(&self, ticket: &Ticket) -> Result<(), RepositoryError> {
        let mut tickets = self.tickets.lock().await;
        let previous = tickets.insert(ticket.id.clone(), ticket.clone());
        if let Err(e) = self.write(&tickets).await {
            // Keep memory and disk in step.
            match previous {
                Some(old) => tickets.insert(old.id.clone(), old),
                None => tickets.remove(&ticket.id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Ticket>, RepositoryError> {
        Ok(sorted(&*self.tickets.lock().await))
    }
}
