//! Read-only ticket view consumed by the classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fields of a ticket that classification depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

impl TicketSnapshot {
    /// Content-version key: any edit bumps `updated_at` and orphans the entry.
    ///
    /// Millisecond resolution so two edits within one second still differ.
    pub fn cache_key(&self) -> String {
        format!(
            "classify:ticket:{}:{}",
            self.id,
            self.updated_at.timestamp_millis()
        )
    }

    /// Single-flight key, scoped to identity only.
    pub fn lock_key(&self) -> String {
        format!("classify:ticket:{}", self.id)
    }
}
