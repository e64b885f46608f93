//! Selection of tickets for bulk classification runs.

use crate::tickets::Ticket;

/// Which tickets a bulk run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkScope {
    /// Tickets that have no category yet.
    Unclassified,
    All,
}

/// Ids to dispatch for a bulk run. Manually categorised tickets are skipped
/// unless `force` is set.
pub fn select_for_bulk(tickets: &[Ticket], scope: BulkScope, force: bool) -> Vec<String> {
    tickets
        .iter()
        .filter(|t| scope == BulkScope::All || t.category.is_none())
        .filter(|t| force || !t.category_is_manual)
        .map(|t| t.id.clone())
        .collect()
}
