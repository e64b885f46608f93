//! Ticket desk: the collaborators around the ticket classifier.
//!
//! - `tickets`: ticket records, the repository boundary, and the applier
//!   that writes a classification back while honouring manual categories
//! - `job`: the queued classify job and its retrying runner
//! - `queue`: a worker pool draining dispatched jobs
//! - `bulk`: selection of tickets for bulk reclassification
//! - `config`: desk and classifier settings

pub mod bulk;
pub mod config;
pub mod job;
pub mod queue;
pub mod tickets;

pub use bulk::{select_for_bulk, BulkScope};
pub use config::DeskConfig;
pub use job::{ClassifyJob, JobError, JobOutcome, JobRunner};
pub use queue::{JobQueue, JobSummary, QueueClosed};
pub use tickets::{
    JsonFileTicketRepository, MemoryTicketRepository, RepositoryError, Ticket, TicketEdit,
    TicketRepository, TicketStatus,
};
