//! Ticket Classification Library
//!
//! Turns a support ticket's text into a validated classification:
//! - a single-flight lock per ticket, so concurrent requests never issue two
//!   upstream calls,
//! - bounded retry with exponential backoff for transient API failures,
//! - a random low-confidence fallback when the model path is off or fails,
//! - a content-versioned result cache.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ticket_classifier::{Classifier, ClassifierConfig, MemoryCache, MemoryLocks, TicketClassifier};
//!
//! let config = ClassifierConfig::from_env();
//! let classifier = Classifier::with_openai(
//!     &config,
//!     MemoryCache::new().shared(),
//!     MemoryLocks::new().shared(),
//! )?;
//! let result = classifier.classify(&snapshot).await?;
//! println!("{} ({:.2})", result.category(), result.confidence());
//! ```

pub mod config;
pub mod error;
pub mod fallback;
pub mod interpreter;
pub mod orchestrator;
pub mod result;
pub mod retry;
pub mod store;
pub mod ticket;
pub mod upstream;

pub use config::{ClassifierConfig, ConfigError};
pub use error::{
    AttemptError, ClassifyError, LockError, ParseError, StoreError, UpstreamError,
    ValidationError,
};
pub use orchestrator::{Classifier, TicketClassifier};
pub use result::{Category, ClassificationResult, Provenance, StructuredClassification};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::{
    LockLease, LockProvider, MemoryCache, MemoryLocks, ResultCache, SharedCache, SharedLocks,
};
pub use ticket::TicketSnapshot;
pub use upstream::{
    ChatClient, ChatMessage, ChatRequest, OpenAiChatClient, Role, SamplingParams, UpstreamCaller,
};
