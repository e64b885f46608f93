//! Validated classification outcome.
//!
//! A [`ClassificationResult`] can only be built through a validating
//! constructor, and deserialization routes through the same checks, so a
//! value read back from the cache is as trustworthy as a freshly built one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Fixed ticket taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bug,
    Feature,
    Question,
    Complaint,
    Compliment,
    General,
}

impl Category {
    /// Every category, in prompt order.
    pub const ALL: [Category; 6] = [
        Self::Bug,
        Self::Feature,
        Self::Question,
        Self::Complaint,
        Self::Compliment,
        Self::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Question => "question",
            Self::Complaint => "complaint",
            Self::Compliment => "compliment",
            Self::General => "general",
        }
    }

    /// One-line rule used in the system prompt.
    pub fn rule(self) -> &'static str {
        match self {
            Self::Bug => "errors, crashes, broken functionality",
            Self::Feature => "requests for new functionality, enhancements",
            Self::Question => "help requests, how-to questions",
            Self::Complaint => "negative feedback, frustration",
            Self::Compliment => "positive feedback, praise",
            Self::General => "anything that doesn't fit other categories",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Parsed from a language-model answer.
    #[default]
    Model,
    /// Synthesized locally by the fallback generator.
    Fallback,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Immutable classification of one ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredResult")]
pub struct ClassificationResult {
    category: Category,
    explanation: String,
    confidence: f64,
    provenance: Provenance,
}

/// The three persisted fields, as handed to the ticket store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredClassification {
    pub category: Category,
    pub explanation: String,
    pub confidence: f64,
}

/// Unvalidated wire shape; only reachable through `TryFrom`.
#[derive(Deserialize)]
struct StoredResult {
    category: String,
    explanation: String,
    confidence: f64,
    #[serde(default)]
    provenance: Provenance,
}

impl TryFrom<StoredResult> for ClassificationResult {
    type Error = ValidationError;

    fn try_from(raw: StoredResult) -> Result<Self, Self::Error> {
        Self::build(&raw.category, raw.explanation, raw.confidence, raw.provenance)
    }
}

impl ClassificationResult {
    /// Build a model-provenance result.
    ///
    /// Fails if `category` is not one of [`Category::ALL`] or `confidence`
    /// lies outside `[0.0, 1.0]`.
    pub fn new(
        category: &str,
        explanation: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        Self::build(category, explanation, confidence, Provenance::Model)
    }

    /// Build a fallback-provenance result.
    pub fn fallback(
        category: Category,
        explanation: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        Self::build(category.as_str(), explanation, confidence, Provenance::Fallback)
    }

    fn build(
        category: &str,
        explanation: impl Into<String>,
        confidence: f64,
        provenance: Provenance,
    ) -> Result<Self, ValidationError> {
        // NaN fails the range check too.
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
        let category = category.parse::<Category>()?;
        Ok(Self {
            category,
            explanation: explanation.into(),
            confidence,
            provenance,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_fallback(&self) -> bool {
        self.provenance == Provenance::Fallback
    }

    /// The `{category, explanation, confidence}` triple for persistence.
    pub fn to_structured(&self) -> StructuredClassification {
        StructuredClassification {
            category: self.category,
            explanation: self.explanation.clone(),
            confidence: self.confidence,
        }
    }
}
