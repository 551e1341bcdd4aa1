//! Classifier, analyzer and researcher seams.
//!
//! Model responses are loosely typed JSON. Everything crossing this boundary
//! is decoded into a typed schema and range-checked; anything that does not
//! fit becomes `InferenceError::Schema` instead of leaking into the stages.

mod claude;
mod prompts;
mod schema;

use std::time::Duration;

use async_trait::async_trait;
use dealwire_common::{AnalyzedItem, EnrichedItem, RawItem};
use thiserror::Error;

use crate::executor::CallError;

pub use claude::ClaudeInference;
pub use prompts::{InferenceAnalyzer, InferenceClassifier, InferenceResearcher};
pub use schema::{
    parse_structured, Analysis, CarveOutPotential, CarveOutResearch, Classification,
    ResearchConfidence, SeparationComplexity, StructuredOutput, ThreatLevel,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("provider throttled the request")]
    Throttled { retry_after: Option<Duration> },

    #[error("provider request timed out")]
    Timeout,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("schema validation failed: {0}")]
    Schema(String),
}

impl From<InferenceError> for CallError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Throttled { retry_after } => CallError::Throttled { retry_after },
            InferenceError::Timeout => CallError::TimedOut,
            InferenceError::Provider(message) => CallError::Failed(message),
            InferenceError::Schema(message) => CallError::Invalid(message),
        }
    }
}

/// A structured-output request: prompts plus the JSON schema the answer must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub system: String,
    pub user: String,
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub max_tokens: u32,
}

/// Raw structured inference. Implementations must be safe to call concurrently.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, request: InferenceRequest) -> Result<serde_json::Value, InferenceError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        item: &RawItem,
        tracked_entities: &[String],
    ) -> Result<Classification, InferenceError>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, item: &EnrichedItem) -> Result<Analysis, InferenceError>;
}

/// Follow-up research on a curated carve-out candidate. `full_text` is the
/// enriched article body when enrichment fetched one.
#[async_trait]
pub trait CarveOutResearcher: Send + Sync {
    async fn research(
        &self,
        item: &AnalyzedItem,
        full_text: Option<&str>,
    ) -> Result<CarveOutResearch, InferenceError>;
}
