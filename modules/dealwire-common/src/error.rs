use thiserror::Error;

/// Per-item failures. Recorded on the item (as text) and counted in the run
/// summary; never abort a stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    #[error("collection failed for {source_name}: {message}")]
    Collection { source_name: String, message: String },

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("carve-out research failed: {0}")]
    Research(String),

    #[error("rate limit exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("enrichment timed out")]
    EnrichmentTimeout,

    #[error("enrichment failed: {0}")]
    Enrichment(String),

    #[error("schema validation failed: {0}")]
    Schema(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn invalid(key: &str, value: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}
