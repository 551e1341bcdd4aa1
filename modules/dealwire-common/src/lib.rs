pub mod config;
pub mod error;
pub mod types;
pub mod canonical;

pub use config::{
    CheckpointBackend, Config, CurationSettings, EnrichSettings, FeedSource, ResearchSettings,
    StageLimits,
};
pub use error::{ConfigError, ItemError};
pub use types::*;
pub use canonical::{canonical_url, domain_of, is_trusted_domain};
