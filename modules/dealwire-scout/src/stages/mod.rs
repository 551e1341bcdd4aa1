//! Per-item stages between collection and composition.
//!
//! Every stage returns exactly one output per item it works on. Item-level
//! failures are recorded on the output item and never abort the stage.

mod analyze;
mod classify;
mod curate;
mod dedupe;
mod enrich;
mod research;

use dealwire_common::ItemError;

use crate::executor::TaskError;

pub use analyze::analyze;
pub use classify::classify_items;
pub use curate::{curate, CurationOutput};
pub use dedupe::{dedupe, DedupOutput};
pub use enrich::{enrich, DocumentFetcher, HttpDocumentFetcher};
pub use research::{research, research_candidates, CarveOutDossier, ResearchOutput};

/// Map an executor failure onto the item error taxonomy. `other` wraps
/// provider and transport failures for the calling stage.
pub(crate) fn item_error(err: TaskError, other: fn(String) -> ItemError) -> ItemError {
    match err {
        TaskError::RateLimitExhausted { attempts } => ItemError::RateLimitExhausted { attempts },
        TaskError::Invalid(message) => ItemError::Schema(message),
        TaskError::TimedOut => other("timed out".to_string()),
        TaskError::Failed(message) => other(message),
        TaskError::Cancelled => other("cancelled".to_string()),
    }
}
