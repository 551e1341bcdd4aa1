use std::sync::Arc;

use async_trait::async_trait;
use dealwire_common::{AnalyzedItem, EnrichedItem, RawItem};

use super::schema::{parse_structured, Analysis, CarveOutResearch, Classification, StructuredOutput};
use super::{
    Analyzer, CarveOutResearcher, Classifier, InferenceClient, InferenceError, InferenceRequest,
};

const CLASSIFY_SYSTEM: &str = "You triage business news for a private equity deal team. \
Decide whether the item is relevant, which category it belongs to, the deal type, \
how relevant it is, and which tracked company (if any) it concerns. \
Items about none of the tracked companies, their competitors, notable M&A or the \
wider industry are not relevant.";

const ANALYZE_SYSTEM: &str = "You assess business news for a private equity deal team. \
Score how strong a signal the item is (0-100), judge its carve-out potential and \
competitive threat, and explain in one or two sentences why it matters.";

const RESEARCH_SYSTEM: &str = "You are a private equity associate preparing a carve-out \
research note. Use only the provided source. Do not invent facts; write \"unknown\" \
where the source is silent. Summarize the transaction, list the units or assets that \
could be separated, rate separation complexity, and give risks, diligence questions \
and next steps.";

/// Summary text sent to the classifier is capped.
const SUMMARY_CHARS: usize = 1200;
/// Body text sent to the analyzer is capped.
const BODY_CHARS: usize = 6000;

fn request_for<T: StructuredOutput>(system: &str, user: String, max_tokens: u32) -> InferenceRequest {
    InferenceRequest {
        system: system.to_string(),
        user,
        schema_name: T::tool_name(),
        schema: T::schema(),
        max_tokens,
    }
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Classifier backed by any structured inference client.
pub struct InferenceClassifier {
    client: Arc<dyn InferenceClient>,
}

impl InferenceClassifier {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Classifier for InferenceClassifier {
    async fn classify(
        &self,
        item: &RawItem,
        tracked_entities: &[String],
    ) -> Result<Classification, InferenceError> {
        let entities = if tracked_entities.is_empty() {
            "(none)".to_string()
        } else {
            tracked_entities.join(", ")
        };
        let user = format!(
            "Tracked companies: {entities}\n\nSource: {}\nTitle: {}\nSummary: {}",
            item.source_name,
            item.title,
            clip(&item.summary, SUMMARY_CHARS),
        );
        let value = self
            .client
            .infer(request_for::<Classification>(CLASSIFY_SYSTEM, user, 512))
            .await?;
        parse_structured(value)
    }
}

/// Analyzer backed by any structured inference client. Uses full text when
/// enrichment produced it, the summary otherwise.
pub struct InferenceAnalyzer {
    client: Arc<dyn InferenceClient>,
}

impl InferenceAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyzer for InferenceAnalyzer {
    async fn analyze(&self, item: &EnrichedItem) -> Result<Analysis, InferenceError> {
        let classified = &item.item;
        let body = item
            .full_text
            .as_deref()
            .unwrap_or(classified.item.summary.as_str());
        let user = format!(
            "Category: {}\nDeal type: {}\nRelated company: {}\n\nTitle: {}\nSource: {}\n\n{}",
            classified.category,
            classified.deal_type.label(),
            classified.related_entity.as_deref().unwrap_or("(none)"),
            classified.item.title,
            classified.item.source_name,
            clip(body, BODY_CHARS),
        );
        let value = self
            .client
            .infer(request_for::<Analysis>(ANALYZE_SYSTEM, user, 768))
            .await?;
        parse_structured(value)
    }
}

/// Carve-out researcher backed by any structured inference client.
pub struct InferenceResearcher {
    client: Arc<dyn InferenceClient>,
}

impl InferenceResearcher {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CarveOutResearcher for InferenceResearcher {
    async fn research(
        &self,
        item: &AnalyzedItem,
        full_text: Option<&str>,
    ) -> Result<CarveOutResearch, InferenceError> {
        let classified = &item.item;
        let flags: Vec<&str> = item.opportunity_flags.iter().map(|f| f.as_str()).collect();
        let body = full_text.unwrap_or(classified.item.summary.as_str());
        let user = format!(
            "Deal type: {}\nRelated company: {}\nSignal score: {}\nFlags: {}\nWhy it matters: {}\n\n\
             Title: {}\nSource: {} ({})\n\n{}",
            classified.deal_type.label(),
            classified.related_entity.as_deref().unwrap_or("(none)"),
            item.signal_score,
            flags.join(", "),
            item.why_it_matters.as_deref().unwrap_or("(none)"),
            classified.item.title,
            classified.item.source_name,
            classified.item.source_url,
            clip(body, BODY_CHARS),
        );
        let value = self
            .client
            .infer(request_for::<CarveOutResearch>(RESEARCH_SYSTEM, user, 1024))
            .await?;
        parse_structured(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedClient {
        reply: Result<serde_json::Value, InferenceError>,
        seen: Mutex<Vec<InferenceRequest>>,
    }

    #[async_trait]
    impl InferenceClient for CannedClient {
        async fn infer(&self, request: InferenceRequest) -> Result<serde_json::Value, InferenceError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone()
        }
    }

    fn raw() -> RawItem {
        RawItem::new("rss", "Wire", "https://w.com/1", "Acme buys Beta", "Deal closed.", None)
    }

    #[tokio::test]
    async fn classifier_sends_schema_and_entities() {
        let client = Arc::new(CannedClient {
            reply: Ok(serde_json::json!({
                "is_relevant": true,
                "category": "portfolio",
                "deal_type": "ma_acquisition",
                "relevance_level": "high",
                "related_entity": "Acme",
                "confidence": 90
            })),
            seen: Mutex::new(Vec::new()),
        });
        let classifier = InferenceClassifier::new(client.clone());
        let c = classifier.classify(&raw(), &["Acme".to_string()]).await.unwrap();
        assert_eq!(c.related_entity.as_deref(), Some("Acme"));

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].schema_name, "classification");
        assert!(seen[0].user.contains("Tracked companies: Acme"));
    }

    #[tokio::test]
    async fn malformed_reply_is_a_schema_error() {
        let client = Arc::new(CannedClient {
            reply: Ok(serde_json::json!({"verdict": "yes"})),
            seen: Mutex::new(Vec::new()),
        });
        let classifier = InferenceClassifier::new(client);
        let err = classifier.classify(&raw(), &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::Schema(_)));
    }

    #[tokio::test]
    async fn researcher_prefers_full_text_and_names_the_tool() {
        let client = Arc::new(CannedClient {
            reply: Ok(serde_json::json!({
                "deal_summary": "Acme is divesting its payments unit.",
                "potential_assets": ["Payments"],
                "separation_complexity": "high",
                "confidence": "medium"
            })),
            seen: Mutex::new(Vec::new()),
        });
        let researcher = InferenceResearcher::new(client.clone());
        let item = AnalyzedItem {
            item: dealwire_common::ClassifiedItem {
                item: raw(),
                is_relevant: true,
                category: dealwire_common::ItemCategory::Portfolio,
                deal_type: dealwire_common::DealType::Divestiture,
                relevance_level: dealwire_common::RelevanceLevel::High,
                related_entity: Some("Acme".into()),
                confidence: 90,
                reason: None,
                classification_error: None,
            },
            signal_score: 80,
            opportunity_flags: std::collections::BTreeSet::from([
                dealwire_common::OpportunityFlag::CarveOutHigh,
            ]),
            why_it_matters: Some("Seller exiting payments.".into()),
            used_full_text: true,
            analysis_error: None,
        };

        let research = researcher
            .research(&item, Some("Full article body."))
            .await
            .unwrap();
        assert_eq!(research.potential_assets, vec!["Payments"]);

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].schema_name, "carve_out_research");
        assert!(seen[0].user.contains("Full article body."));
        assert!(!seen[0].user.contains("Deal closed."));
        assert!(seen[0].user.contains("Flags: carve_out_high"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("hi", 10), "hi");
    }
}
