// Test mocks for the digest pipeline.
//
// One mock per trait boundary:
// - StaticCollector / FailingCollector (Collector)
// - MockClassifier (Classifier), MockAnalyzer (Analyzer) and MockResearcher
//   (CarveOutResearcher), closure-based with call counters
// - MockFetcher (DocumentFetcher), HashMap-based URL -> body
// - MemoryArtifactSink (ArtifactSink) and RecordingDelivery (DeliveryBackend)
//
// Plus builders for items, classifications and a fast test Config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use dealwire_common::{
    AnalyzedItem, Config, DealType, EnrichedItem, ItemCategory, RawItem, RelevanceLevel,
    StageLimits,
};

use crate::collect::Collector;
use crate::deliver::{DeliveryBackend, DeliveryReceipt};
use crate::digest::{ArtifactLocation, ArtifactSink, Digest};
use crate::executor::CallError;
use crate::inference::{
    Analysis, Analyzer, CarveOutPotential, CarveOutResearch, CarveOutResearcher, Classification,
    Classifier, InferenceError, ResearchConfidence, SeparationComplexity, ThreatLevel,
};
use crate::stages::DocumentFetcher;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Undated item from source `source` at `url`.
pub fn raw_item(source: &str, url: &str, title: &str, summary: &str) -> RawItem {
    RawItem::new("static", source, url, title, summary, None)
}

pub fn classification(category: ItemCategory, entity: Option<&str>) -> Classification {
    Classification {
        is_relevant: category != ItemCategory::NotRelevant,
        category,
        deal_type: if category == ItemCategory::MajorDeal {
            DealType::MaAcquisition
        } else {
            DealType::NotADeal
        },
        relevance_level: RelevanceLevel::High,
        related_entity: entity.map(str::to_string),
        confidence: 85,
        reason: None,
    }
}

pub fn analysis(score: u8, carve_out: CarveOutPotential) -> Analysis {
    Analysis {
        signal_score: score,
        carve_out_potential: carve_out,
        competitive_threat: ThreatLevel::None,
        why_it_matters: format!("Scored {score}."),
    }
}

/// Default config with generous limits and no delivery webhook.
pub fn test_config() -> Config {
    let fast = StageLimits {
        max_attempts: 2,
        base_delay: std::time::Duration::from_millis(10),
        ..StageLimits::per_minute(4, 10_000)
    };
    let mut config = Config::default();
    config.tracked_entities = vec!["Acme".to_string(), "Globex".to_string()];
    config.collect = fast.clone();
    config.classify = fast.clone();
    config.analyze = fast.clone();
    config.enrich.limits = fast.clone();
    config.enrich.min_chars = 10;
    config.research.limits = fast;
    config
}

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

pub struct StaticCollector {
    name: String,
    items: Vec<RawItem>,
    calls: AtomicUsize,
}

impl StaticCollector {
    pub fn new(name: &str, items: Vec<RawItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for StaticCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "static"
    }

    async fn collect(&self) -> Result<Vec<RawItem>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.clone())
    }
}

pub struct FailingCollector {
    name: String,
}

impl FailingCollector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Collector for FailingCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        "static"
    }

    async fn collect(&self) -> Result<Vec<RawItem>, CallError> {
        Err(CallError::Failed("feed returned 503 Service Unavailable".into()))
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

type ClassifyFn = dyn Fn(&RawItem) -> Result<Classification, InferenceError> + Send + Sync;
type AnalyzeFn = dyn Fn(&EnrichedItem) -> Result<Analysis, InferenceError> + Send + Sync;
type ResearchFn = dyn Fn(&AnalyzedItem) -> Result<CarveOutResearch, InferenceError> + Send + Sync;

pub struct MockClassifier {
    respond: Box<ClassifyFn>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(
        respond: impl Fn(&RawItem) -> Result<Classification, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Everything is a high-relevance portfolio item about the first word of its title.
    pub fn all_portfolio() -> Self {
        Self::new(|item| {
            let entity = item.title.split_whitespace().next().map(str::to_string);
            Ok(Classification {
                related_entity: entity,
                ..classification(ItemCategory::Portfolio, None)
            })
        })
    }

    pub fn none_relevant() -> Self {
        Self::new(|_| Ok(classification(ItemCategory::NotRelevant, None)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(
        &self,
        item: &RawItem,
        _tracked_entities: &[String],
    ) -> Result<Classification, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(item)
    }
}

pub struct MockAnalyzer {
    respond: Box<AnalyzeFn>,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new(
        respond: impl Fn(&EnrichedItem) -> Result<Analysis, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scoring(score: u8) -> Self {
        Self::new(move |_| Ok(analysis(score, CarveOutPotential::None)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, item: &EnrichedItem) -> Result<Analysis, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(item)
    }
}

pub struct MockResearcher {
    respond: Box<ResearchFn>,
    calls: AtomicUsize,
}

impl MockResearcher {
    pub fn new(
        respond: impl Fn(&AnalyzedItem) -> Result<CarveOutResearch, InferenceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// A one-line dossier naming the item's title.
    pub fn summarizing() -> Self {
        Self::new(|item| Ok(dossier(&format!("Research on {}.", item.item.item.title))))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarveOutResearcher for MockResearcher {
    async fn research(
        &self,
        item: &AnalyzedItem,
        _full_text: Option<&str>,
    ) -> Result<CarveOutResearch, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(item)
    }
}

pub fn dossier(summary: &str) -> CarveOutResearch {
    CarveOutResearch {
        deal_summary: summary.to_string(),
        potential_assets: vec!["Operating unit".to_string()],
        separation_complexity: SeparationComplexity::Medium,
        risks: Vec::new(),
        diligence_questions: Vec::new(),
        next_steps: Vec::new(),
        confidence: ResearchConfidence::Medium,
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based document fetcher. Unregistered URLs fail.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, Result<String, CallError>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), Ok(body.to_string()));
        self
    }

    pub fn on_error(mut self, url: &str, error: CallError) -> Self {
        self.pages.insert(url.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(CallError::Failed(format!("MockFetcher: no page registered for {url}"))))
    }
}

// ---------------------------------------------------------------------------
// Artifacts and delivery
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryArtifactSink {
    persisted: Mutex<Vec<(Digest, String)>>,
    fail: bool,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn persisted(&self) -> Vec<(Digest, String)> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn persist(&self, digest: &Digest, markdown: &str) -> Result<ArtifactLocation> {
        if self.fail {
            bail!("disk full");
        }
        self.persisted
            .lock()
            .unwrap()
            .push((digest.clone(), markdown.to_string()));
        Ok(ArtifactLocation {
            json: format!("memory://digest_{}.json", digest.run_id),
            markdown: format!("memory://digest_{}.md", digest.run_id),
        })
    }
}

#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<Digest>>,
    fail: bool,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<Digest> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryBackend for RecordingDelivery {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, digest: &Digest, _markdown: &str) -> Result<DeliveryReceipt> {
        if self.fail {
            bail!("webhook returned 502 Bad Gateway");
        }
        self.delivered.lock().unwrap().push(digest.clone());
        Ok(DeliveryReceipt {
            backend: self.name().to_string(),
            detail: None,
        })
    }
}

/// Shorthand for `Arc::new`.
pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
