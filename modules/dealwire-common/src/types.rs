use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Collected items
// ---------------------------------------------------------------------------

/// A news item as returned by a collector. Never mutated after collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source_name: String,
    pub source_url: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Body text when the provider already ships one (e.g. `content:encoded`).
    pub full_text: Option<String>,
    /// Collector that produced the item.
    pub provider: String,
}

impl RawItem {
    pub fn new(
        provider: impl Into<String>,
        source_name: impl Into<String>,
        source_url: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        let source_name = source_name.into();
        let source_url = source_url.into();
        Self {
            id: item_id(&source_name, &source_url),
            title: title.into(),
            summary: summary.into(),
            source_name,
            source_url,
            published_at,
            full_text: None,
            provider: provider.into(),
        }
    }
}

/// Stable item id: hex SHA-256 over source name and URL.
pub fn item_id(source_name: &str, source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(source_url.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    Portfolio,
    Competitor,
    MajorDeal,
    Industry,
    NotRelevant,
}

impl ItemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Competitor => "competitor",
            Self::MajorDeal => "major_deal",
            Self::Industry => "industry",
            Self::NotRelevant => "not_relevant",
        }
    }

    /// Digest section the category lands in. `NotRelevant` has none.
    pub fn section(&self) -> Option<DigestSection> {
        match self {
            Self::Portfolio => Some(DigestSection::Portfolio),
            Self::Competitor | Self::Industry => Some(DigestSection::Competitive),
            Self::MajorDeal => Some(DigestSection::Deals),
            Self::NotRelevant => None,
        }
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "portfolio" => Ok(Self::Portfolio),
            "competitor" => Ok(Self::Competitor),
            "major_deal" => Ok(Self::MajorDeal),
            "industry" => Ok(Self::Industry),
            "not_relevant" => Ok(Self::NotRelevant),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    MaAcquisition,
    MaMerger,
    Divestiture,
    Fundraising,
    Ipo,
    Partnership,
    ProductLaunch,
    PersonnelChange,
    StrategicUpdate,
    NotADeal,
}

impl DealType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MaAcquisition => "Acquisition",
            Self::MaMerger => "Merger",
            Self::Divestiture => "Divestiture",
            Self::Fundraising => "Fundraising",
            Self::Ipo => "IPO",
            Self::Partnership => "Partnership",
            Self::ProductLaunch => "Product launch",
            Self::PersonnelChange => "Personnel change",
            Self::StrategicUpdate => "Strategic update",
            Self::NotADeal => "Other",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceLevel {
    High,
    Medium,
    Low,
}

impl RelevanceLevel {
    /// 0 is the most relevant.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

/// Outcome of classifying one RawItem. Produced for every collected item,
/// including rejects and items whose classification call failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub item: RawItem,
    pub is_relevant: bool,
    pub category: ItemCategory,
    pub deal_type: DealType,
    pub relevance_level: RelevanceLevel,
    pub related_entity: Option<String>,
    /// 0..=100
    pub confidence: u8,
    pub reason: Option<String>,
    pub classification_error: Option<String>,
}

impl ClassifiedItem {
    /// Fallback used when classification fails: not relevant, zero confidence.
    pub fn rejected(item: RawItem, error: impl Into<String>) -> Self {
        Self {
            item,
            is_relevant: false,
            category: ItemCategory::NotRelevant,
            deal_type: DealType::NotADeal,
            relevance_level: RelevanceLevel::Low,
            related_entity: None,
            confidence: 0,
            reason: None,
            classification_error: Some(error.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

/// Items sharing a canonical key. Exactly one member survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub key: String,
    pub member_ids: Vec<String>,
    pub survivor_id: String,
}

/// Dedup verdict for a single relevant item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub item_id: String,
    pub group_key: String,
    pub superseded_by: Option<String>,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Fetched { chars: usize },
    NotSelected,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedItem {
    pub item: ClassifiedItem,
    pub full_text: Option<String>,
    pub fetch: FetchOutcome,
}

impl EnrichedItem {
    pub fn id(&self) -> &str {
        self.item.id()
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityFlag {
    CarveOutHigh,
    CarveOutMedium,
    CarveOutLow,
    CompetitiveThreatHigh,
}

impl OpportunityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CarveOutHigh => "carve_out_high",
            Self::CarveOutMedium => "carve_out_medium",
            Self::CarveOutLow => "carve_out_low",
            Self::CompetitiveThreatHigh => "competitive_threat_high",
        }
    }
}

impl FromStr for OpportunityFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "carve_out_high" => Ok(Self::CarveOutHigh),
            "carve_out_medium" => Ok(Self::CarveOutMedium),
            "carve_out_low" => Ok(Self::CarveOutLow),
            "competitive_threat_high" => Ok(Self::CompetitiveThreatHigh),
            other => Err(format!("unknown opportunity flag: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedItem {
    pub item: ClassifiedItem,
    /// 0..=100. Zero when analysis failed.
    pub signal_score: u8,
    pub opportunity_flags: BTreeSet<OpportunityFlag>,
    pub why_it_matters: Option<String>,
    pub used_full_text: bool,
    pub analysis_error: Option<String>,
}

impl AnalyzedItem {
    pub fn failed(item: ClassifiedItem, used_full_text: bool, error: impl Into<String>) -> Self {
        Self {
            item,
            signal_score: 0,
            opportunity_flags: BTreeSet::new(),
            why_it_matters: None,
            used_full_text,
            analysis_error: Some(error.into()),
        }
    }

    pub fn id(&self) -> &str {
        self.item.id()
    }
}

// ---------------------------------------------------------------------------
// Curation
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DigestSection {
    Portfolio,
    Competitive,
    Deals,
}

impl DigestSection {
    pub const ALL: [DigestSection; 3] = [Self::Portfolio, Self::Competitive, Self::Deals];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Portfolio => "Portfolio Companies",
            Self::Competitive => "Competitive & Industry",
            Self::Deals => "Major Deals",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Competitive => "competitive",
            Self::Deals => "deals",
        }
    }
}

impl FromStr for DigestSection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "portfolio" => Ok(Self::Portfolio),
            "competitive" => Ok(Self::Competitive),
            "deals" => Ok(Self::Deals),
            other => Err(format!("unknown digest section: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationReason {
    ScoreThreshold,
    CapExceeded,
    FlagOverride,
    Selected,
}

/// Inclusion verdict for one analyzed item. Never alters the item itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationDecision {
    pub item_id: String,
    pub included: bool,
    pub reason: CurationReason,
    pub section: Option<DigestSection>,
    pub group: String,
    /// Position in the digest, starting at 0. `None` when excluded.
    pub rank: Option<usize>,
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    Collecting,
    Classifying,
    Deduping,
    Enriching,
    Analyzing,
    Curating,
    Researching,
    Composing,
    Persisting,
    Delivering,
    Done,
    Failed,
}

impl PipelineStage {
    /// Stages that do work and produce a checkpointed output, in run order.
    pub const WORK: [PipelineStage; 10] = [
        Self::Collecting,
        Self::Classifying,
        Self::Deduping,
        Self::Enriching,
        Self::Analyzing,
        Self::Curating,
        Self::Researching,
        Self::Composing,
        Self::Persisting,
        Self::Delivering,
    ];

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Collecting => "collecting",
            Self::Classifying => "classifying",
            Self::Deduping => "deduping",
            Self::Enriching => "enriching",
            Self::Analyzing => "analyzing",
            Self::Curating => "curating",
            Self::Researching => "researching",
            Self::Composing => "composing",
            Self::Persisting => "persisting",
            Self::Delivering => "delivering",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_work(&self) -> bool {
        Self::WORK.contains(self)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "collecting" => Ok(Self::Collecting),
            "classifying" => Ok(Self::Classifying),
            "deduping" => Ok(Self::Deduping),
            "enriching" => Ok(Self::Enriching),
            "analyzing" => Ok(Self::Analyzing),
            "curating" => Ok(Self::Curating),
            "researching" => Ok(Self::Researching),
            "composing" => Ok(Self::Composing),
            "persisting" => Ok(Self::Persisting),
            "delivering" => Ok(Self::Delivering),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown pipeline stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Failed,
    Done,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_is_stable_and_source_scoped() {
        let a = item_id("Reuters", "https://x.com/a");
        assert_eq!(a, item_id("Reuters", "https://x.com/a"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, item_id("Bloomberg", "https://x.com/a"));
    }

    #[test]
    fn stage_ordinals_follow_run_order() {
        let ordinals: Vec<u8> = PipelineStage::WORK.iter().map(|s| s.ordinal()).collect();
        let mut sorted = ordinals.clone();
        sorted.sort();
        assert_eq!(ordinals, sorted);
        assert!(PipelineStage::Init < PipelineStage::Collecting);
        assert!(PipelineStage::Delivering < PipelineStage::Done);
    }

    #[test]
    fn stage_names_round_trip_through_from_str() {
        for stage in PipelineStage::WORK {
            assert_eq!(stage.as_str().parse::<PipelineStage>().unwrap(), stage);
        }
    }

    #[test]
    fn categories_map_to_sections() {
        assert_eq!(ItemCategory::Industry.section(), Some(DigestSection::Competitive));
        assert_eq!(ItemCategory::Competitor.section(), Some(DigestSection::Competitive));
        assert_eq!(ItemCategory::NotRelevant.section(), None);
    }

    #[test]
    fn rejected_item_is_not_relevant_with_zero_confidence() {
        let raw = RawItem::new("rss", "Feed", "https://a.com/1", "t", "s", None);
        let c = ClassifiedItem::rejected(raw, "boom");
        assert!(!c.is_relevant);
        assert_eq!(c.confidence, 0);
        assert_eq!(c.category, ItemCategory::NotRelevant);
        assert_eq!(c.classification_error.as_deref(), Some("boom"));
    }
}
