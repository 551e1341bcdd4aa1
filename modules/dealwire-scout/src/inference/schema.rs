use std::collections::BTreeSet;

use dealwire_common::{DealType, ItemCategory, OpportunityFlag, RelevanceLevel};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::InferenceError;

/// A typed model answer with its own JSON schema and semantic checks.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Self-contained schema (subschemas inlined, no `$ref`s).
    fn schema() -> serde_json::Value {
        let generator = SchemaSettings::draft07()
            .with(|s| {
                s.inline_subschemas = true;
                s.meta_schema = None;
            })
            .into_generator();
        let root = generator.into_root_schema_for::<Self>();
        let mut value = serde_json::to_value(root).unwrap_or_default();
        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
        }
        value
    }

    fn tool_name() -> String {
        <Self as JsonSchema>::schema_name().to_lowercase()
    }

    /// Checks serde cannot express (ranges, cross-field consistency).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Decode and validate a raw response.
pub fn parse_structured<T: StructuredOutput>(value: serde_json::Value) -> Result<T, InferenceError> {
    let parsed: T =
        serde_json::from_value(value).map_err(|e| InferenceError::Schema(e.to_string()))?;
    parsed.validate().map_err(InferenceError::Schema)?;
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub is_relevant: bool,
    pub category: ItemCategory,
    pub deal_type: DealType,
    pub relevance_level: RelevanceLevel,
    /// Tracked company or competitor the item is about, if any.
    #[serde(default)]
    pub related_entity: Option<String>,
    /// 0-100
    pub confidence: u8,
    #[serde(default)]
    pub reason: Option<String>,
}

impl StructuredOutput for Classification {
    fn validate(&self) -> Result<(), String> {
        if self.confidence > 100 {
            return Err(format!("confidence {} out of range", self.confidence));
        }
        if self.is_relevant == (self.category == ItemCategory::NotRelevant) {
            return Err(format!(
                "is_relevant={} contradicts category {}",
                self.is_relevant, self.category
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CarveOutPotential {
    High,
    Medium,
    Low,
    None,
    #[serde(rename = "n/a")]
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Analysis {
    /// 0-100
    pub signal_score: u8,
    pub carve_out_potential: CarveOutPotential,
    pub competitive_threat: ThreatLevel,
    pub why_it_matters: String,
}

impl Analysis {
    pub fn opportunity_flags(&self) -> BTreeSet<OpportunityFlag> {
        let mut flags = BTreeSet::new();
        match self.carve_out_potential {
            CarveOutPotential::High => {
                flags.insert(OpportunityFlag::CarveOutHigh);
            }
            CarveOutPotential::Medium => {
                flags.insert(OpportunityFlag::CarveOutMedium);
            }
            CarveOutPotential::Low => {
                flags.insert(OpportunityFlag::CarveOutLow);
            }
            CarveOutPotential::None | CarveOutPotential::NotApplicable => {}
        }
        if self.competitive_threat == ThreatLevel::High {
            flags.insert(OpportunityFlag::CompetitiveThreatHigh);
        }
        flags
    }
}

impl StructuredOutput for Analysis {
    fn validate(&self) -> Result<(), String> {
        if self.signal_score > 100 {
            return Err(format!("signal_score {} out of range", self.signal_score));
        }
        if self.why_it_matters.trim().is_empty() {
            return Err("why_it_matters is empty".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Carve-out research
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeparationComplexity {
    Low,
    Medium,
    High,
    Unknown,
}

impl SeparationComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResearchConfidence {
    Low,
    Medium,
    High,
}

impl ResearchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Follow-up dossier on a carve-out candidate, grounded only in the item's sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CarveOutResearch {
    /// Two or three sentences on the transaction and why it is a carve-out candidate.
    pub deal_summary: String,
    /// Business units or assets that could be separated.
    #[serde(default)]
    pub potential_assets: Vec<String>,
    pub separation_complexity: SeparationComplexity,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub diligence_questions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub confidence: ResearchConfidence,
}

impl StructuredOutput for CarveOutResearch {
    fn tool_name() -> String {
        "carve_out_research".to_string()
    }

    fn validate(&self) -> Result<(), String> {
        if self.deal_summary.trim().is_empty() {
            return Err("deal_summary is empty".to_string());
        }
        Ok(())
    }
}
