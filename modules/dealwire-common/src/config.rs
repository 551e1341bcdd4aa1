use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::error::ConfigError;
use crate::types::{DigestSection, ItemCategory, OpportunityFlag};

/// Concurrency, rate and retry budget for one external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLimits {
    /// Maximum tasks in flight.
    pub concurrency: usize,
    /// Maximum calls in any rolling `window`.
    pub max_per_window: u32,
    pub window: Duration,
    /// Attempts per task including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
}

impl StageLimits {
    pub fn per_minute(concurrency: usize, max_per_minute: u32) -> Self {
        Self {
            concurrency,
            max_per_window: max_per_minute,
            window: Duration::from_secs(60),
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            call_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Override fields from `{PREFIX}_CONCURRENCY`, `{PREFIX}_RPM`,
    /// `{PREFIX}_MAX_ATTEMPTS`, `{PREFIX}_BASE_DELAY_MS` and `{PREFIX}_TIMEOUT_SECS`.
    fn from_env(prefix: &str, defaults: StageLimits) -> Result<Self, ConfigError> {
        let timeout_secs = env_or(
            &format!("{prefix}_TIMEOUT_SECS"),
            defaults.call_timeout.map(|d| d.as_secs()).unwrap_or(0),
        )?;
        Ok(Self {
            concurrency: env_or(&format!("{prefix}_CONCURRENCY"), defaults.concurrency)?,
            max_per_window: env_or(&format!("{prefix}_RPM"), defaults.max_per_window)?,
            window: defaults.window,
            max_attempts: env_or(&format!("{prefix}_MAX_ATTEMPTS"), defaults.max_attempts)?,
            base_delay: Duration::from_millis(env_or(
                &format!("{prefix}_BASE_DELAY_MS"),
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: defaults.max_delay,
            call_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(format!("{name}: concurrency must be >= 1")));
        }
        if self.max_per_window == 0 {
            return Err(ConfigError::Validation(format!("{name}: rate limit must be >= 1")));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(format!("{name}: max attempts must be >= 1")));
        }
        if self.window.is_zero() {
            return Err(ConfigError::Validation(format!("{name}: window must be non-zero")));
        }
        Ok(())
    }
}

/// Full-text fetching bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichSettings {
    /// Top-K survivors that get their full text fetched.
    pub max_items: usize,
    /// Fetched text is truncated to this many characters.
    pub max_chars: usize,
    /// Extracted text shorter than this counts as a failed fetch.
    pub min_chars: usize,
    pub limits: StageLimits,
}

/// Follow-up research on curated carve-out candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchSettings {
    pub enabled: bool,
    /// At most this many flagged items are researched per run.
    pub max_items: usize,
    /// Flags that make a curated item a research candidate, in priority order.
    pub flags: Vec<OpportunityFlag>,
    pub limits: StageLimits,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 5,
            flags: vec![OpportunityFlag::CarveOutHigh, OpportunityFlag::CarveOutMedium],
            limits: StageLimits {
                call_timeout: Some(Duration::from_secs(90)),
                ..StageLimits::per_minute(2, 20)
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurationSettings {
    pub min_signal_score: u8,
    /// Per-category score thresholds overriding `min_signal_score`.
    pub category_thresholds: BTreeMap<ItemCategory, u8>,
    /// Maximum items per (section, entity) group.
    pub max_per_group: usize,
    pub section_caps: BTreeMap<DigestSection, usize>,
    pub max_total: usize,
    /// Flags whose items bypass threshold and caps.
    pub exempt_flags: BTreeSet<OpportunityFlag>,
}

impl CurationSettings {
    pub fn threshold_for(&self, category: ItemCategory) -> u8 {
        self.category_thresholds
            .get(&category)
            .copied()
            .unwrap_or(self.min_signal_score)
    }
}

impl Default for CurationSettings {
    fn default() -> Self {
        Self {
            min_signal_score: 55,
            category_thresholds: BTreeMap::new(),
            max_per_group: 3,
            section_caps: BTreeMap::from([
                (DigestSection::Portfolio, 8),
                (DigestSection::Competitive, 10),
                (DigestSection::Deals, 12),
            ]),
            max_total: 30,
            exempt_flags: BTreeSet::from([
                OpportunityFlag::CarveOutHigh,
                OpportunityFlag::CarveOutMedium,
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointBackend {
    File,
    Postgres,
}

/// Immutable run configuration threaded through the orchestrator, executors
/// and stages.
#[derive(Debug, Clone)]
pub struct Config {
    // Providers
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub serper_api_key: Option<String>,

    // Sources
    pub feeds: Vec<FeedSource>,
    pub search_queries: Vec<String>,
    pub tracked_entities: Vec<String>,
    pub trusted_domains: Vec<String>,
    pub lookback_days: i64,
    pub keep_undated: bool,
    pub max_items_per_feed: usize,

    // Stage budgets
    pub collect: StageLimits,
    pub classify: StageLimits,
    pub analyze: StageLimits,
    pub enrich: EnrichSettings,
    pub curation: CurationSettings,
    pub research: ResearchSettings,

    // Output
    pub delivery_enabled: bool,
    pub webhook_url: Option<String>,
    pub output_dir: PathBuf,

    // Checkpoints
    pub checkpoint_backend: CheckpointBackend,
    pub checkpoint_dir: PathBuf,
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            anthropic_model: "claude-3-5-haiku-latest".to_string(),
            serper_api_key: None,
            feeds: Vec::new(),
            search_queries: Vec::new(),
            tracked_entities: Vec::new(),
            trusted_domains: Vec::new(),
            lookback_days: 7,
            keep_undated: true,
            max_items_per_feed: 30,
            collect: StageLimits::per_minute(4, 50),
            classify: StageLimits::per_minute(4, 60),
            analyze: StageLimits::per_minute(3, 60),
            enrich: EnrichSettings {
                max_items: 60,
                max_chars: 4000,
                min_chars: 200,
                limits: StageLimits {
                    max_attempts: 2,
                    call_timeout: Some(Duration::from_secs(20)),
                    ..StageLimits::per_minute(6, 60)
                },
            },
            curation: CurationSettings::default(),
            research: ResearchSettings::default(),
            delivery_enabled: true,
            webhook_url: None,
            output_dir: PathBuf::from("output"),
            checkpoint_backend: CheckpointBackend::File,
            checkpoint_dir: PathBuf::from(".dealwire/checkpoints"),
            database_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL").ok();
        let checkpoint_backend = match env::var("CHECKPOINT_BACKEND").ok().as_deref() {
            Some("postgres") => CheckpointBackend::Postgres,
            Some("file") => CheckpointBackend::File,
            Some(other) => {
                return Err(ConfigError::invalid("CHECKPOINT_BACKEND", other, "expected file|postgres").into())
            }
            None if database_url.is_some() => CheckpointBackend::Postgres,
            None => CheckpointBackend::File,
        };

        let config = Self {
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            anthropic_model: env::var("ANTHROPIC_MODEL").unwrap_or(defaults.anthropic_model),
            serper_api_key: env::var("SERPER_API_KEY").ok(),
            feeds: parse_feeds(&env::var("FEEDS").unwrap_or_default())?,
            search_queries: split_list(&env::var("SEARCH_QUERIES").unwrap_or_default(), ';'),
            tracked_entities: split_list(&env::var("TRACKED_ENTITIES").unwrap_or_default(), ','),
            trusted_domains: split_list(&env::var("TRUSTED_DOMAINS").unwrap_or_default(), ','),
            lookback_days: env_or("LOOKBACK_DAYS", defaults.lookback_days)?,
            keep_undated: env_or("KEEP_UNDATED", defaults.keep_undated)?,
            max_items_per_feed: env_or("MAX_ITEMS_PER_FEED", defaults.max_items_per_feed)?,
            collect: StageLimits::from_env("COLLECT", defaults.collect)?,
            classify: StageLimits::from_env("CLASSIFY", defaults.classify)?,
            analyze: StageLimits::from_env("ANALYZE", defaults.analyze)?,
            enrich: EnrichSettings {
                max_items: env_or("ENRICH_MAX_ITEMS", defaults.enrich.max_items)?,
                max_chars: env_or("ENRICH_MAX_CHARS", defaults.enrich.max_chars)?,
                min_chars: env_or("ENRICH_MIN_CHARS", defaults.enrich.min_chars)?,
                limits: StageLimits::from_env("ENRICH", defaults.enrich.limits)?,
            },
            curation: curation_from_env(defaults.curation)?,
            research: ResearchSettings {
                enabled: env_or("RESEARCH_ENABLED", defaults.research.enabled)?,
                max_items: env_or("RESEARCH_MAX_ITEMS", defaults.research.max_items)?,
                flags: defaults.research.flags,
                limits: StageLimits::from_env("RESEARCH", defaults.research.limits)?,
            },
            delivery_enabled: env_or("DELIVERY_ENABLED", defaults.delivery_enabled)?,
            webhook_url: env::var("DIGEST_WEBHOOK_URL").ok(),
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            checkpoint_backend,
            checkpoint_dir: env::var("CHECKPOINT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_dir),
            database_url,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collect.validate("collect")?;
        self.classify.validate("classify")?;
        self.analyze.validate("analyze")?;
        self.enrich.limits.validate("enrich")?;
        self.research.limits.validate("research")?;

        let curation = &self.curation;
        // Failed analyses score 0 and must fall below every threshold.
        if curation.min_signal_score == 0 || curation.category_thresholds.values().any(|t| *t == 0) {
            return Err(ConfigError::Validation(
                "score thresholds must be >= 1".to_string(),
            ));
        }
        if curation.min_signal_score > 100 || curation.category_thresholds.values().any(|t| *t > 100) {
            return Err(ConfigError::Validation(
                "score thresholds must be <= 100".to_string(),
            ));
        }
        if self.enrich.min_chars > self.enrich.max_chars {
            return Err(ConfigError::Validation(
                "ENRICH_MIN_CHARS exceeds ENRICH_MAX_CHARS".to_string(),
            ));
        }
        if self.lookback_days < 1 {
            return Err(ConfigError::Validation("LOOKBACK_DAYS must be >= 1".to_string()));
        }
        if self.checkpoint_backend == CheckpointBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::Validation(
                "postgres checkpoints require DATABASE_URL".to_string(),
            ));
        }
        Ok(())
    }

    /// Log the effective configuration with secrets truncated.
    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  ANTHROPIC_API_KEY: {}", preview(&self.anthropic_api_key));
        tracing::info!("  ANTHROPIC_MODEL: {}", self.anthropic_model);
        tracing::info!("  SERPER_API_KEY: {}", preview(&self.serper_api_key));
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  DIGEST_WEBHOOK_URL: {}", preview(&self.webhook_url));
        tracing::info!(
            feeds = self.feeds.len(),
            queries = self.search_queries.len(),
            entities = self.tracked_entities.len(),
            trusted_domains = self.trusted_domains.len(),
            lookback_days = self.lookback_days,
            delivery_enabled = self.delivery_enabled,
            research_enabled = self.research.enabled,
            "  sources"
        );
    }
}

/// First five characters of a secret plus its length.
fn preview(val: &Option<String>) -> String {
    match val {
        Some(v) if !v.is_empty() => {
            let head: String = v.chars().take(5).collect();
            format!("{}...({} chars)", head, v.chars().count())
        }
        _ => "<not set>".to_string(),
    }
}

fn curation_from_env(defaults: CurationSettings) -> Result<CurationSettings, ConfigError> {
    let mut section_caps = defaults.section_caps.clone();
    for section in DigestSection::ALL {
        let key = format!("MAX_{}_ITEMS", section.as_str().to_uppercase());
        let default = section_caps.get(&section).copied().unwrap_or(defaults.max_total);
        section_caps.insert(section, env_or(&key, default)?);
    }

    let category_thresholds = match env::var("CATEGORY_THRESHOLDS") {
        Ok(raw) => parse_pairs::<ItemCategory, u8>("CATEGORY_THRESHOLDS", &raw)?,
        Err(_) => defaults.category_thresholds,
    };

    let exempt_flags = match env::var("CAP_EXEMPT_FLAGS") {
        Ok(raw) => split_list(&raw, ',')
            .iter()
            .map(|f| {
                f.parse::<OpportunityFlag>()
                    .map_err(|e| ConfigError::invalid("CAP_EXEMPT_FLAGS", f, e))
            })
            .collect::<Result<_, _>>()?,
        Err(_) => defaults.exempt_flags,
    };

    Ok(CurationSettings {
        min_signal_score: env_or("MIN_SIGNAL_SCORE", defaults.min_signal_score)?,
        category_thresholds,
        max_per_group: env_or("MAX_ITEMS_PER_GROUP", defaults.max_per_group)?,
        section_caps,
        max_total: env_or("MAX_DIGEST_ITEMS", defaults.max_total)?,
        exempt_flags,
    })
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e.to_string())),
        _ => Ok(default),
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// `name=url` pairs separated by commas. A bare URL is named after itself.
fn parse_feeds(raw: &str) -> Result<Vec<FeedSource>, ConfigError> {
    split_list(raw, ',')
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if url.starts_with("http") => Ok(FeedSource {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            }),
            None if entry.starts_with("http") => Ok(FeedSource {
                name: entry.clone(),
                url: entry.clone(),
            }),
            _ => Err(ConfigError::invalid("FEEDS", &entry, "expected name=https://...")),
        })
        .collect()
}

fn parse_pairs<K, V>(key: &str, raw: &str) -> Result<BTreeMap<K, V>, ConfigError>
where
    K: FromStr + Ord,
    K::Err: std::fmt::Display,
    V: FromStr,
    V::Err: std::fmt::Display,
{
    split_list(raw, ',')
        .iter()
        .map(|pair| {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::invalid(key, pair, "expected key=value"))?;
            let k = k.trim().parse::<K>().map_err(|e| ConfigError::invalid(key, pair, e.to_string()))?;
            let v = v.trim().parse::<V>().map_err(|e| ConfigError::invalid(key, pair, e.to_string()))?;
            Ok((k, v))
        })
        .collect()
}
