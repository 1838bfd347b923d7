//! Pipeline configuration.
//!
//! The caller supplies configuration; the core never reads the environment.
//! `PipelineConfigFile` is the lenient on-disk shape, `PipelineConfig` the
//! validated one. Validation runs before any record is touched.

use crate::{
    error::{EtlError, EtlResult},
    types::{RegionId, SubscriberId},
};
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Location assigned to subscribers with no registered region.
pub const UNASSIGNED_REGION: &str = "unassigned";

// ── Time buckets ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Hour,
    Day,
    Week,
}

impl TimeBucket {
    /// Start of the bucket containing `at`. Weeks start on Monday.
    pub fn bucket_start(&self, at: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Hour => at
                .date()
                .and_time(NaiveTime::from_hms_opt(at.hour(), 0, 0).unwrap_or(NaiveTime::MIN)),
            Self::Day => at.date().and_time(NaiveTime::MIN),
            Self::Week => {
                let date = at.date();
                let offset = date.weekday().num_days_from_monday() as i64;
                (date - chrono::Duration::days(offset)).and_time(NaiveTime::MIN)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

// ── Join policy ─────────────────────────────────────────────────────────────

/// Tie-break among equally close billing candidates for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingTieBreak {
    #[default]
    LowestAmount,
    HighestAmount,
}

// ── Rules ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle {
    pub enabled: bool,
}

impl Default for Toggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Fires when a count strictly exceeds `max_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountThreshold {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub max_count: u64,
}

/// Fires when the relative divergence from a baseline exceeds `tolerance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioTolerance {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub tolerance: f64,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub unbilled_premium: Toggle,
    pub excess_international_volume: CountThreshold,
    pub duration_billing_mismatch: RatioTolerance,
    pub duplicate_counterparty_burst: CountThreshold,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            unbilled_premium: Toggle::default(),
            excess_international_volume: CountThreshold {
                enabled: true,
                max_count: 10,
            },
            duration_billing_mismatch: RatioTolerance {
                enabled: true,
                tolerance: 0.5,
            },
            duplicate_counterparty_burst: CountThreshold {
                enabled: true,
                max_count: 5,
            },
        }
    }
}

// ── Regions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Country dialing code without the international prefix, e.g. `"1"`.
    pub dialing_code: String,
}

// ── Baselines ───────────────────────────────────────────────────────────────

/// Historical billed-amount-per-minute ratio per subscriber, in major units.
pub trait BaselineProvider {
    fn ratio_for(&self, subscriber_id: &str) -> Option<f64>;
}

impl BaselineProvider for BTreeMap<SubscriberId, f64> {
    fn ratio_for(&self, subscriber_id: &str) -> Option<f64> {
        self.get(subscriber_id).copied()
    }
}

impl BaselineProvider for HashMap<SubscriberId, f64> {
    fn ratio_for(&self, subscriber_id: &str) -> Option<f64> {
        self.get(subscriber_id).copied()
    }
}

// ── Config ──────────────────────────────────────────────────────────────────

/// On-disk shape. Every field is optional so that missing required
/// settings surface as configuration errors rather than parse errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfigFile {
    pub time_bucket_granularity: Option<TimeBucket>,
    pub international_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub premium_service_types: BTreeSet<String>,
    #[serde(default)]
    pub regions: BTreeMap<RegionId, RegionConfig>,
    #[serde(default)]
    pub subscriber_regions: BTreeMap<SubscriberId, RegionId>,
    pub default_region: Option<RegionId>,
    #[serde(default)]
    pub rules: RuleSettings,
    #[serde(default)]
    pub billing_tie_break: BillingTieBreak,
    #[serde(default)]
    pub baselines: BTreeMap<SubscriberId, f64>,
    #[serde(default)]
    pub mask_counterparties: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub time_bucket: TimeBucket,
    pub international_prefixes: Vec<String>,
    /// Lower-cased for case-insensitive lookup.
    pub premium_service_types: BTreeSet<String>,
    pub regions: BTreeMap<RegionId, RegionConfig>,
    pub subscriber_regions: BTreeMap<SubscriberId, RegionId>,
    pub default_region: Option<RegionId>,
    pub rules: RuleSettings,
    pub billing_tie_break: BillingTieBreak,
    pub baselines: BTreeMap<SubscriberId, f64>,
    pub mask_counterparties: bool,
}

pub fn default_international_prefixes() -> Vec<String> {
    vec!["+".into(), "00".into(), "011".into()]
}

impl PipelineConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: PipelineConfigFile = serde_json::from_str(&content)
            .map_err(|e| EtlError::config(path, e.to_string()))?;
        Ok(Self::from_file(file)?)
    }

    pub fn from_file(file: PipelineConfigFile) -> EtlResult<Self> {
        let time_bucket = file
            .time_bucket_granularity
            .ok_or_else(|| EtlError::config("time_bucket_granularity", "must be set to hour, day or week"))?;

        let config = Self {
            time_bucket,
            international_prefixes: file
                .international_prefixes
                .unwrap_or_else(default_international_prefixes),
            premium_service_types: file
                .premium_service_types
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            regions: file.regions,
            subscriber_regions: file.subscriber_regions,
            default_region: file.default_region,
            rules: file.rules,
            billing_tie_break: file.billing_tie_break,
            baselines: file.baselines,
            mask_counterparties: file.mask_counterparties,
        };
        config.validate()?;
        Ok(config)
    }

    /// Merge externally supplied baselines over the configured ones and
    /// re-validate.
    pub fn with_baselines(
        mut self,
        baselines: impl IntoIterator<Item = (SubscriberId, f64)>,
    ) -> EtlResult<Self> {
        self.baselines.extend(baselines);
        self.validate()?;
        Ok(self)
    }

    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> EtlResult<()> {
        if self.international_prefixes.is_empty()
            || self.international_prefixes.iter().any(|p| p.is_empty())
        {
            return Err(EtlError::config(
                "international_prefixes",
                "must list at least one non-empty prefix",
            ));
        }

        let tolerance = self.rules.duration_billing_mismatch.tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(EtlError::config(
                "rules.duration_billing_mismatch.tolerance",
                format!("must be a positive number, got {tolerance}"),
            ));
        }

        for (subscriber, region) in &self.subscriber_regions {
            if !self.regions.contains_key(region) {
                return Err(EtlError::config(
                    "subscriber_regions",
                    format!("subscriber {subscriber} mapped to unknown region {region}"),
                ));
            }
        }
        if let Some(region) = &self.default_region {
            if !self.regions.contains_key(region) {
                return Err(EtlError::config(
                    "default_region",
                    format!("unknown region {region}"),
                ));
            }
        }

        for (subscriber, ratio) in &self.baselines {
            if !ratio.is_finite() || *ratio < 0.0 {
                return Err(EtlError::config(
                    "baselines",
                    format!("baseline for {subscriber} must be a non-negative number"),
                ));
            }
        }

        for (id, region) in &self.regions {
            if region.dialing_code.is_empty() || !region.dialing_code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(EtlError::config(
                    "regions",
                    format!("region {id} needs a numeric dialing_code"),
                ));
            }
        }
        Ok(())
    }

    /// Registered region for a subscriber, falling back to the default.
    pub fn region_of(&self, subscriber_id: &str) -> Option<&RegionId> {
        self.subscriber_regions
            .get(subscriber_id)
            .or(self.default_region.as_ref())
    }

    pub fn is_premium(&self, service_type: &str) -> bool {
        self.premium_service_types
            .contains(&service_type.trim().to_lowercase())
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            "us".to_string(),
            RegionConfig {
                dialing_code: "1".into(),
            },
        );
        regions.insert(
            "uk".to_string(),
            RegionConfig {
                dialing_code: "44".into(),
            },
        );

        Self {
            time_bucket: TimeBucket::Day,
            international_prefixes: default_international_prefixes(),
            premium_service_types: ["premium", "premium_rate", "satellite"]
                .into_iter()
                .map(String::from)
                .collect(),
            regions,
            subscriber_regions: BTreeMap::new(),
            default_region: Some("us".into()),
            rules: RuleSettings::default(),
            billing_tie_break: BillingTieBreak::LowestAmount,
            baselines: BTreeMap::new(),
            mask_counterparties: false,
        }
    }
}
