//! Anomaly Detector: declarative rules over records and groups.
//!
//! RULES:
//!   - Each rule is a pure predicate, evaluated independently.
//!   - No rule suppresses another; every applicable rule fires.
//!   - A rule missing external input (a baseline) is skipped for that
//!     subscriber and counted, never treated as a failure.
//!
//! Record rules see one `EnrichedRecord`; group rules see one
//! `AggregateGroup`. Either can be exercised without the pipeline.

use crate::{
    config::{BaselineProvider, PipelineConfig},
    diagnostics::Diagnostics,
    features::{AggregateGroup, EnrichedRecord, GroupKey, GroupTable},
    types::{format_minor_units, SubscriberId, MINOR_UNITS_PER_MAJOR},
    value::Scalar,
};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Rule name. The built-in rules have fixed variants; user rules plug in
/// under their own name with `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleId {
    UnbilledPremium,
    ExcessInternationalVolume,
    DurationBillingMismatch,
    DuplicateCounterpartyBurst,
    Custom(&'static str),
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnbilledPremium => "unbilled_premium",
            Self::ExcessInternationalVolume => "excess_international_volume",
            Self::DurationBillingMismatch => "duration_billing_mismatch",
            Self::DuplicateCounterpartyBurst => "duplicate_counterparty_burst",
            Self::Custom(name) => name,
        }
    }
}

impl Serialize for RuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How urgently a flag needs review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// What a flag is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagScope {
    /// Position of the record in the run's record sequence.
    Record { index: usize },
    Group { key: GroupKey },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFlag {
    pub subscriber_id: SubscriberId,
    pub rule_id: RuleId,
    pub severity: Severity,
    pub scope: FlagScope,
    pub evidence: BTreeMap<String, Scalar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    BaselineUnavailable,
}

/// Result of one group rule on one group.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Clear,
    Flagged(Vec<AnomalyFlag>),
    Skipped(SkipReason),
}

impl RuleOutcome {
    pub fn flags(&self) -> &[AnomalyFlag] {
        match self {
            Self::Flagged(flags) => flags,
            _ => &[],
        }
    }
}

pub trait RecordRule {
    fn id(&self) -> RuleId;
    fn check(&self, index: usize, record: &EnrichedRecord) -> Option<AnomalyFlag>;
}

pub trait GroupRule {
    fn id(&self) -> RuleId;
    fn check(&self, group: &AggregateGroup) -> RuleOutcome;
}

fn evidence<const N: usize>(pairs: [(&str, Scalar); N]) -> BTreeMap<String, Scalar> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn group_flag(
    rule_id: RuleId,
    severity: Severity,
    group: &AggregateGroup,
    evidence: BTreeMap<String, Scalar>,
) -> AnomalyFlag {
    AnomalyFlag {
        subscriber_id: group.key.subscriber_id.clone(),
        rule_id,
        severity,
        scope: FlagScope::Group {
            key: group.key.clone(),
        },
        evidence,
    }
}

// ── unbilled_premium ─────────────────────────────────────────────────────────

/// A premium call with no billing record at all.
pub struct UnbilledPremium;

impl RecordRule for UnbilledPremium {
    fn id(&self) -> RuleId {
        RuleId::UnbilledPremium
    }

    fn check(&self, index: usize, enriched: &EnrichedRecord) -> Option<AnomalyFlag> {
        let record = &enriched.record;
        if !enriched.features.is_premium_service || !record.billing.is_absent() {
            return None;
        }
        let mut evidence = evidence([
            ("call_date", Scalar::Date(record.call_date)),
            (
                "call_type",
                record
                    .call_type
                    .clone()
                    .map(Scalar::Str)
                    .unwrap_or(Scalar::Null),
            ),
        ]);
        if let Some(secs) = record.call_duration_seconds.known() {
            evidence.insert("call_duration_seconds".into(), Scalar::Int(secs));
        }
        if let Some(counterparty) = &record.counterparty_number {
            evidence.insert("counterparty".into(), Scalar::Str(counterparty.clone()));
        }
        Some(AnomalyFlag {
            subscriber_id: record.subscriber_id.clone(),
            rule_id: self.id(),
            severity: Severity::High,
            scope: FlagScope::Record { index },
            evidence,
        })
    }
}

// ── excess_international_volume ──────────────────────────────────────────────

pub struct ExcessInternationalVolume {
    pub max_count: u64,
}

impl GroupRule for ExcessInternationalVolume {
    fn id(&self) -> RuleId {
        RuleId::ExcessInternationalVolume
    }

    fn check(&self, group: &AggregateGroup) -> RuleOutcome {
        if group.international_count <= self.max_count {
            return RuleOutcome::Clear;
        }
        let severity = if group.international_count > self.max_count.saturating_mul(2) {
            Severity::High
        } else {
            Severity::Medium
        };
        RuleOutcome::Flagged(vec![group_flag(
            self.id(),
            severity,
            group,
            evidence([
                ("international_count", Scalar::Int(group.international_count as i64)),
                ("threshold", Scalar::Int(self.max_count as i64)),
                ("record_count", Scalar::Int(group.record_count as i64)),
            ]),
        )])
    }
}

// ── duration_billing_mismatch ────────────────────────────────────────────────

/// Compares a group's billed-amount-per-minute against the subscriber's
/// historical ratio. Diverges when `|observed - baseline| / baseline`
/// exceeds `tolerance`.
pub struct DurationBillingMismatch<'a> {
    pub tolerance: f64,
    pub baselines: Option<&'a dyn BaselineProvider>,
}

impl GroupRule for DurationBillingMismatch<'_> {
    fn id(&self) -> RuleId {
        RuleId::DurationBillingMismatch
    }

    fn check(&self, group: &AggregateGroup) -> RuleOutcome {
        let baseline = match self
            .baselines
            .and_then(|b| b.ratio_for(&group.key.subscriber_id))
        {
            Some(ratio) if ratio.is_finite() && ratio > 0.0 => ratio,
            _ => return RuleOutcome::Skipped(SkipReason::BaselineUnavailable),
        };

        let minutes = group.duration_minutes();
        let billed = group.billed_minor_units as f64 / MINOR_UNITS_PER_MAJOR as f64;
        if minutes == 0.0 && billed == 0.0 {
            return RuleOutcome::Clear;
        }

        let divergence = if minutes == 0.0 {
            f64::INFINITY
        } else {
            ((billed / minutes) - baseline).abs() / baseline
        };
        if divergence <= self.tolerance {
            return RuleOutcome::Clear;
        }

        let severity = if divergence > self.tolerance * 4.0 {
            Severity::High
        } else {
            Severity::Medium
        };
        let observed = if minutes == 0.0 {
            Scalar::Null
        } else {
            Scalar::Float(billed / minutes)
        };
        RuleOutcome::Flagged(vec![group_flag(
            self.id(),
            severity,
            group,
            evidence([
                ("duration_minutes", Scalar::Float(minutes)),
                ("billed_amount", Scalar::Str(format_minor_units(group.billed_minor_units))),
                ("observed_ratio", observed),
                ("baseline_ratio", Scalar::Float(baseline)),
                ("tolerance", Scalar::Float(self.tolerance)),
            ]),
        )])
    }
}

// ── duplicate_counterparty_burst ─────────────────────────────────────────────

/// One flag per counterparty called more than `max_count` times in a bucket.
pub struct DuplicateCounterpartyBurst {
    pub max_count: u64,
}

impl GroupRule for DuplicateCounterpartyBurst {
    fn id(&self) -> RuleId {
        RuleId::DuplicateCounterpartyBurst
    }

    fn check(&self, group: &AggregateGroup) -> RuleOutcome {
        let flags: Vec<AnomalyFlag> = group
            .counterparties
            .iter()
            .filter(|(_, count)| **count > self.max_count)
            .map(|(counterparty, count)| {
                group_flag(
                    self.id(),
                    Severity::Medium,
                    group,
                    evidence([
                        ("counterparty", Scalar::Str(counterparty.clone())),
                        ("occurrences", Scalar::Int(*count as i64)),
                        ("threshold", Scalar::Int(self.max_count as i64)),
                    ]),
                )
            })
            .collect();
        if flags.is_empty() {
            RuleOutcome::Clear
        } else {
            RuleOutcome::Flagged(flags)
        }
    }
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// Flags produced for one run.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Record-scope flags, indexed like the input records.
    pub record_flags: Vec<Vec<AnomalyFlag>>,
    pub group_flags: BTreeMap<GroupKey, Vec<AnomalyFlag>>,
}

pub struct AnomalyDetector<'a> {
    record_rules: Vec<Box<dyn RecordRule + 'a>>,
    group_rules: Vec<Box<dyn GroupRule + 'a>>,
}

impl<'a> AnomalyDetector<'a> {
    pub fn empty() -> Self {
        Self {
            record_rules: Vec::new(),
            group_rules: Vec::new(),
        }
    }

    /// Register every enabled baseline rule in its fixed order.
    pub fn from_config(
        config: &PipelineConfig,
        baselines: Option<&'a dyn BaselineProvider>,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let rules = &config.rules;
        let mut detector = Self::empty();

        if rules.unbilled_premium.enabled {
            detector.add_record_rule(Box::new(UnbilledPremium));
        } else {
            diagnostics.disabled_rules.push(RuleId::UnbilledPremium.as_str().into());
        }
        if rules.excess_international_volume.enabled {
            detector.add_group_rule(Box::new(ExcessInternationalVolume {
                max_count: rules.excess_international_volume.max_count,
            }));
        } else {
            diagnostics
                .disabled_rules
                .push(RuleId::ExcessInternationalVolume.as_str().into());
        }
        if rules.duration_billing_mismatch.enabled {
            detector.add_group_rule(Box::new(DurationBillingMismatch {
                tolerance: rules.duration_billing_mismatch.tolerance,
                baselines,
            }));
        } else {
            diagnostics
                .disabled_rules
                .push(RuleId::DurationBillingMismatch.as_str().into());
        }
        if rules.duplicate_counterparty_burst.enabled {
            detector.add_group_rule(Box::new(DuplicateCounterpartyBurst {
                max_count: rules.duplicate_counterparty_burst.max_count,
            }));
        } else {
            diagnostics
                .disabled_rules
                .push(RuleId::DuplicateCounterpartyBurst.as_str().into());
        }
        detector
    }

    pub fn add_record_rule(&mut self, rule: Box<dyn RecordRule + 'a>) {
        self.record_rules.push(rule);
    }

    pub fn add_group_rule(&mut self, rule: Box<dyn GroupRule + 'a>) {
        self.group_rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.record_rules
            .iter()
            .map(|r| r.id())
            .chain(self.group_rules.iter().map(|r| r.id()))
            .collect()
    }

    pub fn evaluate(
        &self,
        records: &[EnrichedRecord],
        groups: &GroupTable,
        diagnostics: &mut Diagnostics,
    ) -> Detection {
        let mut detection = Detection {
            record_flags: Vec::with_capacity(records.len()),
            group_flags: BTreeMap::new(),
        };

        for (index, record) in records.iter().enumerate() {
            let flags: Vec<AnomalyFlag> = self
                .record_rules
                .iter()
                .filter_map(|rule| rule.check(index, record))
                .collect();
            for flag in &flags {
                log::debug!(
                    "record {index} ({}) flagged {}",
                    flag.subscriber_id,
                    flag.rule_id.as_str()
                );
                diagnostics.record_flag(flag.rule_id.as_str());
            }
            detection.record_flags.push(flags);
        }

        for group in groups.iter() {
            let mut flags = Vec::new();
            for rule in &self.group_rules {
                match rule.check(group) {
                    RuleOutcome::Clear => {}
                    RuleOutcome::Flagged(found) => flags.extend(found),
                    RuleOutcome::Skipped(SkipReason::BaselineUnavailable) => {
                        diagnostics.record_baseline_unavailable(&group.key.subscriber_id);
                    }
                }
            }
            for flag in &flags {
                diagnostics.record_flag(flag.rule_id.as_str());
            }
            if !flags.is_empty() {
                log::debug!(
                    "group {}/{}/{} raised {} flags",
                    group.key.subscriber_id,
                    group.key.location,
                    group.key.time_bucket,
                    flags.len()
                );
                detection.group_flags.insert(group.key.clone(), flags);
            }
        }

        log::info!(
            "Anomaly detection: {} rules, {} flags, {} baseline skips",
            self.record_rules.len() + self.group_rules.len(),
            diagnostics.total_flags(),
            diagnostics.baseline_skips()
        );
        detection
    }
}
