//! Run diagnostics, threaded explicitly through every stage.
//!
//! RULE: no stage logs *instead of* recording here. Logging is a side
//! channel; this value is what the caller gets back.

use crate::types::SubscriberId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why the Normalizer dropped a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Row carries a field outside the dataset's fixed field set.
    UnexpectedField(String),
    /// A join-key field is missing or blank.
    MissingField(&'static str),
    /// The primary key is present but not a usable identifier.
    InvalidKey(&'static str),
    InvalidDate(&'static str),
    InvalidTimestamp(&'static str),
    /// A declared-numeric field holds a non-numeric value.
    InvalidNumber(&'static str),
    /// A numeric field outside its accepted range.
    OutOfRange(&'static str),
    NegativeDuration,
    Duplicate,
}

impl DropReason {
    /// Stable histogram key, e.g. `invalid_number:billed_amount`.
    pub fn label(&self) -> String {
        match self {
            Self::UnexpectedField(field) => format!("unexpected_field:{field}"),
            Self::MissingField(field) => format!("missing_field:{field}"),
            Self::InvalidKey(field) => format!("invalid_key:{field}"),
            Self::InvalidDate(field) => format!("invalid_date:{field}"),
            Self::InvalidTimestamp(field) => format!("invalid_timestamp:{field}"),
            Self::InvalidNumber(field) => format!("invalid_number:{field}"),
            Self::OutOfRange(field) => format!("out_of_range:{field}"),
            Self::NegativeDuration => "negative_duration".to_string(),
            Self::Duplicate => "duplicate".to_string(),
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Per-dataset accounting. `kept + dropped == input` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropReport {
    pub input_rows: u64,
    pub kept_rows: u64,
    pub dropped: BTreeMap<String, u64>,
}

impl DropReport {
    pub fn record_drop(&mut self, reason: &DropReason) {
        *self.dropped.entry(reason.label()).or_insert(0) += 1;
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }

    pub fn dropped_for(&self, label: &str) -> u64 {
        self.dropped.get(label).copied().unwrap_or(0)
    }

    pub fn is_balanced(&self) -> bool {
        self.kept_rows + self.dropped_total() == self.input_rows
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub calls: DropReport,
    pub billing: DropReport,
    /// Calls for which no billing record shared the join key.
    pub unmatched_calls: u64,
    /// Calls with more than one billing candidate.
    pub ambiguous_matches: u64,
    /// Rule evaluations skipped because a baseline was missing, per subscriber.
    pub baseline_unavailable: BTreeMap<SubscriberId, u64>,
    pub disabled_rules: Vec<String>,
    pub flags_by_rule: BTreeMap<String, u64>,
}

impl Diagnostics {
    pub fn record_baseline_unavailable(&mut self, subscriber_id: &str) {
        *self
            .baseline_unavailable
            .entry(subscriber_id.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_flag(&mut self, rule: &str) {
        *self.flags_by_rule.entry(rule.to_string()).or_insert(0) += 1;
    }

    pub fn baseline_skips(&self) -> u64 {
        self.baseline_unavailable.values().sum()
    }

    pub fn total_flags(&self) -> u64 {
        self.flags_by_rule.values().sum()
    }
}
