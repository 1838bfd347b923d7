//! The transform pipeline.
//!
//! EXECUTION ORDER (fixed, strictly sequential, no branching back):
//!   1. Normalizer        (calls and billing, independently)
//!   2. Joiner            (left join from calls)
//!   3. Feature Deriver   (derived fields + aggregate groups)
//!   4. Anomaly Detector  (record rules, then group rules)
//!
//! RULES:
//!   - Configuration is validated in `Pipeline::new`, before any record.
//!   - Each stage reads the previous stage's output and builds a new value.
//!   - Nothing after validation is fatal. Bad rows and missing baselines
//!     end up in `Diagnostics`.
//!   - No I/O. Loading and persisting belong to the caller.

use crate::{
    anomaly::{AnomalyDetector, AnomalyFlag},
    config::{BaselineProvider, PipelineConfig},
    diagnostics::Diagnostics,
    error::EtlResult,
    features::{AggregateGroup, EnrichedRecord, FeatureDeriver},
    joiner,
    normalizer::normalize,
    records::{BillingRecord, CallRecord},
    value::RawRow,
};
use serde::Serialize;

/// Distinguishes "nothing to do" from "did the work".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No call record survived normalization. Not an error.
    Empty,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedRecord {
    #[serde(flatten)]
    pub record: EnrichedRecord,
    /// Record-scope flags followed by the flags of the record's group.
    pub flags: Vec<AnomalyFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedGroup {
    #[serde(flatten)]
    pub group: AggregateGroup,
    pub flags: Vec<AnomalyFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub status: RunStatus,
    pub records: Vec<FlaggedRecord>,
    pub groups: Vec<FlaggedGroup>,
    pub diagnostics: Diagnostics,
}

impl PipelineOutput {
    pub fn is_empty(&self) -> bool {
        self.status == RunStatus::Empty
    }

    /// Every distinct flag once: record-scope flags, then group flags.
    pub fn distinct_flags(&self) -> impl Iterator<Item = &AnomalyFlag> {
        self.records
            .iter()
            .flat_map(|r| {
                r.flags
                    .iter()
                    .filter(|f| matches!(f.scope, crate::anomaly::FlagScope::Record { .. }))
            })
            .chain(self.groups.iter().flat_map(|g| g.flags.iter()))
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> EtlResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run with the baselines carried in the configuration, if any.
    pub fn run(&self, calls: &[RawRow], billing: &[RawRow]) -> PipelineOutput {
        let baselines: Option<&dyn BaselineProvider> = if self.config.baselines.is_empty() {
            None
        } else {
            Some(&self.config.baselines)
        };
        self.run_with_baselines(calls, billing, baselines)
    }

    pub fn run_with_baselines(
        &self,
        calls: &[RawRow],
        billing: &[RawRow],
        baselines: Option<&dyn BaselineProvider>,
    ) -> PipelineOutput {
        let mut diagnostics = Diagnostics::default();

        // 1. Normalizer
        let calls = normalize::<CallRecord>(calls);
        let billing = normalize::<BillingRecord>(billing);
        diagnostics.calls = calls.report.clone();
        diagnostics.billing = billing.report.clone();

        if calls.is_empty() {
            log::info!("Pipeline run empty: no call records after normalization");
            return PipelineOutput {
                status: RunStatus::Empty,
                records: Vec::new(),
                groups: Vec::new(),
                diagnostics,
            };
        }

        // 2. Joiner
        let joined = joiner::join(&calls.records, &billing.records, self.config.billing_tie_break);
        diagnostics.unmatched_calls = joined.unmatched;
        diagnostics.ambiguous_matches = joined.ambiguous;

        // 3. Feature Deriver
        let derived = FeatureDeriver::new(&self.config).derive(&joined.records);

        // 4. Anomaly Detector
        let detector = AnomalyDetector::from_config(&self.config, baselines, &mut diagnostics);
        let detection = detector.evaluate(&derived.records, &derived.groups, &mut diagnostics);

        let records = derived
            .records
            .into_iter()
            .zip(detection.record_flags)
            .map(|(record, mut flags)| {
                if let Some(group_flags) = detection.group_flags.get(&record.group_key()) {
                    flags.extend(group_flags.iter().cloned());
                }
                FlaggedRecord { record, flags }
            })
            .collect();

        let groups = derived
            .groups
            .iter()
            .map(|group| FlaggedGroup {
                group: group.clone(),
                flags: detection
                    .group_flags
                    .get(&group.key)
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect();

        PipelineOutput {
            status: RunStatus::Processed,
            records,
            groups,
            diagnostics,
        }
    }
}
