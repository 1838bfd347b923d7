//! Feature Deriver: per-record derived fields and per-group aggregates.
//!
//! Grouping key: (subscriber_id, location, time bucket start).
//! Accumulation is commutative and associative: counts and sums are
//! integers (seconds, minor units) and the distinct sets are ordered maps,
//! so any input order, and any partition-then-merge split, yields the
//! same `GroupTable`.
//!
//! A bill shared by several calls in a group is summed once, keyed by
//! its position in the cleaned billing dataset. Sums saturate instead
//! of overflowing.

use crate::{
    config::{PipelineConfig, UNASSIGNED_REGION},
    records::UnifiedRecord,
    types::{MinorUnits, RegionId, SubscriberId},
};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Fields computed from a unified record and the configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedFeatures {
    pub is_premium_service: bool,
    pub is_international: bool,
    pub location: RegionId,
    pub time_bucket: NaiveDateTime,
}

/// A unified record with its derived features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: UnifiedRecord,
    #[serde(flatten)]
    pub features: DerivedFeatures,
}

impl EnrichedRecord {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            subscriber_id: self.record.subscriber_id.clone(),
            location: self.features.location.clone(),
            time_bucket: self.features.time_bucket,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey {
    pub subscriber_id: SubscriberId,
    pub location: RegionId,
    pub time_bucket: NaiveDateTime,
}

/// The reduction unit for one (subscriber, location, bucket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateGroup {
    pub key: GroupKey,
    pub record_count: u64,
    pub international_count: u64,
    pub premium_count: u64,
    /// Records whose billing side is absent.
    pub unbilled_count: u64,
    /// Sum over records with a known duration.
    pub duration_seconds: i64,
    pub unknown_duration_count: u64,
    /// Sum over the distinct bills with a known amount.
    pub billed_minor_units: MinorUnits,
    pub unknown_amount_count: u64,
    /// Billing ref → amount, for every distinct bill already summed.
    #[serde(skip)]
    pub bills: BTreeMap<usize, MinorUnits>,
    pub service_types: BTreeSet<String>,
    /// Counterparty → number of calls to it within the group.
    pub counterparties: BTreeMap<String, u64>,
}

impl AggregateGroup {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            record_count: 0,
            international_count: 0,
            premium_count: 0,
            unbilled_count: 0,
            duration_seconds: 0,
            unknown_duration_count: 0,
            billed_minor_units: 0,
            unknown_amount_count: 0,
            bills: BTreeMap::new(),
            service_types: BTreeSet::new(),
            counterparties: BTreeMap::new(),
        }
    }

    pub fn accumulate(&mut self, enriched: &EnrichedRecord) {
        let record = &enriched.record;
        self.record_count += 1;
        if enriched.features.is_international {
            self.international_count += 1;
        }
        if enriched.features.is_premium_service {
            self.premium_count += 1;
        }
        if record.billing.is_absent() {
            self.unbilled_count += 1;
        }
        match record.call_duration_seconds.known() {
            Some(secs) => self.duration_seconds = self.duration_seconds.saturating_add(secs),
            None => self.unknown_duration_count += 1,
        }
        match (record.billing.billing_ref(), record.billing.billed_amount().known()) {
            (Some(billing_ref), Some(amount)) => self.add_bill(billing_ref, amount),
            _ => self.unknown_amount_count += 1,
        }
        if let Some(service) = record.billing.service_type() {
            self.service_types.insert(service.to_string());
        }
        if let Some(counterparty) = &record.counterparty_number {
            *self.counterparties.entry(counterparty.clone()).or_insert(0) += 1;
        }
    }

    /// Fold another partial aggregate for the same key into this one.
    pub fn merge(&mut self, other: &AggregateGroup) {
        debug_assert_eq!(self.key, other.key, "merging groups with different keys");
        self.record_count += other.record_count;
        self.international_count += other.international_count;
        self.premium_count += other.premium_count;
        self.unbilled_count += other.unbilled_count;
        self.duration_seconds = self.duration_seconds.saturating_add(other.duration_seconds);
        self.unknown_duration_count += other.unknown_duration_count;
        for (&billing_ref, &amount) in &other.bills {
            self.add_bill(billing_ref, amount);
        }
        self.unknown_amount_count += other.unknown_amount_count;
        self.service_types
            .extend(other.service_types.iter().cloned());
        for (counterparty, count) in &other.counterparties {
            *self.counterparties.entry(counterparty.clone()).or_insert(0) += count;
        }
    }

    fn add_bill(&mut self, billing_ref: usize, amount: MinorUnits) {
        if self.bills.insert(billing_ref, amount).is_none() {
            self.billed_minor_units = self.billed_minor_units.saturating_add(amount);
        }
    }

    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds as f64 / 60.0
    }

    pub fn distinct_counterparties(&self) -> usize {
        self.counterparties.len()
    }
}

/// All groups of one run, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupTable {
    groups: BTreeMap<GroupKey, AggregateGroup>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[EnrichedRecord]) -> Self {
        let mut table = Self::new();
        for record in records {
            table.accumulate(record);
        }
        table
    }

    pub fn accumulate(&mut self, record: &EnrichedRecord) {
        let key = record.group_key();
        self.groups
            .entry(key.clone())
            .or_insert_with(|| AggregateGroup::new(key))
            .accumulate(record);
    }

    /// Merge a table built from a disjoint partition of the records.
    pub fn merge(&mut self, other: &GroupTable) {
        for (key, group) in &other.groups {
            match self.groups.get_mut(key) {
                Some(existing) => existing.merge(group),
                None => {
                    self.groups.insert(key.clone(), group.clone());
                }
            }
        }
    }

    pub fn get(&self, key: &GroupKey) -> Option<&AggregateGroup> {
        self.groups.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AggregateGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DerivedOutput {
    pub records: Vec<EnrichedRecord>,
    pub groups: GroupTable,
}

pub struct FeatureDeriver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> FeatureDeriver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn derive(&self, records: &[UnifiedRecord]) -> DerivedOutput {
        let enriched: Vec<EnrichedRecord> = records.iter().map(|r| self.enrich(r)).collect();
        let groups = GroupTable::from_records(&enriched);
        log::info!(
            "Derived features for {} records into {} groups ({} buckets)",
            enriched.len(),
            groups.len(),
            self.config.time_bucket.label()
        );
        DerivedOutput {
            records: enriched,
            groups,
        }
    }

    pub fn enrich(&self, record: &UnifiedRecord) -> EnrichedRecord {
        let region = self.config.region_of(&record.subscriber_id);
        let home_code = region
            .and_then(|r| self.config.regions.get(r))
            .map(|r| r.dialing_code.as_str());

        let features = DerivedFeatures {
            is_premium_service: self.is_premium_service(record),
            is_international: record
                .counterparty_number
                .as_deref()
                .map(|n| is_international(n, home_code, &self.config.international_prefixes))
                .unwrap_or(false),
            location: region
                .cloned()
                .unwrap_or_else(|| UNASSIGNED_REGION.to_string()),
            time_bucket: self.config.time_bucket.bucket_start(record.effective_time()),
        };
        EnrichedRecord {
            record: record.clone(),
            features,
        }
    }

    /// Premium if either the billed service type or the call type is listed.
    /// The call type matters when billing is absent.
    fn is_premium_service(&self, record: &UnifiedRecord) -> bool {
        record
            .billing
            .service_type()
            .into_iter()
            .chain(record.call_type.as_deref())
            .any(|s| self.config.is_premium(s))
    }
}

/// A number is international when it starts with an international prefix
/// and the country code that follows is not the subscriber's home code.
/// With no known home region, any internationally dialled number counts.
pub fn is_international(number: &str, home_code: Option<&str>, prefixes: &[String]) -> bool {
    let digits: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let mut ordered: Vec<&String> = prefixes.iter().collect();
    ordered.sort_by_key(|p| std::cmp::Reverse(p.len()));

    for prefix in ordered {
        if let Some(rest) = digits.strip_prefix(prefix.as_str()) {
            return match home_code {
                Some(code) => !rest.starts_with(code),
                None => true,
            };
        }
    }
    false
}
