//! Deterministic sample call-log and billing datasets.
//!
//! Rows are emitted as CSV-like string cells, including a small share
//! of defects (duplicates, blanks, non-numeric durations) so a sample
//! run exercises every Normalizer path.

use crate::{
    rng::{RngBank, StreamRng, StreamSlot},
    types::{RegionId, SubscriberId},
    value::{RawRow, Scalar},
};
use chrono::{Duration, NaiveDate, NaiveTime};
use std::collections::BTreeMap;

const CALL_TYPES: &[(&str, f64)] = &[
    ("local", 0.55),
    ("national", 0.15),
    ("international", 0.18),
    ("premium", 0.08),
    ("roaming", 0.04),
];

/// Per-minute rate in minor units by service type.
fn rate_per_minute(service_type: &str) -> i64 {
    match service_type {
        "premium_rate" => 199,
        "international" => 45,
        "roaming" => 80,
        "national" => 8,
        _ => 3,
    }
}

const FOREIGN_CODES: &[&str] = &["44", "49", "234", "63", "880"];

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub seed: u64,
    pub subscribers: usize,
    pub calls: usize,
    pub start_date: NaiveDate,
    pub days: u64,
    /// Probability that a premium call has no billing row.
    pub unbilled_premium_rate: f64,
    /// Probability that any other call has no billing row.
    pub unbilled_rate: f64,
    /// Probability of each injected defect.
    pub defect_rate: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            subscribers: 25,
            calls: 500,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            days: 14,
            unbilled_premium_rate: 0.30,
            unbilled_rate: 0.05,
            defect_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleSubscriber {
    pub subscriber_id: SubscriberId,
    pub region: RegionId,
    pub dialing_code: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct SampleData {
    pub subscribers: Vec<SampleSubscriber>,
    pub calls: Vec<RawRow>,
    pub billing: Vec<RawRow>,
}

impl SampleData {
    pub fn subscriber_regions(&self) -> BTreeMap<SubscriberId, RegionId> {
        self.subscribers
            .iter()
            .map(|s| (s.subscriber_id.clone(), s.region.clone()))
            .collect()
    }
}

pub struct SampleGenerator {
    config: SampleConfig,
}

impl SampleGenerator {
    pub fn new(config: SampleConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self) -> SampleData {
        let bank = RngBank::new(self.config.seed);
        let mut sub_rng = bank.for_stream(StreamSlot::Subscribers);
        let mut call_rng = bank.for_stream(StreamSlot::Calls);
        let mut bill_rng = bank.for_stream(StreamSlot::Billing);
        let mut defect_rng = bank.for_stream(StreamSlot::Defects);

        let subscribers: Vec<SampleSubscriber> = (0..self.config.subscribers.max(1))
            .map(|i| {
                let (region, dialing_code) = if sub_rng.chance(0.8) {
                    ("us", "1")
                } else {
                    ("uk", "44")
                };
                SampleSubscriber {
                    subscriber_id: format!("SUB-{i:04}"),
                    region: region.to_string(),
                    dialing_code,
                }
            })
            .collect();

        let mut data = SampleData {
            subscribers: subscribers.clone(),
            ..SampleData::default()
        };

        for _ in 0..self.config.calls {
            let subscriber = call_rng.pick(&subscribers).clone();
            let day = call_rng.next_u64_below(self.config.days.max(1)) as i64;
            let date = self.config.start_date + Duration::days(day);
            let seconds_into_day = call_rng.next_u64_below(86_400) as i64;
            let timestamp = date.and_time(NaiveTime::MIN) + Duration::seconds(seconds_into_day);
            let duration = call_rng.pareto(30.0, 1.4).min(7_200.0).round() as i64;
            let call_type = pick_weighted(&mut call_rng, CALL_TYPES);
            let counterparty = counterparty_for(&mut call_rng, call_type, subscriber.dialing_code);

            let mut call = RawRow::new();
            call.insert("subscriber_id".into(), Scalar::from(subscriber.subscriber_id.as_str()));
            call.insert("call_date".into(), Scalar::from(date.to_string()));
            call.insert("call_duration_seconds".into(), Scalar::from(duration.to_string()));
            call.insert("call_type".into(), Scalar::from(call_type));
            call.insert("counterparty_number".into(), Scalar::from(counterparty));
            call.insert(
                "timestamp".into(),
                Scalar::from(timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            );

            let unbilled_rate = if call_type == "premium" {
                self.config.unbilled_premium_rate
            } else {
                self.config.unbilled_rate
            };
            if !bill_rng.chance(unbilled_rate) {
                let service_type = if call_type == "premium" {
                    "premium_rate"
                } else {
                    call_type
                };
                let minutes = (duration + 59) / 60;
                let amount = minutes * rate_per_minute(service_type);
                let billed_at = timestamp + Duration::seconds(bill_rng.next_u64_below(3_600) as i64);

                let mut bill = RawRow::new();
                bill.insert("subscriber_id".into(), Scalar::from(subscriber.subscriber_id.as_str()));
                bill.insert("call_date".into(), Scalar::from(date.to_string()));
                bill.insert(
                    "billed_amount".into(),
                    Scalar::from(format!("{}.{:02}", amount / 100, amount % 100)),
                );
                bill.insert("service_type".into(), Scalar::from(service_type));
                bill.insert(
                    "billing_timestamp".into(),
                    Scalar::from(billed_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                );
                data.billing.push(bill);
            }

            self.inject_defects(&mut defect_rng, &mut data, call);
        }

        log::info!(
            "Generated sample: {} subscribers, {} call rows, {} billing rows (seed {})",
            data.subscribers.len(),
            data.calls.len(),
            data.billing.len(),
            self.config.seed
        );
        data
    }

    fn inject_defects(&self, rng: &mut StreamRng, data: &mut SampleData, mut call: RawRow) {
        let rate = self.config.defect_rate;
        if rng.chance(rate) {
            call.insert("call_duration_seconds".into(), Scalar::from("n/a"));
        } else if rng.chance(rate) {
            call.insert("subscriber_id".into(), Scalar::Null);
        }
        let duplicate = rng.chance(rate);
        if duplicate {
            data.calls.push(call.clone());
        }
        data.calls.push(call);
    }
}

fn pick_weighted(rng: &mut StreamRng, table: &[(&'static str, f64)]) -> &'static str {
    let total: f64 = table.iter().map(|(_, w)| w).sum();
    let mut roll = rng.next_f64() * total;
    for (item, weight) in table {
        if roll < *weight {
            return *item;
        }
        roll -= weight;
    }
    table.last().map(|(item, _)| *item).unwrap_or("local")
}

fn counterparty_for(rng: &mut StreamRng, call_type: &str, home_code: &str) -> String {
    let line = 1_000_000 + rng.next_u64_below(9_000_000);
    match call_type {
        "international" | "roaming" => {
            let foreign: Vec<&str> = FOREIGN_CODES
                .iter()
                .copied()
                .filter(|c| *c != home_code)
                .collect();
            format!("+{} {}", rng.pick(&foreign), line)
        }
        // A small pool so premium numbers repeat within a day.
        "premium" => format!("+{home_code} 900 555 {:04}", rng.next_u64_below(5)),
        _ => format!("+{home_code} {line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_generates_identical_rows() {
        let a = SampleGenerator::new(SampleConfig::default()).generate();
        let b = SampleGenerator::new(SampleConfig::default()).generate();
        assert_eq!(a.calls, b.calls);
        assert_eq!(a.billing, b.billing);
    }

    #[test]
    fn every_subscriber_has_a_region() {
        let data = SampleGenerator::new(SampleConfig {
            subscribers: 10,
            calls: 50,
            ..SampleConfig::default()
        })
        .generate();
        assert_eq!(data.subscriber_regions().len(), 10);
        assert!(data.calls.len() >= 50);
    }
}
