//! Feature Deriver: derived fields, grouping, and order-invariant aggregation.

use callfraud_core::{
    config::{PipelineConfig, TimeBucket},
    features::{FeatureDeriver, GroupKey, GroupTable},
    records::{BillingMatch, Measure, UnifiedRecord},
};
use chrono::{NaiveDate, NaiveDateTime};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

fn at(d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .and_then(|date| date.and_hms_opt(h, 15, 0))
        .expect("valid datetime")
}

fn midnight(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid datetime")
}

fn unified(
    sub: &str,
    time: NaiveDateTime,
    secs: Option<i64>,
    counterparty: &str,
    billing: BillingMatch,
) -> UnifiedRecord {
    UnifiedRecord {
        subscriber_id: sub.into(),
        call_date: time.date(),
        call_duration_seconds: Measure::from(secs),
        call_type: Some("local".into()),
        counterparty_number: Some(counterparty.into()),
        timestamp: Some(time),
        billing,
        duration_minutes: Measure::from(secs.map(|s| s as f64 / 60.0)),
    }
}

fn billed(billing_ref: usize, cents: Option<i64>, service: &str) -> BillingMatch {
    BillingMatch::Matched {
        billing_ref,
        billed_amount: Measure::from(cents),
        service_type: Some(service.into()),
        billing_timestamp: None,
    }
}

fn random_records(rng: &mut Pcg64Mcg, count: usize) -> Vec<UnifiedRecord> {
    let subs = ["A", "B", "C"];
    let numbers = ["+15550100", "+442079460958", "+15550199", "5550123"];
    let services = ["local", "premium", "international"];
    (0..count)
        .map(|i| {
            let billing = if rng.gen_bool(0.2) {
                BillingMatch::Absent
            } else {
                let cents = rng.gen_bool(0.9).then(|| rng.gen_range(0..5_000));
                billed(i, cents, services[rng.gen_range(0..services.len())])
            };
            let secs = rng.gen_bool(0.95).then(|| rng.gen_range(0..3_600));
            unified(
                subs[rng.gen_range(0..subs.len())],
                at(rng.gen_range(1..4), rng.gen_range(0..24)),
                secs,
                numbers[rng.gen_range(0..numbers.len())],
                billing,
            )
        })
        .collect()
}

#[test]
fn derived_fields_follow_configuration() {
    let mut config = PipelineConfig::default_test();
    config.subscriber_regions.insert("B".into(), "uk".into());
    let deriver = FeatureDeriver::new(&config);

    let us = deriver.enrich(&unified("A", at(1, 9), Some(60), "+442079460958", billed(0, Some(10), "Premium")));
    assert!(us.features.is_international);
    assert!(us.features.is_premium_service);
    assert_eq!(us.features.location, "us");
    assert_eq!(us.features.time_bucket, midnight(1));

    let uk = deriver.enrich(&unified("B", at(1, 9), Some(60), "+442079460958", billed(1, Some(10), "local")));
    assert!(!uk.features.is_international);
    assert!(!uk.features.is_premium_service);
    assert_eq!(uk.features.location, "uk");
}

#[test]
fn premium_call_type_counts_when_billing_is_absent() {
    let config = PipelineConfig::default_test();
    let mut record = unified("A", at(1, 9), Some(60), "+15550100", BillingMatch::Absent);
    record.call_type = Some("premium".into());
    let enriched = FeatureDeriver::new(&config).enrich(&record);
    assert!(enriched.features.is_premium_service);
}

#[test]
fn subscribers_without_region_are_unassigned() {
    let mut config = PipelineConfig::default_test();
    config.default_region = None;
    let enriched = FeatureDeriver::new(&config)
        .enrich(&unified("Z", at(1, 9), Some(60), "+15550100", BillingMatch::Absent));
    assert_eq!(enriched.features.location, "unassigned");
    // No home code: any internationally dialled number counts.
    assert!(enriched.features.is_international);
}

#[test]
fn hourly_buckets_split_a_day() {
    let mut config = PipelineConfig::default_test();
    config.time_bucket = TimeBucket::Hour;
    let records = vec![
        unified("A", at(1, 9), Some(60), "+15550100", BillingMatch::Absent),
        unified("A", at(1, 10), Some(60), "+15550100", BillingMatch::Absent),
    ];
    let out = FeatureDeriver::new(&config).derive(&records);
    assert_eq!(out.groups.len(), 2);

    config.time_bucket = TimeBucket::Day;
    let out = FeatureDeriver::new(&config).derive(&records);
    assert_eq!(out.groups.len(), 1);
}

#[test]
fn group_sums_skip_unknown_measures_and_count_them() {
    let config = PipelineConfig::default_test();
    let records = vec![
        unified("A", at(1, 9), Some(120), "+15550100", billed(0, Some(250), "local")),
        unified("A", at(1, 10), None, "+15550100", billed(1, None, "local")),
        unified("A", at(1, 11), Some(60), "+15550199", BillingMatch::Absent),
    ];
    let out = FeatureDeriver::new(&config).derive(&records);
    let key = out.records[0].group_key();
    let group = out.groups.get(&key).expect("group exists");

    assert_eq!(group.record_count, 3);
    assert_eq!(group.duration_seconds, 180);
    assert_eq!(group.unknown_duration_count, 1);
    assert_eq!(group.billed_minor_units, 250);
    assert_eq!(group.unknown_amount_count, 2);
    assert_eq!(group.unbilled_count, 1);
    assert_eq!(group.counterparties.get("+15550100"), Some(&2));
    assert_eq!(group.distinct_counterparties(), 2);
    assert_eq!(group.duration_minutes(), 3.0);
}

#[test]
fn a_bill_shared_by_several_calls_is_summed_once() {
    let config = PipelineConfig::default_test();
    let deriver = FeatureDeriver::new(&config);
    let records: Vec<UnifiedRecord> = (0..10)
        .map(|h| unified("A", at(1, h), Some(60), "+15550100", billed(7, Some(100), "local")))
        .collect();

    let whole = deriver.derive(&records).groups;
    let group = whole.iter().next().expect("one group");
    assert_eq!(group.record_count, 10);
    assert_eq!(group.billed_minor_units, 100);
    assert_eq!(group.unknown_amount_count, 0);

    // Split across partitions, the bill still counts once after merging.
    let mut merged = deriver.derive(&records[..4]).groups;
    merged.merge(&deriver.derive(&records[4..]).groups);
    assert_eq!(merged, whole);
}

#[test]
fn huge_durations_saturate_instead_of_overflowing() {
    let config = PipelineConfig::default_test();
    let records = vec![
        unified("A", at(1, 9), Some(i64::MAX), "+15550100", BillingMatch::Absent),
        unified("A", at(1, 10), Some(i64::MAX), "+15550100", BillingMatch::Absent),
    ];
    let deriver = FeatureDeriver::new(&config);
    let out = deriver.derive(&records);
    let group = out.groups.iter().next().expect("one group");
    assert_eq!(group.duration_seconds, i64::MAX);

    let mut merged = deriver.derive(&records[..1]).groups;
    merged.merge(&deriver.derive(&records[1..]).groups);
    assert_eq!(merged, out.groups);
}

#[test]
fn aggregates_are_invariant_under_permutation() {
    let config = PipelineConfig::default_test();
    let deriver = FeatureDeriver::new(&config);
    let mut rng = Pcg64Mcg::seed_from_u64(0xFEED);
    let mut records = random_records(&mut rng, 300);
    let expected = deriver.derive(&records).groups;

    for _ in 0..20 {
        records.shuffle(&mut rng);
        assert_eq!(deriver.derive(&records).groups, expected);
    }
}

#[test]
fn partition_then_merge_equals_whole() {
    let config = PipelineConfig::default_test();
    let deriver = FeatureDeriver::new(&config);
    let mut rng = Pcg64Mcg::seed_from_u64(99);
    let records = random_records(&mut rng, 200);
    let whole = deriver.derive(&records).groups;

    for _ in 0..10 {
        let cut_a = rng.gen_range(0..=records.len());
        let cut_b = rng.gen_range(cut_a..=records.len());
        let parts: Vec<GroupTable> = [&records[..cut_a], &records[cut_a..cut_b], &records[cut_b..]]
            .iter()
            .map(|part| deriver.derive(part).groups)
            .collect();

        // (a + b) + c
        let mut left = parts[0].clone();
        left.merge(&parts[1]);
        left.merge(&parts[2]);
        // a + (b + c)
        let mut right_tail = parts[1].clone();
        right_tail.merge(&parts[2]);
        let mut right = parts[0].clone();
        right.merge(&right_tail);

        assert_eq!(left, whole);
        assert_eq!(right, whole);
    }
}

#[test]
fn group_keys_order_by_subscriber_then_location_then_bucket() {
    let a = GroupKey {
        subscriber_id: "A".into(),
        location: "us".into(),
        time_bucket: midnight(2),
    };
    let b = GroupKey {
        subscriber_id: "B".into(),
        location: "uk".into(),
        time_bucket: midnight(1),
    };
    assert!(a < b);
}
