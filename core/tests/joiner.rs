//! Joiner: left join of calls onto billing.
//! One unified record per cleaned call, in call order, always.

use callfraud_core::{
    config::BillingTieBreak,
    joiner::{join, select_billing},
    records::{BillingMatch, BillingRecord, CallRecord, Measure},
};
use chrono::{NaiveDate, NaiveDateTime};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    date(d).and_hms_opt(h, m, 0).expect("valid time")
}

fn call(sub: &str, d: u32, time: Option<NaiveDateTime>) -> CallRecord {
    CallRecord {
        subscriber_id: sub.into(),
        call_date: date(d),
        call_duration_seconds: Measure::Known(60),
        call_type: Some("local".into()),
        counterparty_number: Some("+15550100".into()),
        timestamp: time,
    }
}

fn bill(sub: &str, d: u32, cents: Option<i64>, time: Option<NaiveDateTime>) -> BillingRecord {
    BillingRecord {
        subscriber_id: sub.into(),
        call_date: date(d),
        billed_amount: Measure::from(cents),
        service_type: Some("local".into()),
        billing_timestamp: time,
    }
}

fn matched_amount(m: &BillingMatch) -> Option<i64> {
    m.billed_amount().known()
}

#[test]
fn unmatched_calls_keep_absent_billing() {
    let calls = vec![call("A", 1, None), call("B", 1, None)];
    let billing = vec![bill("A", 1, Some(100), None)];
    let out = join(&calls, &billing, BillingTieBreak::LowestAmount);

    assert_eq!(out.records.len(), 2);
    assert_eq!(matched_amount(&out.records[0].billing), Some(100));
    assert!(out.records[1].billing.is_absent());
    assert_eq!(out.unmatched, 1);
    assert_eq!(out.ambiguous, 0);
}

#[test]
fn empty_billing_yields_every_call_absent() {
    let calls = vec![call("A", 1, None), call("A", 2, None)];
    let out = join(&calls, &[], BillingTieBreak::LowestAmount);
    assert_eq!(out.records.len(), 2);
    assert!(out.records.iter().all(|r| r.billing.is_absent()));
}

#[test]
fn empty_calls_yield_nothing() {
    let out = join(&[], &[bill("A", 1, Some(5), None)], BillingTieBreak::LowestAmount);
    assert!(out.is_empty());
    assert_eq!(out.unmatched, 0);
}

#[test]
fn nearest_billing_at_or_after_the_call_wins() {
    let calls = vec![call("A", 1, Some(at(1, 10, 0)))];
    let billing = vec![
        bill("A", 1, Some(300), Some(at(1, 9, 59))),
        bill("A", 1, Some(200), Some(at(1, 10, 30))),
        bill("A", 1, Some(100), Some(at(1, 10, 5))),
    ];
    let out = join(&calls, &billing, BillingTieBreak::LowestAmount);
    assert_eq!(matched_amount(&out.records[0].billing), Some(100));
    assert_eq!(out.ambiguous, 1);
}

#[test]
fn billing_before_the_call_is_used_only_as_a_fallback() {
    let calls = vec![call("A", 1, Some(at(1, 12, 0)))];
    let billing = vec![
        bill("A", 1, Some(300), Some(at(1, 8, 0))),
        bill("A", 1, Some(200), Some(at(1, 11, 0))),
    ];
    let out = join(&calls, &billing, BillingTieBreak::LowestAmount);
    assert_eq!(matched_amount(&out.records[0].billing), Some(200));
}

#[test]
fn equal_candidates_fall_back_to_amount_then_input_order() {
    let calls = vec![call("A", 1, None)];
    let billing = vec![
        bill("A", 1, Some(500), None),
        bill("A", 1, None, None),
        bill("A", 1, Some(100), None),
    ];

    let lowest = join(&calls, &billing, BillingTieBreak::LowestAmount);
    assert_eq!(matched_amount(&lowest.records[0].billing), Some(100));

    let highest = join(&calls, &billing, BillingTieBreak::HighestAmount);
    assert_eq!(matched_amount(&highest.records[0].billing), Some(500));

    // Same amounts: first in input order.
    let twins = vec![
        BillingRecord {
            service_type: Some("first".into()),
            ..bill("A", 1, Some(100), None)
        },
        BillingRecord {
            service_type: Some("second".into()),
            ..bill("A", 1, Some(100), None)
        },
    ];
    let out = join(&calls, &twins, BillingTieBreak::LowestAmount);
    assert_eq!(out.records[0].billing.service_type(), Some("first"));
}

#[test]
fn selection_over_no_candidates_is_none() {
    let c = call("A", 1, Some(at(1, 10, 0)));
    assert!(select_billing(&c, &[], BillingTieBreak::LowestAmount).is_none());

    let b = bill("A", 1, Some(100), None);
    let picked = select_billing(&c, &[(4, &b)], BillingTieBreak::HighestAmount);
    assert_eq!(picked.map(|(billing_ref, _)| billing_ref), Some(4));
}

#[test]
fn calls_sharing_a_bill_carry_the_same_billing_ref() {
    let calls = vec![
        call("A", 1, Some(at(1, 9, 0))),
        call("A", 1, Some(at(1, 11, 0))),
        call("B", 1, None),
    ];
    let billing = vec![bill("B", 1, Some(50), None), bill("A", 1, Some(100), None)];
    let out = join(&calls, &billing, BillingTieBreak::LowestAmount);

    assert_eq!(out.records[0].billing.billing_ref(), Some(1));
    assert_eq!(out.records[1].billing.billing_ref(), Some(1));
    assert_eq!(out.records[2].billing.billing_ref(), Some(0));
    assert_eq!(out.ambiguous, 0);
}

#[test]
fn duration_minutes_follow_seconds() {
    let mut c = call("A", 1, None);
    c.call_duration_seconds = Measure::Known(90);
    let mut unknown = call("B", 1, None);
    unknown.call_duration_seconds = Measure::Unknown;

    let out = join(&[c, unknown], &[], BillingTieBreak::LowestAmount);
    assert_eq!(out.records[0].duration_minutes, Measure::Known(1.5));
    assert_eq!(out.records[1].duration_minutes, Measure::Unknown);
}

#[test]
fn left_join_is_complete_for_random_inputs() {
    let mut rng = Pcg64Mcg::seed_from_u64(7);
    let subs = ["A", "B", "C", "D"];

    for _ in 0..100 {
        let calls: Vec<CallRecord> = (0..rng.gen_range(0..30))
            .map(|_| {
                let d = rng.gen_range(1..4);
                let time = rng
                    .gen_bool(0.7)
                    .then(|| at(d, rng.gen_range(0..24), rng.gen_range(0..60)));
                call(subs[rng.gen_range(0..subs.len())], d, time)
            })
            .collect();
        let billing: Vec<BillingRecord> = (0..rng.gen_range(0..30))
            .map(|_| {
                let d = rng.gen_range(1..4);
                bill(
                    subs[rng.gen_range(0..subs.len())],
                    d,
                    Some(rng.gen_range(0..1_000)),
                    Some(at(d, rng.gen_range(0..24), 0)),
                )
            })
            .collect();

        let out = join(&calls, &billing, BillingTieBreak::LowestAmount);
        assert_eq!(out.records.len(), calls.len());
        for (unified, original) in out.records.iter().zip(&calls) {
            assert_eq!(unified.subscriber_id, original.subscriber_id);
            assert_eq!(unified.call_date, original.call_date);
        }
        let absent = out.records.iter().filter(|r| r.billing.is_absent()).count();
        assert_eq!(absent as u64, out.unmatched);
    }
}
