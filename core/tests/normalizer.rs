//! Normalizer: schema validation, coercion and exact-duplicate removal.
//! Every input row is either kept or counted under a drop reason.

use callfraud_core::{
    normalizer::{normalize, MAX_CALL_DURATION_SECONDS},
    records::{BillingRecord, CallRecord, Measure},
    value::{RawRow, Scalar},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

fn row(cells: &[(&str, Scalar)]) -> RawRow {
    cells
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn call(sub: &str, date: &str, duration: Scalar) -> RawRow {
    row(&[
        ("subscriber_id", Scalar::from(sub)),
        ("call_date", Scalar::from(date)),
        ("call_duration_seconds", duration),
        ("call_type", Scalar::from("local")),
        ("counterparty_number", Scalar::from("+15550100")),
    ])
}

#[test]
fn exact_duplicates_keep_the_first_occurrence() {
    let rows = vec![
        call("A", "2024-01-01", Scalar::Int(60)),
        call("A", "2024-01-01", Scalar::Int(60)),
        call("A", "2024-01-01", Scalar::Int(61)),
    ];
    let out = normalize::<CallRecord>(&rows);
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].call_duration_seconds, Measure::Known(60));
    assert_eq!(out.records[1].call_duration_seconds, Measure::Known(61));
    assert_eq!(out.report.dropped_for("duplicate"), 1);
    assert!(out.report.is_balanced());
}

#[test]
fn rows_that_coerce_to_the_same_record_are_duplicates() {
    // "60" and 60 normalize to the same typed record.
    let rows = vec![
        call("A", "2024-01-01", Scalar::from("60")),
        call("A", "2024-01-01", Scalar::Int(60)),
    ];
    let out = normalize::<CallRecord>(&rows);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.report.dropped_for("duplicate"), 1);
}

#[test]
fn non_numeric_duration_drops_the_row_instead_of_defaulting() {
    let rows = vec![
        call("A", "2024-01-01", Scalar::from("n/a")),
        call("B", "2024-01-01", Scalar::Int(30)),
    ];
    let out = normalize::<CallRecord>(&rows);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].subscriber_id, "B");
    assert_eq!(
        out.report.dropped_for("invalid_number:call_duration_seconds"),
        1
    );
}

#[test]
fn blank_duration_is_unknown_not_zero() {
    let out = normalize::<CallRecord>(&[call("A", "2024-01-01", Scalar::from("  "))]);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].call_duration_seconds, Measure::Unknown);
}

#[test]
fn negative_duration_is_dropped() {
    let out = normalize::<CallRecord>(&[call("A", "2024-01-01", Scalar::Int(-5))]);
    assert!(out.is_empty());
    assert_eq!(out.report.dropped_for("negative_duration"), 1);
}

#[test]
fn implausible_durations_and_amounts_are_out_of_range() {
    let calls = vec![
        call("A", "2024-01-01", Scalar::from("9223372036854775807")),
        call("A", "2024-01-02", Scalar::Int(MAX_CALL_DURATION_SECONDS + 1)),
        call("A", "2024-01-03", Scalar::Int(MAX_CALL_DURATION_SECONDS)),
    ];
    let out = normalize::<CallRecord>(&calls);
    assert_eq!(out.records.len(), 1);
    assert_eq!(
        out.report.dropped_for("out_of_range:call_duration_seconds"),
        2
    );
    assert!(out.report.is_balanced());

    let bills = vec![row(&[
        ("subscriber_id", Scalar::from("A")),
        ("call_date", Scalar::from("2024-01-01")),
        ("billed_amount", Scalar::from("-90000000000000000.00")),
    ])];
    let out = normalize::<BillingRecord>(&bills);
    assert!(out.is_empty());
    assert_eq!(out.report.dropped_for("out_of_range:billed_amount"), 1);
}

#[test]
fn missing_join_keys_are_dropped_by_field() {
    let mut no_subscriber = call("A", "2024-01-01", Scalar::Int(1));
    no_subscriber.insert("subscriber_id".into(), Scalar::Null);
    let mut bad_date = call("A", "2024-01-01", Scalar::Int(1));
    bad_date.insert("call_date".into(), Scalar::from("yesterday"));
    let mut no_date = call("A", "2024-01-01", Scalar::Int(1));
    no_date.remove("call_date");

    let out = normalize::<CallRecord>(&[no_subscriber, bad_date, no_date]);
    assert!(out.is_empty());
    assert_eq!(out.report.dropped_for("missing_field:subscriber_id"), 1);
    assert_eq!(out.report.dropped_for("invalid_date:call_date"), 1);
    assert_eq!(out.report.dropped_for("missing_field:call_date"), 1);
}

#[test]
fn unknown_fields_are_rejected_at_the_boundary() {
    let mut extra = call("A", "2024-01-01", Scalar::Int(1));
    extra.insert("cell_tower".into(), Scalar::from("T-9"));
    let out = normalize::<CallRecord>(&[extra]);
    assert!(out.is_empty());
    assert_eq!(out.report.dropped_for("unexpected_field:cell_tower"), 1);
}

#[test]
fn billed_amount_is_held_exactly_in_minor_units() {
    let rows = vec![
        row(&[
            ("subscriber_id", Scalar::from("A")),
            ("call_date", Scalar::from("2024-01-01")),
            ("billed_amount", Scalar::from("12.34")),
            ("service_type", Scalar::from("premium")),
        ]),
        row(&[
            ("subscriber_id", Scalar::from("B")),
            ("call_date", Scalar::from("2024-01-01")),
            ("billed_amount", Scalar::from("twelve")),
        ]),
    ];
    let out = normalize::<BillingRecord>(&rows);
    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].billed_amount, Measure::Known(1234));
    assert_eq!(out.report.dropped_for("invalid_number:billed_amount"), 1);
}

#[test]
fn random_row_sets_are_balanced_and_duplicate_free() {
    let mut rng = Pcg64Mcg::seed_from_u64(0x5EED);
    let durations = [
        Scalar::Int(10),
        Scalar::from("20"),
        Scalar::from("n/a"),
        Scalar::Int(-1),
        Scalar::Null,
        Scalar::Float(12.6),
    ];
    let subscribers = ["A", "B", "C", ""];

    for _ in 0..50 {
        let count = rng.gen_range(0..40);
        let rows: Vec<RawRow> = (0..count)
            .map(|_| {
                let sub = subscribers[rng.gen_range(0..subscribers.len())];
                let day = format!("2024-01-0{}", rng.gen_range(1..4));
                let duration = durations[rng.gen_range(0..durations.len())].clone();
                call(sub, &day, duration)
            })
            .collect();

        let out = normalize::<CallRecord>(&rows);
        assert_eq!(
            out.report.kept_rows + out.report.dropped_total(),
            rows.len() as u64
        );
        assert_eq!(out.records.len() as u64, out.report.kept_rows);

        let mut unique = out.records.clone();
        unique.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
        unique.dedup();
        assert_eq!(unique.len(), out.records.len(), "duplicate survived");
    }
}
