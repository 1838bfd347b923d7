//! Normalizer: schema validation, type coercion and de-duplication.
//!
//! Each dataset is cleaned independently:
//!   1. Reject rows carrying fields outside the fixed field set.
//!   2. Reject rows with a missing or unusable join key.
//!   3. Coerce every declared field; a non-numeric value in a numeric
//!      field drops the row, it is never defaulted.
//!   4. Drop durations and amounts outside the plausible range.
//!   5. Drop exact duplicates, keeping the first occurrence.
//!
//! Dropped rows are counted by reason in a `DropReport`. Nothing here
//! is fatal.

use crate::{
    diagnostics::{DropReason, DropReport},
    records::{BillingRecord, CallRecord, Measure},
    types::SubscriberId,
    value::{
        coerce_date, coerce_key, coerce_money, coerce_seconds, coerce_text, coerce_timestamp,
        RawRow, Scalar,
    },
};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::hash::Hash;

pub const SUBSCRIBER_ID: &str = "subscriber_id";
pub const CALL_DATE: &str = "call_date";

/// Longest accepted call: 31 days.
pub const MAX_CALL_DURATION_SECONDS: i64 = 31 * 24 * 60 * 60;
/// Largest accepted bill magnitude: 10 billion major units.
pub const MAX_BILLED_MINOR_UNITS: i64 = 1_000_000_000_000;

/// A typed record that can be built from a raw row.
pub trait RowSchema: Sized + Clone + Eq + Hash {
    /// Dataset name used in logs.
    const DATASET: &'static str;
    /// The fixed field set. Anything else in a row is rejected.
    const FIELDS: &'static [&'static str];

    fn from_row(row: &RawRow) -> Result<Self, DropReason>;
}

/// Cleaned dataset plus its drop accounting.
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub report: DropReport,
}

impl<T> Normalized<T> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Clean one dataset. Order of surviving rows matches input order.
pub fn normalize<T: RowSchema>(rows: &[RawRow]) -> Normalized<T> {
    let mut report = DropReport {
        input_rows: rows.len() as u64,
        ..DropReport::default()
    };
    let mut seen: HashSet<T> = HashSet::with_capacity(rows.len());
    let mut records = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        let record = match T::from_row(row) {
            Ok(record) => record,
            Err(reason) => {
                log::warn!("{} row {index} dropped: {reason}", T::DATASET);
                report.record_drop(&reason);
                continue;
            }
        };
        if !seen.insert(record.clone()) {
            log::debug!("{} row {index} dropped: exact duplicate", T::DATASET);
            report.record_drop(&DropReason::Duplicate);
            continue;
        }
        records.push(record);
    }

    report.kept_rows = records.len() as u64;
    log::info!(
        "Normalized {}: {} in, {} kept, {} dropped",
        T::DATASET,
        report.input_rows,
        report.kept_rows,
        report.dropped_total()
    );
    Normalized { records, report }
}

// ── Field helpers ────────────────────────────────────────────────────────────

fn field<'a>(row: &'a RawRow, name: &str) -> &'a Scalar {
    row.get(name).unwrap_or(&Scalar::Null)
}

fn check_shape(row: &RawRow, fields: &[&str]) -> Result<(), DropReason> {
    match row.keys().find(|k| !fields.contains(&k.as_str())) {
        Some(unexpected) => Err(DropReason::UnexpectedField(unexpected.clone())),
        None => Ok(()),
    }
}

fn join_key(row: &RawRow) -> Result<(SubscriberId, NaiveDate), DropReason> {
    let raw_id = field(row, SUBSCRIBER_ID);
    if raw_id.is_null() {
        return Err(DropReason::MissingField(SUBSCRIBER_ID));
    }
    let subscriber_id = coerce_key(raw_id).ok_or(DropReason::InvalidKey(SUBSCRIBER_ID))?;

    let call_date = coerce_date(field(row, CALL_DATE))
        .map_err(|_| DropReason::InvalidDate(CALL_DATE))?
        .ok_or(DropReason::MissingField(CALL_DATE))?;

    Ok((subscriber_id, call_date))
}

// ── Schemas ──────────────────────────────────────────────────────────────────

impl RowSchema for CallRecord {
    const DATASET: &'static str = "call_records";
    const FIELDS: &'static [&'static str] = &[
        SUBSCRIBER_ID,
        CALL_DATE,
        "call_duration_seconds",
        "call_type",
        "counterparty_number",
        "timestamp",
    ];

    fn from_row(row: &RawRow) -> Result<Self, DropReason> {
        check_shape(row, Self::FIELDS)?;
        let (subscriber_id, call_date) = join_key(row)?;

        let duration = coerce_seconds(field(row, "call_duration_seconds"))
            .map_err(|_| DropReason::InvalidNumber("call_duration_seconds"))?;
        match duration {
            Some(secs) if secs < 0 => return Err(DropReason::NegativeDuration),
            Some(secs) if secs > MAX_CALL_DURATION_SECONDS => {
                return Err(DropReason::OutOfRange("call_duration_seconds"))
            }
            _ => {}
        }
        let timestamp = coerce_timestamp(field(row, "timestamp"))
            .map_err(|_| DropReason::InvalidTimestamp("timestamp"))?;

        Ok(Self {
            subscriber_id,
            call_date,
            call_duration_seconds: Measure::from(duration),
            call_type: coerce_text(field(row, "call_type")),
            counterparty_number: coerce_text(field(row, "counterparty_number")),
            timestamp,
        })
    }
}

impl RowSchema for BillingRecord {
    const DATASET: &'static str = "billing_records";
    const FIELDS: &'static [&'static str] = &[
        SUBSCRIBER_ID,
        CALL_DATE,
        "billed_amount",
        "service_type",
        "billing_timestamp",
    ];

    fn from_row(row: &RawRow) -> Result<Self, DropReason> {
        check_shape(row, Self::FIELDS)?;
        let (subscriber_id, call_date) = join_key(row)?;

        let billed_amount = coerce_money(field(row, "billed_amount"))
            .map_err(|_| DropReason::InvalidNumber("billed_amount"))?;
        if matches!(billed_amount, Some(amount) if amount.unsigned_abs() > MAX_BILLED_MINOR_UNITS as u64) {
            return Err(DropReason::OutOfRange("billed_amount"));
        }
        let billing_timestamp = coerce_timestamp(field(row, "billing_timestamp"))
            .map_err(|_| DropReason::InvalidTimestamp("billing_timestamp"))?;

        Ok(Self {
            subscriber_id,
            call_date,
            billed_amount: Measure::from(billed_amount),
            service_type: coerce_text(field(row, "service_type")),
            billing_timestamp,
        })
    }
}
