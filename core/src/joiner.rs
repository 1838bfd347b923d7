//! Joiner: left join of calls onto billing on (subscriber_id, call_date).
//!
//! Every call yields exactly one `UnifiedRecord`. A call with no billing
//! counterpart keeps `BillingMatch::Absent`; that absence is a signal.
//!
//! When several billing records share a call's key, the pick is:
//!   1. the earliest billing_timestamp at or after the call timestamp,
//!   2. else the latest one before it,
//!   3. else (timestamps unknown) any candidate,
//! with ties broken by billed amount per `BillingTieBreak`, then by
//! input order.

use crate::{
    config::BillingTieBreak,
    records::{BillingMatch, BillingRecord, CallRecord, UnifiedRecord},
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct JoinOutput {
    pub records: Vec<UnifiedRecord>,
    pub unmatched: u64,
    pub ambiguous: u64,
}

impl JoinOutput {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn join(
    calls: &[CallRecord],
    billing: &[BillingRecord],
    tie_break: BillingTieBreak,
) -> JoinOutput {
    let mut output = JoinOutput::default();
    if calls.is_empty() {
        log::info!("Join skipped: no call records");
        return output;
    }

    let mut index: HashMap<(&str, NaiveDate), Vec<(usize, &BillingRecord)>> = HashMap::new();
    for (billing_ref, bill) in billing.iter().enumerate() {
        index
            .entry((bill.subscriber_id.as_str(), bill.call_date))
            .or_default()
            .push((billing_ref, bill));
    }

    output.records.reserve(calls.len());
    for call in calls {
        let candidates = index
            .get(&(call.subscriber_id.as_str(), call.call_date))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if candidates.len() > 1 {
            output.ambiguous += 1;
        }
        let billing_match = match select_billing(call, candidates, tie_break) {
            Some((billing_ref, bill)) => BillingMatch::matched(billing_ref, bill),
            None => {
                output.unmatched += 1;
                BillingMatch::Absent
            }
        };
        output.records.push(UnifiedRecord::new(call, billing_match));
    }

    log::info!(
        "Joined {} calls against {} billing records: {} unmatched, {} ambiguous",
        calls.len(),
        billing.len(),
        output.unmatched,
        output.ambiguous
    );
    output
}

/// Pick one billing record among the candidates for `call`, each paired
/// with its position in the cleaned billing dataset. `None` when there
/// are no candidates.
pub fn select_billing<'a>(
    call: &CallRecord,
    candidates: &[(usize, &'a BillingRecord)],
    tie_break: BillingTieBreak,
) -> Option<(usize, &'a BillingRecord)> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(position, (_, bill))| rank(call.timestamp, bill, tie_break, *position))
        .map(|(_, candidate)| *candidate)
}

/// Lower is better: (proximity class, distance in seconds, amount key, position).
fn rank(
    call_time: Option<NaiveDateTime>,
    bill: &BillingRecord,
    tie_break: BillingTieBreak,
    position: usize,
) -> (u8, i64, (bool, i64), usize) {
    let (class, distance) = match (call_time, bill.billing_timestamp) {
        (Some(call_at), Some(bill_at)) if bill_at >= call_at => {
            (0, (bill_at - call_at).num_seconds())
        }
        (Some(call_at), Some(bill_at)) => (1, (call_at - bill_at).num_seconds()),
        _ => (2, 0),
    };
    let amount_key = match bill.billed_amount.known() {
        Some(amount) => match tie_break {
            BillingTieBreak::LowestAmount => (false, amount),
            BillingTieBreak::HighestAmount => (false, amount.saturating_neg()),
        },
        None => (true, 0),
    };
    (class, distance, amount_key, position)
}
