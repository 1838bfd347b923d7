//! Typed records produced by the Normalizer and Joiner.
//!
//! Records are immutable once built. Later stages wrap or copy them,
//! they never patch them in place.

use crate::types::{MinorUnits, SubscriberId};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

/// An optional measurement. `Unknown` means "no signal", which is not zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Measure<T> {
    Known(T),
    Unknown,
}

impl<T: Copy> Measure<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Self::Known(v) => Some(*v),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Measure<U> {
        match self {
            Self::Known(v) => Measure::Known(f(v)),
            Self::Unknown => Measure::Unknown,
        }
    }
}

impl<T> From<Option<T>> for Measure<T> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Self::Known(v),
            None => Self::Unknown,
        }
    }
}

impl<T: Serialize> Serialize for Measure<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(v) => v.serialize(serializer),
            Self::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// One call-detail record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CallRecord {
    pub subscriber_id: SubscriberId,
    pub call_date: NaiveDate,
    /// Never negative; rows with a negative duration are dropped upstream.
    pub call_duration_seconds: Measure<i64>,
    pub call_type: Option<String>,
    pub counterparty_number: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
}

impl CallRecord {
    /// Best known point in time for this call: its timestamp, else the
    /// start of its call date.
    pub fn effective_time(&self) -> NaiveDateTime {
        self.timestamp
            .unwrap_or_else(|| self.call_date.and_time(NaiveTime::MIN))
    }
}

/// One billing record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BillingRecord {
    pub subscriber_id: SubscriberId,
    pub call_date: NaiveDate,
    pub billed_amount: Measure<MinorUnits>,
    pub service_type: Option<String>,
    pub billing_timestamp: Option<NaiveDateTime>,
}

/// Billing side of a unified record. `Absent` is distinct from a zero bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BillingMatch {
    Absent,
    Matched {
        /// Position of the matched record in the cleaned billing dataset.
        /// Several calls can share one bill; aggregates count it once.
        #[serde(skip)]
        billing_ref: usize,
        billed_amount: Measure<MinorUnits>,
        service_type: Option<String>,
        billing_timestamp: Option<NaiveDateTime>,
    },
}

impl BillingMatch {
    pub fn matched(billing_ref: usize, b: &BillingRecord) -> Self {
        Self::Matched {
            billing_ref,
            billed_amount: b.billed_amount,
            service_type: b.service_type.clone(),
            billing_timestamp: b.billing_timestamp,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn billed_amount(&self) -> Measure<MinorUnits> {
        match self {
            Self::Matched { billed_amount, .. } => *billed_amount,
            Self::Absent => Measure::Unknown,
        }
    }

    pub fn service_type(&self) -> Option<&str> {
        match self {
            Self::Matched { service_type, .. } => service_type.as_deref(),
            Self::Absent => None,
        }
    }

    pub fn billing_ref(&self) -> Option<usize> {
        match self {
            Self::Matched { billing_ref, .. } => Some(*billing_ref),
            Self::Absent => None,
        }
    }
}

/// A call joined with at most one billing record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedRecord {
    pub subscriber_id: SubscriberId,
    pub call_date: NaiveDate,
    pub call_duration_seconds: Measure<i64>,
    pub call_type: Option<String>,
    pub counterparty_number: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
    pub billing: BillingMatch,
    pub duration_minutes: Measure<f64>,
}

impl UnifiedRecord {
    pub fn new(call: &CallRecord, billing: BillingMatch) -> Self {
        Self {
            subscriber_id: call.subscriber_id.clone(),
            call_date: call.call_date,
            call_duration_seconds: call.call_duration_seconds,
            call_type: call.call_type.clone(),
            counterparty_number: call.counterparty_number.clone(),
            timestamp: call.timestamp,
            billing,
            duration_minutes: call.call_duration_seconds.map(|s| s as f64 / 60.0),
        }
    }

    pub fn effective_time(&self) -> NaiveDateTime {
        self.timestamp
            .unwrap_or_else(|| self.call_date.and_time(NaiveTime::MIN))
    }
}
