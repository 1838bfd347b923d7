//! Sink writer: the load side of the ETL.
//!
//! Turns a `PipelineOutput` into self-describing JSON documents and hands
//! them to the store in one bulk write. Masking of counterparty numbers
//! happens here, on the way out; the in-memory output is never altered.

use crate::{
    error::EtlResult,
    pipeline::{PipelineOutput, RunStatus},
    store::{DocumentStore, FlagDocument, GroupDocument, RecordDocument, RunDocument, WriteConcern},
    types::RunId,
};
use serde::Serialize;
use serde_json::Value;

/// Digits left visible by `mask_number`.
pub const VISIBLE_DIGITS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub run_id: RunId,
    pub records: usize,
    pub groups: usize,
    pub flags: usize,
}

pub trait DocumentSink {
    fn write_run(&mut self, output: &PipelineOutput) -> EtlResult<WriteSummary>;
}

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub mask_counterparties: bool,
    pub write_concern: WriteConcern,
    /// Stored on the run row.
    pub version: String,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            mask_counterparties: false,
            write_concern: WriteConcern::Acknowledged,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub struct DocumentWriter {
    store: DocumentStore,
    options: SinkOptions,
}

impl DocumentWriter {
    pub fn new(store: DocumentStore, options: SinkOptions) -> EtlResult<Self> {
        store.set_write_concern(options.write_concern)?;
        Ok(Self { store, options })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn into_store(self) -> DocumentStore {
        self.store
    }

    fn document<T: Serialize>(&self, value: &T) -> EtlResult<String> {
        let mut json = serde_json::to_value(value)?;
        if self.options.mask_counterparties {
            mask_counterparties(&mut json);
        }
        Ok(serde_json::to_string(&json)?)
    }
}

impl DocumentSink for DocumentWriter {
    fn write_run(&mut self, output: &PipelineOutput) -> EtlResult<WriteSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();

        let records = output
            .records
            .iter()
            .enumerate()
            .map(|(seq, flagged)| {
                let record = &flagged.record.record;
                Ok(RecordDocument {
                    seq: seq as i64,
                    subscriber_id: record.subscriber_id.clone(),
                    call_date: record.call_date.to_string(),
                    call_duration_seconds: record.call_duration_seconds.known(),
                    flag_count: flagged.flags.len() as i64,
                    document: self.document(flagged)?,
                })
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let groups = output
            .groups
            .iter()
            .map(|flagged| {
                let key = &flagged.group.key;
                Ok(GroupDocument {
                    subscriber_id: key.subscriber_id.clone(),
                    location: key.location.clone(),
                    time_bucket: key.time_bucket.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    flag_count: flagged.flags.len() as i64,
                    document: self.document(flagged)?,
                })
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let flags = output
            .distinct_flags()
            .map(|flag| {
                let scope = match flag.scope {
                    crate::anomaly::FlagScope::Record { .. } => "record",
                    crate::anomaly::FlagScope::Group { .. } => "group",
                };
                Ok(FlagDocument {
                    subscriber_id: flag.subscriber_id.clone(),
                    rule_id: flag.rule_id.as_str().to_string(),
                    severity: flag.severity.as_str().to_string(),
                    scope: scope.to_string(),
                    document: self.document(flag)?,
                })
            })
            .collect::<EtlResult<Vec<_>>>()?;

        let run = RunDocument {
            run_id: run_id.clone(),
            version: self.options.version.clone(),
            status: match output.status {
                RunStatus::Empty => "empty".into(),
                RunStatus::Processed => "processed".into(),
            },
            record_count: records.len() as i64,
            group_count: groups.len() as i64,
            flag_count: flags.len() as i64,
            diagnostics: serde_json::to_string(&output.diagnostics)?,
        };

        self.store
            .insert_run_documents(&run, &records, &groups, &flags)?;
        log::info!(
            "Run {run_id} persisted: {} records, {} groups, {} flags",
            records.len(),
            groups.len(),
            flags.len()
        );

        Ok(WriteSummary {
            run_id,
            records: records.len(),
            groups: groups.len(),
            flags: flags.len(),
        })
    }
}

/// Mask every digit except the last `VISIBLE_DIGITS`, keeping punctuation.
/// `"+1 555 010 9999"` → `"+* *** *** 9999"`.
pub fn mask_number(number: &str) -> String {
    let digits = number.chars().filter(|c| c.is_ascii_digit()).count();
    let to_mask = digits.saturating_sub(VISIBLE_DIGITS);
    let mut masked = 0;
    number
        .chars()
        .map(|c| {
            if c.is_ascii_digit() && masked < to_mask {
                masked += 1;
                '*'
            } else {
                c
            }
        })
        .collect()
}

/// Walk a document and mask every counterparty number it carries.
fn mask_counterparties(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match key.as_str() {
                    "counterparty_number" | "counterparty" => {
                        if let Value::String(number) = child {
                            *number = mask_number(number);
                        }
                    }
                    "counterparties" => {
                        if let Value::Object(counts) = child {
                            let mut masked = serde_json::Map::new();
                            for (number, count) in std::mem::take(counts) {
                                let masked_number = mask_number(&number);
                                let merged = masked
                                    .get(&masked_number)
                                    .and_then(Value::as_u64)
                                    .unwrap_or(0)
                                    + count.as_u64().unwrap_or(0);
                                masked.insert(masked_number, Value::from(merged));
                            }
                            *counts = masked;
                        }
                    }
                    _ => mask_counterparties(child),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_counterparties),
        _ => {}
    }
}
