//! Record sources: the extraction side of the ETL.
//!
//! A source only produces raw rows. It never validates field meaning;
//! that is the Normalizer's job. Sources own their file handles.

use crate::{
    error::{EtlError, EtlResult},
    value::{RawRow, Scalar},
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

pub trait RecordSource {
    fn describe(&self) -> String;
    fn load(&self) -> EtlResult<Vec<RawRow>>;
}

/// Column aliases for the historical call-log export headers.
pub fn call_log_aliases() -> BTreeMap<String, String> {
    [
        ("phone_number", "subscriber_id"),
        ("call_duration", "call_duration_seconds"),
        ("duration", "call_duration_seconds"),
        ("time_stamp", "timestamp"),
        ("counterparty", "counterparty_number"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Column aliases for the historical billing export headers.
pub fn billing_aliases() -> BTreeMap<String, String> {
    [
        ("phone_number", "subscriber_id"),
        ("amount", "billed_amount"),
        ("bill_amount", "billed_amount"),
        ("timestamp", "billing_timestamp"),
        ("time_stamp", "billing_timestamp"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

// ── CSV ──────────────────────────────────────────────────────────────────────

/// Comma-separated file with a header row. Cells stay strings; blank
/// cells become `Scalar::Null`. Quoted cells may contain commas and `""`
/// escapes but not line breaks.
pub struct CsvSource {
    pub path: String,
    pub aliases: BTreeMap<String, String>,
}

impl CsvSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn parse<R: BufRead>(&self, reader: R) -> EtlResult<Vec<RawRow>> {
        let mut lines = reader.lines().enumerate();
        let header = loop {
            match lines.next() {
                Some((index, line)) => {
                    let line = line?;
                    if !line.trim().is_empty() {
                        break self.split_record(&line, index + 1)?;
                    }
                }
                None => return Ok(Vec::new()),
            }
        };
        let columns: Vec<String> = header
            .into_iter()
            .map(|name| {
                let name = name.trim().trim_start_matches('\u{feff}').to_lowercase();
                self.aliases.get(&name).cloned().unwrap_or(name)
            })
            .collect();

        let mut rows = Vec::new();
        for (index, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let cells = self.split_record(&line, line_no)?;
            if cells.len() != columns.len() {
                return Err(self.error(
                    line_no,
                    format!("expected {} cells, found {}", columns.len(), cells.len()),
                ));
            }
            let row: RawRow = columns
                .iter()
                .cloned()
                .zip(cells)
                .map(|(column, cell)| {
                    let value = if cell.trim().is_empty() {
                        Scalar::Null
                    } else {
                        Scalar::Str(cell)
                    };
                    (column, value)
                })
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }

    fn split_record(&self, line: &str, line_no: usize) -> EtlResult<Vec<String>> {
        let mut cells = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match (c, in_quotes) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                ('"', true) => in_quotes = false,
                ('"', false) if current.is_empty() => in_quotes = true,
                (',', false) => cells.push(std::mem::take(&mut current)),
                ('\r', false) if chars.peek().is_none() => {}
                (c, _) => current.push(c),
            }
        }
        if in_quotes {
            return Err(self.error(line_no, "unterminated quoted cell".into()));
        }
        cells.push(current);
        Ok(cells)
    }

    fn error(&self, line: usize, reason: String) -> EtlError {
        EtlError::Source {
            path: self.path.clone(),
            line,
            reason,
        }
    }
}

impl RecordSource for CsvSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.path)
    }

    fn load(&self) -> EtlResult<Vec<RawRow>> {
        let file = File::open(&self.path)?;
        let rows = self.parse(BufReader::new(file))?;
        log::info!("Loaded {} rows from {}", rows.len(), self.path);
        Ok(rows)
    }
}

// ── JSON ─────────────────────────────────────────────────────────────────────

/// A JSON array of flat objects. Nested values are rejected.
pub struct JsonSource {
    pub path: String,
}

impl JsonSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse_str(&self, content: &str) -> EtlResult<Vec<RawRow>> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let items = value.as_array().ok_or_else(|| EtlError::Source {
            path: self.path.clone(),
            line: 0,
            reason: "expected a top-level array of objects".into(),
        })?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| self.row_from_json(index, item))
            .collect()
    }

    fn row_from_json(&self, index: usize, item: &serde_json::Value) -> EtlResult<RawRow> {
        let object = item.as_object().ok_or_else(|| self.error(index, "row is not an object"))?;
        object
            .iter()
            .map(|(key, value)| {
                let scalar = match value {
                    serde_json::Value::Null => Scalar::Null,
                    serde_json::Value::String(s) => Scalar::Str(s.clone()),
                    serde_json::Value::Bool(b) => Scalar::Str(b.to_string()),
                    serde_json::Value::Number(n) => match n.as_i64() {
                        Some(i) => Scalar::Int(i),
                        None => Scalar::Float(n.as_f64().unwrap_or(f64::NAN)),
                    },
                    _ => return Err(self.error(index, "nested values are not supported")),
                };
                Ok((key.clone(), scalar))
            })
            .collect()
    }

    fn error(&self, index: usize, reason: &str) -> EtlError {
        EtlError::Source {
            path: self.path.clone(),
            line: index,
            reason: reason.to_string(),
        }
    }
}

impl RecordSource for JsonSource {
    fn describe(&self) -> String {
        format!("json:{}", self.path)
    }

    fn load(&self) -> EtlResult<Vec<RawRow>> {
        let content = std::fs::read_to_string(&self.path)?;
        let rows = self.parse_str(&content)?;
        log::info!("Loaded {} rows from {}", rows.len(), self.path);
        Ok(rows)
    }
}
