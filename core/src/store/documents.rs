use super::DocumentStore;
use crate::error::EtlResult;
use rusqlite::{params, OptionalExtension};

/// Header row for one persisted run.
#[derive(Debug, Clone)]
pub struct RunDocument {
    pub run_id: String,
    pub version: String,
    pub status: String,
    pub record_count: i64,
    pub group_count: i64,
    pub flag_count: i64,
    pub diagnostics: String,
}

#[derive(Debug, Clone)]
pub struct RecordDocument {
    pub seq: i64,
    pub subscriber_id: String,
    pub call_date: String,
    pub call_duration_seconds: Option<i64>,
    pub flag_count: i64,
    pub document: String,
}

#[derive(Debug, Clone)]
pub struct GroupDocument {
    pub subscriber_id: String,
    pub location: String,
    pub time_bucket: String,
    pub flag_count: i64,
    pub document: String,
}

#[derive(Debug, Clone)]
pub struct FlagDocument {
    pub subscriber_id: String,
    pub rule_id: String,
    pub severity: String,
    pub scope: String,
    pub document: String,
}

impl DocumentStore {
    // ── Bulk write ─────────────────────────────────────────────

    /// Write one run and all of its documents in a single transaction.
    /// Either everything lands or nothing does.
    pub fn insert_run_documents(
        &mut self,
        run: &RunDocument,
        records: &[RecordDocument],
        groups: &[GroupDocument],
        flags: &[FlagDocument],
    ) -> EtlResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO etl_run (run_id, version, status, record_count, group_count, flag_count, diagnostics)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                run.version,
                run.status,
                run.record_count,
                run.group_count,
                run.flag_count,
                run.diagnostics,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO unified_records
                    (run_id, seq, subscriber_id, call_date, call_duration_seconds, flag_count, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    run.run_id,
                    r.seq,
                    r.subscriber_id,
                    r.call_date,
                    r.call_duration_seconds,
                    r.flag_count,
                    r.document,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO aggregate_groups
                    (run_id, subscriber_id, location, time_bucket, flag_count, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for g in groups {
                stmt.execute(params![
                    run.run_id,
                    g.subscriber_id,
                    g.location,
                    g.time_bucket,
                    g.flag_count,
                    g.document,
                ])?;
            }

            let mut stmt = tx.prepare_cached(
                "INSERT INTO anomaly_flags (run_id, subscriber_id, rule_id, severity, scope, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for f in flags {
                stmt.execute(params![
                    run.run_id,
                    f.subscriber_id,
                    f.rule_id,
                    f.severity,
                    f.scope,
                    f.document,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn record_count(&self, run_id: &str) -> EtlResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM unified_records WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?)
    }

    pub fn flagged_record_count(&self, run_id: &str) -> EtlResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM unified_records WHERE run_id = ?1 AND flag_count > 0",
            params![run_id],
            |row| row.get(0),
        )?)
    }

    pub fn group_count(&self, run_id: &str) -> EtlResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM aggregate_groups WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?)
    }

    pub fn flag_count(&self, run_id: &str, rule_id: &str) -> EtlResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM anomaly_flags WHERE run_id = ?1 AND rule_id = ?2",
            params![run_id, rule_id],
            |row| row.get(0),
        )?)
    }

    /// Record documents for one subscriber, in run order.
    pub fn record_documents_for_subscriber(
        &self,
        run_id: &str,
        subscriber_id: &str,
    ) -> EtlResult<Vec<serde_json::Value>> {
        let mut stmt = self.conn.prepare(
            "SELECT document FROM unified_records
             WHERE run_id = ?1 AND subscriber_id = ?2
             ORDER BY seq ASC",
        )?;
        let docs = stmt
            .query_map(params![run_id, subscriber_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect()
    }

    pub fn flag_documents(&self, run_id: &str) -> EtlResult<Vec<serde_json::Value>> {
        let mut stmt = self
            .conn
            .prepare("SELECT document FROM anomaly_flags WHERE run_id = ?1 ORDER BY id ASC")?;
        let docs = stmt
            .query_map(params![run_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect()
    }

    /// Longest calls of a run; served by the duration index.
    pub fn longest_calls(&self, run_id: &str, limit: usize) -> EtlResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT subscriber_id, call_duration_seconds FROM unified_records
             WHERE run_id = ?1 AND call_duration_seconds IS NOT NULL
             ORDER BY call_duration_seconds DESC, seq ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![run_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn run_diagnostics(&self, run_id: &str) -> EtlResult<Option<serde_json::Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT diagnostics FROM etl_run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|d| serde_json::from_str(&d).map_err(Into::into))
            .transpose()
    }
}
