//! etl-runner: batch runner for the call-detail fraud ETL.
//!
//! Usage:
//!   etl-runner --calls call_logs.csv --billing billing_data.csv --db run.db
//!   etl-runner --config ./data/pipeline.json --seed 7 --rows 2000 --journaled
//!   etl-runner --calls calls.json --billing billing.json --baselines baselines.json --json

use anyhow::{Context, Result};
use callfraud_core::{
    config::PipelineConfig,
    loader::{billing_aliases, call_log_aliases, CsvSource, JsonSource, RecordSource},
    pipeline::{Pipeline, PipelineOutput},
    sample::{SampleConfig, SampleGenerator},
    sink::{DocumentSink, DocumentWriter, SinkOptions, WriteSummary},
    store::{DocumentStore, WriteConcern},
    value::RawRow,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;

/// Machine-readable form of the run summary, printed with `--json`.
#[derive(Serialize)]
struct RunReport<'a> {
    run_id: &'a str,
    status: &'a callfraud_core::pipeline::RunStatus,
    records: usize,
    groups: usize,
    flags: usize,
    diagnostics: &'a callfraud_core::diagnostics::Diagnostics,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = arg_str(&args, "--config").unwrap_or("./data/pipeline.json");
    let calls_path = arg_str(&args, "--calls");
    let billing_path = arg_str(&args, "--billing");
    let baselines_path = arg_str(&args, "--baselines");
    let db = arg_str(&args, "--db").unwrap_or(":memory:");
    let seed = parse_arg(&args, "--seed", 42u64);
    let rows = parse_arg(&args, "--rows", 500usize);
    let journaled = args.iter().any(|a| a == "--journaled");
    let json = args.iter().any(|a| a == "--json");

    if !json {
        println!("etl-runner: call-detail fraud ETL");
        println!("  config:    {config_path}");
        println!("  calls:     {}", calls_path.unwrap_or("(sample)"));
        println!("  billing:   {}", billing_path.unwrap_or("(sample)"));
        println!("  db:        {db}");
        println!();
    }

    // Configuration errors stop the run before any record is read.
    let mut config = PipelineConfig::load(config_path)?;
    if let Some(path) = baselines_path {
        config = config.with_baselines(load_baselines(path)?)?;
    }

    let (calls, billing) = match (calls_path, billing_path) {
        (Some(calls), Some(billing)) => (
            source_for(calls, call_log_aliases()).load()?,
            source_for(billing, billing_aliases()).load()?,
        ),
        (None, None) => {
            let sample = SampleGenerator::new(SampleConfig {
                seed,
                calls: rows,
                ..SampleConfig::default()
            })
            .generate();
            for (subscriber, region) in sample.subscriber_regions() {
                if config.regions.contains_key(&region) {
                    config.subscriber_regions.entry(subscriber).or_insert(region);
                }
            }
            config.validate()?;
            (sample.calls, sample.billing)
        }
        _ => anyhow::bail!("--calls and --billing must be given together"),
    };

    let mask_counterparties = config.mask_counterparties;
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(&calls, &billing);

    let store = DocumentStore::open(db)?;
    store.migrate()?;
    let mut writer = DocumentWriter::new(
        store,
        SinkOptions {
            mask_counterparties,
            write_concern: if journaled {
                WriteConcern::Journaled
            } else {
                WriteConcern::Acknowledged
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )?;
    let summary = writer.write_run(&output)?;
    log::info!("Run {} written to {db}", summary.run_id);

    if json {
        let report = RunReport {
            run_id: &summary.run_id,
            status: &output.status,
            records: summary.records,
            groups: summary.groups,
            flags: summary.flags,
            diagnostics: &output.diagnostics,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&output, &summary, &calls, &billing);
    }
    Ok(())
}

fn source_for(path: &str, aliases: BTreeMap<String, String>) -> Box<dyn RecordSource> {
    if path.ends_with(".json") {
        Box::new(JsonSource::new(path))
    } else {
        Box::new(CsvSource::new(path).with_aliases(aliases))
    }
}

fn load_baselines(path: &str) -> Result<BTreeMap<String, f64>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
    let baselines: BTreeMap<String, f64> = serde_json::from_str(&content)
        .with_context(|| format!("{path} must map subscriber ids to ratios"))?;
    Ok(baselines)
}

fn print_summary(
    output: &PipelineOutput,
    summary: &WriteSummary,
    calls: &[RawRow],
    billing: &[RawRow],
) {
    let diagnostics = &output.diagnostics;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:            {}", summary.run_id);
    println!("  status:            {:?}", output.status);
    println!("  call rows in:      {}", calls.len());
    println!("  billing rows in:   {}", billing.len());
    println!("  unified records:   {}", summary.records);
    println!("  groups:            {}", summary.groups);
    println!("  unmatched calls:   {}", diagnostics.unmatched_calls);
    println!("  ambiguous matches: {}", diagnostics.ambiguous_matches);
    println!("  baseline skips:    {}", diagnostics.baseline_skips());

    println!();
    println!("=== DROPPED ROWS ===");
    if diagnostics.calls.dropped.is_empty() && diagnostics.billing.dropped.is_empty() {
        println!("  (none)");
    }
    for (dataset, report) in [("calls", &diagnostics.calls), ("billing", &diagnostics.billing)] {
        for (reason, count) in &report.dropped {
            println!("  {dataset:<8} {reason:<40} {count}");
        }
    }

    println!();
    println!("=== FLAGS ===");
    if diagnostics.flags_by_rule.is_empty() {
        println!("  (no anomalies)");
    }
    for (rule, count) in &diagnostics.flags_by_rule {
        println!("  {rule:<32} {count}");
    }
    for rule in &diagnostics.disabled_rules {
        println!("  {rule:<32} disabled");
    }
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
