//! opportunity-runner: headless weekly analysis runner.
//!
//! Usage:
//!   opportunity-runner --input data/sample/records.csv --run-date 2024-03-10 --db opp.db
//!   opportunity-runner --input export.csv --source customs_export --out reports/
//!   opportunity-runner --db opp.db --transition 4-aminophenol=under_review --note "sampling"

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use opportunity_core::{
    config::EngineConfig,
    engine::{AnalysisEngine, RunOutcome},
    normalizer::RawRecord,
    reference::ReferenceData,
    report::{render_weekly_markdown, Selection},
    store::OpportunityStore,
    tracker::OpportunityStatus,
};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = flag(&args, "--db").unwrap_or("opportunities.db");
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");
    let run_date: NaiveDate =
        parse_arg(&args, "--run-date", chrono::Local::now().date_naive());

    let config = EngineConfig::load(data_dir)?;
    let reference = ReferenceData::load(data_dir, &config.reporting_currency)?;
    let store = OpportunityStore::open(db)?;
    store.migrate()?;
    let engine = AnalysisEngine::new(config, reference, store);

    if let Some(spec) = flag(&args, "--transition") {
        return transition(&engine, spec, run_date, flag(&args, "--note"));
    }

    let input = flag(&args, "--input").ok_or_else(|| anyhow!("--input <file.csv> is required"))?;
    let source = flag(&args, "--source");
    let run_id = flag(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    println!("Opportunity Engine: opportunity-runner");
    println!("  input:     {input}");
    println!("  run date:  {run_date}");
    println!("  run id:    {run_id}");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!();

    let raws = read_csv(input, source)?;
    let outcome = engine.run(&run_id, run_date, &raws)?;
    print_summary(&outcome);

    if let Some(out) = flag(&args, "--out") {
        write_reports(&engine, &outcome, Path::new(out))?;
    }
    Ok(())
}

fn read_csv(path: &str, source: Option<&str>) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| anyhow!("Cannot read {path}: {e}"))?;
    let headers = reader.headers()?.clone();
    let mut raws = Vec::new();
    for row in reader.records() {
        let row = row?;
        raws.push(RawRecord {
            source: source.map(str::to_string),
            fields: headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.trim().to_string(), v.to_string()))
                .collect(),
        });
    }
    log::info!("Read {} records from {path}", raws.len());
    Ok(raws)
}

fn transition(engine: &AnalysisEngine, spec: &str, on: NaiveDate, note: Option<&str>) -> Result<()> {
    let (product_id, status) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("--transition expects <product_id>=<status>, got '{spec}'"))?;
    let to = OpportunityStatus::parse(status.trim())
        .ok_or_else(|| anyhow!("unknown status '{status}'"))?;
    let change = engine.transition_status(product_id.trim(), to, on, note)?;
    println!("{}: {} -> {} on {}", change.product_id, change.from, change.to, change.changed_on);
    Ok(())
}

fn print_summary(outcome: &RunOutcome) {
    let d = &outcome.diagnostics;
    println!("=== RUN SUMMARY ===");
    println!("Run:                 {}", outcome.run_id);
    println!("Window:              {} to {}", outcome.window.start, outcome.window.end);
    println!("Records in:          {}", d.records_in);
    println!("Rejected:            {}", d.rejected_count());
    println!("Duplicates removed:  {}", d.duplicates_removed);
    println!("Outside window:      {}", d.outside_window);
    println!("Insufficient volume: {}", d.insufficient_volume.len());
    println!("Overflowed totals:   {}", d.non_finite.len());
    println!("Missing reference:   {}", d.missing_reference.len());
    println!("Scored:              {}", outcome.scored.len());
    println!("Created:             {}", outcome.summary.created);
    println!("Updated:             {}", outcome.summary.updated);
    println!();
    for section in &outcome.report.tiers {
        println!("{:<16} {}", section.tier.label(), section.opportunities.len());
        for line in &section.opportunities {
            println!("    {:<32} {:.2}", line.product_name, line.composite_score);
        }
    }
    if !outcome.report.movers.is_empty() {
        println!();
        println!("Movers:");
        for m in &outcome.report.movers {
            println!("    {:<32} {:+.2}", m.product_name, m.delta);
        }
    }
}

fn write_reports(engine: &AnalysisEngine, outcome: &RunOutcome, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let stem = format!("weekly_{}", outcome.run_date);

    let json_path = dir.join(format!("{stem}.json"));
    std::fs::write(&json_path, serde_json::to_string_pretty(&outcome.report)?)?;

    let md_path = dir.join(format!("{stem}.md"));
    std::fs::write(&md_path, render_weekly_markdown(&outcome.report))?;

    let summaries = engine.product_summaries(&Selection::actionable())?;
    let summaries_path = dir.join(format!("{stem}_products.json"));
    std::fs::write(&summaries_path, serde_json::to_string_pretty(&summaries)?)?;

    println!();
    println!("Reports written to {}", dir.display());
    Ok(())
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == name).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
