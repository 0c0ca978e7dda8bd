//! triage_replay - fold a recorded detection log and write the reports
//!
//! The recorded frame timestamps drive the clock, so a replay reproduces the
//! priorities the live run would have produced.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use unattended_triage::detect::ClassMap;
use unattended_triage::ingest::{DetectionSource, ReplaySource};
use unattended_triage::{
    format_timestamp, ArtifactPaths, EscalationPolicy, PriorityEvaluator, PriorityThresholds,
    ReportExporter, TrackedRanges, TrackerSettings, TriageEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Recorded detections (JSON lines or a JSON array of frames).
    input: PathBuf,
    /// Output directory for the reports.
    #[arg(long, default_value = "triage_out")]
    out: PathBuf,
    /// Seconds before an open sighting counts as unattended.
    #[arg(long, default_value_t = 10)]
    unattended_secs: u64,
    /// A person clears sightings reconfirmed within this many seconds.
    #[arg(long, default_value_t = 10)]
    clear_secs: u64,
    /// Tracked class id ranges.
    #[arg(long, default_value = "14-55,62-79")]
    ranges: String,
    /// Escalation policy (global|per-class).
    #[arg(long, default_value = "global")]
    escalation: EscalationPolicy,
    /// JSON array of class names (index = class id). COCO-80 by default.
    #[arg(long)]
    class_names: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.unattended_secs == 0 || args.clear_secs == 0 {
        return Err(anyhow!("--unattended-secs and --clear-secs must be >= 1"));
    }

    let classes = match &args.class_names {
        Some(path) => ClassMap::load(path)?,
        None => ClassMap::coco(),
    };
    let tracker = TrackerSettings {
        unattended_threshold: std::time::Duration::from_secs(args.unattended_secs),
        clear_window: std::time::Duration::from_secs(args.clear_secs),
        tracked: TrackedRanges::parse(&args.ranges)?,
        ..TrackerSettings::default()
    };
    let evaluator = PriorityEvaluator::new(PriorityThresholds::default(), args.escalation);
    let mut engine = TriageEngine::new(classes, tracker, evaluator);

    let mut source = ReplaySource::open(&args.input)?;
    let mut last_seen_at = None;
    while let Some(batch) = source.next_batch()? {
        let summary = engine.process_batch(&batch, batch.timestamp);
        if let Some(priority) = summary.priority {
            println!("{} Priority: {}", format_timestamp(&batch.timestamp), priority);
        }
        last_seen_at = Some(batch.timestamp);
    }

    let Some(end) = last_seen_at else {
        return Err(anyhow!("{} contains no frames", args.input.display()));
    };
    let stats = source.stats();
    if stats.malformed_records > 0 {
        eprintln!("skipped {} malformed records", stats.malformed_records);
    }

    let exporter = ReportExporter::new(ArtifactPaths::in_dir(&args.out));
    let summary = exporter.export(&engine.snapshot(end));
    for path in &summary.written {
        println!("wrote {}", path.display());
    }
    if !summary.is_complete() {
        return Err(anyhow!("{} report(s) failed to write", summary.failed.len()));
    }
    Ok(())
}
