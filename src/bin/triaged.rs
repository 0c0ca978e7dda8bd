//! triaged - unattended object triage daemon
//!
//! This daemon:
//! 1. Reads per-frame detection batches from the configured source
//! 2. Folds each frame into the unattended tracker, at wall-clock time for
//!    live sources and at the recorded frame time for replay logs
//! 3. Evaluates the scene priority and logs escalations
//! 4. On shutdown (Ctrl-C, end of stream, or source failure) exports reports

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use unattended_triage::config::{redact_url, TriageConfig};
use unattended_triage::ingest::{open_source, spawn_reader, FrameClock, SourceReader};
use unattended_triage::{now_local, ReportExporter, TriageEngine};

const READER_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "TRIAGE_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = TriageConfig::load_from(args.config.as_deref())?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;
    }

    let mut engine = TriageEngine::from_config(&cfg)?;
    let exporter = ReportExporter::new(cfg.artifacts.clone());

    log::info!("triaged running. source={}", redact_url(&cfg.source_url));
    log::info!(
        "unattended_after={}s clear_window={}s tracked={} escalation={}",
        cfg.tracker.unattended_threshold.as_secs(),
        cfg.tracker.clear_window.as_secs(),
        cfg.tracker.tracked,
        cfg.escalation
    );
    log::info!("reports will be written to {}", cfg.artifacts.dir.display());

    let mut clock = FrameClock::Wall;
    let run_result = run(&cfg, &mut engine, &stop, args.max_frames, &mut clock);
    if let Err(e) = &run_result {
        log::error!("error occurred during processing: {}", e);
    }

    // Recorded sources are judged at the time of their last frame.
    let taken_at = match clock {
        FrameClock::Recorded => engine.last_evaluated_at().unwrap_or_else(now_local),
        FrameClock::Wall => now_local(),
    };
    let snapshot = engine.snapshot(taken_at);
    let summary = exporter.export(&snapshot);
    log::info!(
        "shutdown after {} frames: {} reports written, {} failed, final priority={:?}",
        engine.frames_processed(),
        summary.written.len(),
        summary.failed.len(),
        snapshot.priority()
    );

    run_result
}

fn run(
    cfg: &TriageConfig,
    engine: &mut TriageEngine,
    stop: &Arc<AtomicBool>,
    max_frames: Option<u64>,
    clock: &mut FrameClock,
) -> Result<()> {
    let mut source = open_source(&cfg.source_url, cfg.frame_interval)?;
    source.connect()?;
    let reader = spawn_reader(source, cfg.queue_capacity, stop.clone())?;
    *clock = reader.clock;
    if reader.clock == FrameClock::Recorded {
        log::info!("replaying recorded frames against their own timestamps");
    }

    let result = process_frames(cfg, engine, stop, max_frames, &reader);
    let stats = reader.finish(READER_GRACE);
    log::info!(
        "{}: {} batches read, {} malformed records skipped",
        stats.source,
        stats.batches_read,
        stats.malformed_records
    );
    result
}

fn process_frames(
    cfg: &TriageConfig,
    engine: &mut TriageEngine,
    stop: &Arc<AtomicBool>,
    max_frames: Option<u64>,
    reader: &SourceReader,
) -> Result<()> {
    let mut last_health_log = Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            log::info!("stop requested");
            return Ok(());
        }
        if max_frames.is_some_and(|max| engine.frames_processed() >= max) {
            log::info!("frame limit reached");
            stop.store(true, Ordering::SeqCst);
            return Ok(());
        }

        // Poll so a stop request is noticed even while the source is idle.
        let batch = match reader.batches.recv_timeout(Duration::from_millis(250)) {
            Ok(batch) => batch?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };

        let summary = engine.process_batch(&batch, reader.clock.now_for(&batch));
        if let Some(priority) = summary.priority {
            log::info!(
                "Priority: {} unattended={:?}",
                priority,
                summary.unattended
            );
        }

        if last_health_log.elapsed() >= cfg.health_log_interval {
            let status = reader.status();
            log::info!(
                "source={} healthy={} batches={} malformed={} frames={} open_sightings={}",
                status.stats.source,
                status.healthy,
                status.stats.batches_read,
                status.stats.malformed_records,
                engine.frames_processed(),
                engine.state().open_sightings().count()
            );
            if !status.healthy {
                log::warn!("source {} reports unhealthy", status.stats.source);
            }
            last_health_log = Instant::now();
        }
    }
}
