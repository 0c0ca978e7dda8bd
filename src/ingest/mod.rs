//! Detection batch sources.
//!
//! Video decode and model inference happen upstream. What reaches this crate
//! is one `RawBatch` per processed frame: the frame's capture time and the
//! detector's raw output. Sources:
//! - Replay logs (JSON lines or a JSON array of recorded frames)
//! - Stdin bridge (`stdin://` or `-`): an external detector pipes JSON lines
//! - Stub scene (`stub://`): scripted detections for demos and tests
//!
//! A source returning `Ok(None)` has reached the end of its stream. An error
//! is an acquisition failure: it ends the processing loop but the state
//! accumulated so far is still exported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::RawDetection;
use crate::Timestamp;

pub mod replay;
pub mod stub;

pub use replay::ReplaySource;
pub use stub::StubSource;

/// Raw detector output for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    #[serde(with = "crate::timestamp_format")]
    pub timestamp: Timestamp,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// Which clock a source's batches are evaluated against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameClock {
    /// Batches arrive as they are captured; `now` is the local wall clock.
    #[default]
    Wall,
    /// Batches were recorded earlier; `now` is the batch's own timestamp.
    Recorded,
}

impl FrameClock {
    pub fn now_for(self, batch: &RawBatch) -> Timestamp {
        match self {
            FrameClock::Wall => crate::now_local(),
            FrameClock::Recorded => batch.timestamp,
        }
    }
}

/// Source statistics for health logging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub batches_read: u64,
    /// Input records that could not be parsed and were skipped.
    pub malformed_records: u64,
    pub source: String,
}

pub trait DetectionSource: Send {
    /// Display name. Must not carry credentials.
    fn name(&self) -> &str;

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame's detections. `Ok(None)` at end of stream.
    fn next_batch(&mut self) -> Result<Option<RawBatch>>;

    fn clock(&self) -> FrameClock {
        FrameClock::Wall
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by `url`.
///
/// `frame_interval` paces sources that generate frames themselves. Network
/// camera URLs are rejected: decoding and inference run in an external
/// detector, which feeds this process through `stdin://`.
pub fn open_source(url: &str, frame_interval: Duration) -> Result<Box<dyn DetectionSource>> {
    let url = url.trim();
    if url.starts_with("stub://") {
        return Ok(Box::new(StubSource::new(url).with_frame_period(frame_interval)));
    }
    if url == "-" || url == "stdin://" {
        return Ok(Box::new(ReplaySource::stdin()));
    }
    if let Some(path) = url
        .strip_prefix("replay://")
        .or_else(|| url.strip_prefix("file://"))
    {
        return Ok(Box::new(ReplaySource::open(std::path::Path::new(path))?));
    }
    if url.contains("://") {
        return Err(anyhow!(
            "{} needs an external detector; pipe its detections to stdin:// or record them for replay://",
            crate::config::redact_url(url)
        ));
    }
    Ok(Box::new(ReplaySource::open(std::path::Path::new(url))?))
}

/// Latest view of a running source, refreshed after every batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStatus {
    pub stats: SourceStats,
    pub healthy: bool,
}

/// Consumer end of a source running on its own thread.
pub struct SourceReader {
    pub batches: Receiver<Result<RawBatch>>,
    pub clock: FrameClock,
    status: Arc<Mutex<SourceStatus>>,
    handle: JoinHandle<()>,
}

impl SourceReader {
    pub fn status(&self) -> SourceStatus {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Close the channel and wait up to `grace` for the reader thread.
    ///
    /// A source blocked on input (stdin) may not return in time; the stats
    /// last published are returned either way.
    pub fn finish(self, grace: Duration) -> SourceStats {
        let SourceReader {
            batches,
            status,
            handle,
            ..
        } = self;
        drop(batches);
        let deadline = Instant::now() + grace;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                log::error!("detection reader thread panicked");
            }
        } else {
            log::warn!("detection reader still blocked on input; not waiting for it");
        }
        let stats = match status.lock() {
            Ok(status) => status.stats.clone(),
            Err(poisoned) => poisoned.into_inner().stats.clone(),
        };
        stats
    }
}

/// Run `source` on a producer thread feeding a bounded channel.
///
/// The channel closes after the source ends or fails; a failure is delivered
/// as the last item. The consumer owns all tracking state.
pub fn spawn_reader(
    mut source: Box<dyn DetectionSource>,
    capacity: usize,
    stop: Arc<AtomicBool>,
) -> Result<SourceReader> {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let clock = source.clock();
    let status = Arc::new(Mutex::new(SourceStatus {
        stats: source.stats(),
        healthy: source.is_healthy(),
    }));
    let published = status.clone();
    let publish = move |source: &dyn DetectionSource| {
        if let Ok(mut status) = published.lock() {
            status.stats = source.stats();
            status.healthy = source.is_healthy();
        }
    };
    let handle = std::thread::Builder::new()
        .name("detection-reader".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let next = source.next_batch();
                publish(&*source);
                match next {
                    Ok(Some(batch)) => {
                        if tx.send(Ok(batch)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("{}: end of stream", source.name());
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })
        .map_err(|e| anyhow!("failed to spawn detection reader: {}", e))?;
    Ok(SourceReader {
        batches: rx,
        clock,
        status,
        handle,
    })
}
