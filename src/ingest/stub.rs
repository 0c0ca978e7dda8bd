//! Scripted detection source (`stub://`).
//!
//! Plays a one-minute scene on repeat, one batch per second at the default
//! frame period:
//! - 0s: a person walks through
//! - 3-5s: a backpack is set down, nobody around
//! - 45s: a person passes again, long after the backpack was last seen
//! - 50-52s: a suitcase appears and its owner is next to it at 52s
//!
//! The backpack escalates P3 -> P2 -> P1 and survives the person at 45s; the
//! suitcase is cleared at 52s.

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Duration as ChronoDuration;

use super::{DetectionSource, FrameClock, RawBatch, SourceStats};
use crate::detect::RawDetection;
use crate::Timestamp;

const SCENE_PERIOD: u64 = 60;
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_secs(1);
const PERSON: u32 = 0;
const BACKPACK: u32 = 24;
const SUITCASE: u32 = 28;

pub struct StubSource {
    url: String,
    /// `None` stamps batches with the wall clock.
    synthetic_start: Option<Timestamp>,
    frame_count: u64,
    limit: Option<u64>,
    frame_period: Duration,
    last_emit: Option<Instant>,
}

impl StubSource {
    /// Wall-clock scene, paced at one batch per second.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            synthetic_start: None,
            frame_count: 0,
            limit: None,
            frame_period: DEFAULT_FRAME_PERIOD,
            last_emit: None,
        }
    }

    /// Pace wall-clock batches at `period` instead of one per second.
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    /// Stamp batches `start`, `start + 1s`, ... without waiting.
    pub fn synthetic(url: &str, start: Timestamp) -> Self {
        Self {
            synthetic_start: Some(start),
            ..Self::new(url)
        }
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.frame_period {
                std::thread::sleep(self.frame_period - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }

    /// End the stream after `frames` batches.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    fn scene_at(second: u64) -> Vec<RawDetection> {
        match second % SCENE_PERIOD {
            0 | 45 => vec![RawDetection::with_id(PERSON, 0.91)],
            3..=5 => vec![RawDetection::with_id(BACKPACK, 0.78)],
            50 | 51 => vec![RawDetection::with_id(SUITCASE, 0.83)],
            52 => vec![
                RawDetection::with_id(SUITCASE, 0.84),
                RawDetection::with_id(PERSON, 0.88),
            ],
            _ => Vec::new(),
        }
    }
}

impl DetectionSource for StubSource {
    fn name(&self) -> &str {
        &self.url
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("StubSource: connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let second = self.frame_count;
        self.frame_count += 1;
        let timestamp = match self.synthetic_start {
            Some(start) => start + ChronoDuration::seconds(second as i64),
            None => {
                self.pace();
                crate::now_local()
            }
        };
        Ok(Some(RawBatch {
            timestamp,
            detections: Self::scene_at(second),
        }))
    }

    fn clock(&self) -> FrameClock {
        match self.synthetic_start {
            Some(_) => FrameClock::Recorded,
            None => FrameClock::Wall,
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            batches_read: self.frame_count,
            malformed_records: 0,
            source: self.url.clone(),
        }
    }
}
