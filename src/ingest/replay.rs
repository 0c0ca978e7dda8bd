//! Recorded detection logs and the stdin bridge.
//!
//! Accepted input, one frame per record:
//!
//! ```text
//! {"timestamp": "2024-03-01 10:00:00", "detections": [{"class_id": 24, "confidence": 0.8}]}
//! ```
//!
//! Files may hold JSON lines or a single JSON array (the `output.json` frame
//! log written by the exporter replays as-is). Stdin is read as JSON lines.
//! Records without a timestamp are stamped with the local clock on arrival.
//! Unparseable records are skipped and counted.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use super::{DetectionSource, FrameClock, RawBatch, SourceStats};
use crate::detect::RawDetection;
use crate::Timestamp;

#[derive(Debug, Deserialize)]
struct RecordedFrame {
    #[serde(default, with = "crate::timestamp_format::option")]
    timestamp: Option<Timestamp>,
    #[serde(default)]
    detections: Vec<RawDetection>,
}

impl RecordedFrame {
    fn into_batch(self) -> RawBatch {
        RawBatch {
            timestamp: self.timestamp.unwrap_or_else(crate::now_local),
            detections: self.detections,
        }
    }
}

enum Backing {
    Frames(VecDeque<RecordedFrame>),
    Lines(Box<dyn BufRead + Send>),
}

pub struct ReplaySource {
    name: String,
    backing: Backing,
    clock: FrameClock,
    batches_read: u64,
    malformed_records: u64,
    failed: bool,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut raw = String::new();
        File::open(path)
            .and_then(|mut file| file.read_to_string(&mut raw))
            .map_err(|e| anyhow!("failed to read replay log {}: {}", path.display(), e))?;
        let name = format!("replay://{}", path.display());
        if raw.trim_start().starts_with('[') {
            let frames: Vec<RecordedFrame> = serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid replay log {}: {}", path.display(), e))?;
            return Ok(Self::with_backing(name, Backing::Frames(frames.into())));
        }
        Ok(Self::from_reader(name, std::io::Cursor::new(raw.into_bytes())))
    }

    /// Live detector output; evaluated against the wall clock.
    pub fn stdin() -> Self {
        let mut source = Self::from_reader("stdin://".to_string(), BufReader::new(std::io::stdin()));
        source.clock = FrameClock::Wall;
        source
    }

    /// JSON-lines records from any reader.
    pub fn from_reader<R: BufRead + Send + 'static>(name: String, reader: R) -> Self {
        Self::with_backing(name, Backing::Lines(Box::new(reader)))
    }

    fn with_backing(name: String, backing: Backing) -> Self {
        Self {
            name,
            backing,
            clock: FrameClock::Recorded,
            batches_read: 0,
            malformed_records: 0,
            failed: false,
        }
    }

    fn next_line_record(&mut self) -> Result<Option<RecordedFrame>> {
        let Backing::Lines(reader) = &mut self.backing else {
            return Ok(None);
        };
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| {
                self.failed = true;
                anyhow!("{}: read failed: {}", self.name, e)
            })?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordedFrame>(trimmed) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    self.malformed_records += 1;
                    log::warn!("{}: skipping malformed record: {}", self.name, e);
                }
            }
        }
    }
}

impl DetectionSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        let frame = match self.backing {
            Backing::Frames(ref mut frames) => frames.pop_front(),
            Backing::Lines(_) => self.next_line_record()?,
        };
        Ok(frame.map(|frame| {
            self.batches_read += 1;
            frame.into_batch()
        }))
    }

    fn clock(&self) -> FrameClock {
        self.clock
    }

    fn is_healthy(&self) -> bool {
        !self.failed
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            batches_read: self.batches_read,
            malformed_records: self.malformed_records,
            source: self.name.clone(),
        }
    }
}
