//! Report records and the artifact exporter.
//!
//! Exports read a `TriageSnapshot`, an owned copy of the engine's state taken
//! between frames, so they never observe a half-applied fold. Each artifact
//! is written independently: one failed write is logged and the rest are
//! still attempted.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionEvent;
use crate::priority::{Priority, PriorityEvaluator};
use crate::tracker::{Sighting, TrackerState};
use crate::Timestamp;

pub const DEFAULT_UNATTENDED_FILE: &str = "unattended_objects.json";
pub const DEFAULT_FRAME_LOG_FILE: &str = "output.json";
pub const DEFAULT_CLASS_COUNTS_FILE: &str = "class_counts.csv";
pub const DEFAULT_TERMINAL_LOG_FILE: &str = "terminal_output.txt";

const CLASS_COUNTS_HEADER: &str = "Timestamp,Class Name,Count";

// -------------------- Records --------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub class_name: String,
    pub confidence: f32,
}

/// One processed frame in the detection log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    #[serde(with = "crate::timestamp_format")]
    pub timestamp: Timestamp,
    pub detections: Vec<DetectionEntry>,
}

impl FrameReport {
    pub fn from_events(timestamp: Timestamp, events: &[DetectionEvent]) -> Self {
        Self {
            timestamp,
            detections: events
                .iter()
                .map(|e| DetectionEntry {
                    class_name: e.class_name.clone(),
                    confidence: e.confidence,
                })
                .collect(),
        }
    }
}

/// Per-class entry of the unattended report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnattendedClassReport {
    pub objects: Vec<Sighting>,
    pub unattended: bool,
    pub priority: Option<Priority>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassCountRow {
    #[serde(with = "crate::timestamp_format")]
    pub timestamp: Timestamp,
    pub class_name: String,
    pub count: u32,
}

// -------------------- Snapshot --------------------

/// Point-in-time copy of everything the exporter needs.
#[derive(Clone, Debug)]
pub struct TriageSnapshot {
    pub taken_at: Timestamp,
    pub state: TrackerState,
    pub evaluator: PriorityEvaluator,
    pub frames: Vec<FrameReport>,
    pub terminal_log: Vec<String>,
}

impl TriageSnapshot {
    /// Scene priority at `taken_at`.
    pub fn priority(&self) -> Option<Priority> {
        self.evaluator.evaluate(&self.state, &self.taken_at)
    }

    pub fn unattended_report(&self) -> BTreeMap<String, UnattendedClassReport> {
        let threshold = self.state.settings().unattended_threshold;
        self.state
            .classes()
            .map(|(name, class)| {
                let report = UnattendedClassReport {
                    objects: class.sightings().to_vec(),
                    unattended: class.is_unattended(&self.taken_at, threshold),
                    priority: self.evaluator.evaluate_for(class, &self.taken_at),
                };
                (name.to_string(), report)
            })
            .collect()
    }

    pub fn class_count_rows(&self) -> Vec<ClassCountRow> {
        self.state
            .class_counts()
            .iter()
            .flat_map(|(timestamp, counts)| {
                counts.iter().map(move |(class_name, count)| ClassCountRow {
                    timestamp: *timestamp,
                    class_name: class_name.clone(),
                    count: *count,
                })
            })
            .collect()
    }
}

// -------------------- Exporter --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Artifact {
    TerminalLog,
    UnattendedObjects,
    FrameLog,
    ClassCounts,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [
        Artifact::TerminalLog,
        Artifact::UnattendedObjects,
        Artifact::FrameLog,
        Artifact::ClassCounts,
    ];
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::TerminalLog => "terminal output",
            Artifact::UnattendedObjects => "unattended objects",
            Artifact::FrameLog => "output data",
            Artifact::ClassCounts => "class counts",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub unattended_objects: String,
    pub frame_log: String,
    pub class_counts: String,
    pub terminal_log: String,
}

impl ArtifactPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        let file = match artifact {
            Artifact::TerminalLog => &self.terminal_log,
            Artifact::UnattendedObjects => &self.unattended_objects,
            Artifact::FrameLog => &self.frame_log,
            Artifact::ClassCounts => &self.class_counts,
        };
        self.dir.join(file)
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            unattended_objects: DEFAULT_UNATTENDED_FILE.to_string(),
            frame_log: DEFAULT_FRAME_LOG_FILE.to_string(),
            class_counts: DEFAULT_CLASS_COUNTS_FILE.to_string(),
            terminal_log: DEFAULT_TERMINAL_LOG_FILE.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(Artifact, String)>,
}

impl ExportSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ReportExporter {
    paths: ArtifactPaths,
}

impl ReportExporter {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Write every artifact. Never fails as a whole; see `ExportSummary`.
    pub fn export(&self, snapshot: &TriageSnapshot) -> ExportSummary {
        let mut summary = ExportSummary::default();
        for artifact in Artifact::ALL {
            let path = self.paths.path(artifact);
            match self.write(artifact, &path, snapshot) {
                Ok(()) => {
                    log::info!("saved {} to {}", artifact, path.display());
                    summary.written.push(path);
                }
                Err(e) => {
                    log::error!("error occurred while saving {}: {}", artifact, e);
                    summary.failed.push((artifact, e.to_string()));
                }
            }
        }
        summary
    }

    pub fn write(&self, artifact: Artifact, path: &Path, snapshot: &TriageSnapshot) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("failed to create {}: {}", parent.display(), e))?;
            }
        }
        let file = File::create(path)
            .map_err(|e| anyhow!("failed to create {}: {}", path.display(), e))?;
        let mut out = BufWriter::new(file);
        match artifact {
            Artifact::TerminalLog => {
                for line in &snapshot.terminal_log {
                    writeln!(out, "{}", line)?;
                }
            }
            Artifact::UnattendedObjects => {
                serde_json::to_writer_pretty(&mut out, &snapshot.unattended_report())?;
            }
            Artifact::FrameLog => {
                serde_json::to_writer_pretty(&mut out, &snapshot.frames)?;
            }
            Artifact::ClassCounts => write_class_counts(&mut out, &snapshot.class_count_rows())?,
        }
        out.flush()
            .map_err(|e| anyhow!("failed to flush {}: {}", path.display(), e))?;
        Ok(())
    }
}

fn write_class_counts<W: Write>(out: &mut W, rows: &[ClassCountRow]) -> Result<()> {
    writeln!(out, "{}", CLASS_COUNTS_HEADER)?;
    for row in rows {
        writeln!(
            out,
            "{},{},{}",
            crate::format_timestamp(&row.timestamp),
            csv_field(&row.class_name),
            row.count
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("backpack"), "backpack");
        assert_eq!(csv_field("cell phone"), "cell phone");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn class_count_table_has_header_and_rows() -> Result<()> {
        let ts = crate::parse_timestamp("2024-03-01 10:00:00")?;
        let rows = vec![
            ClassCountRow {
                timestamp: ts,
                class_name: "backpack".to_string(),
                count: 2,
            },
            ClassCountRow {
                timestamp: ts,
                class_name: "person".to_string(),
                count: 1,
            },
        ];
        let mut out = Vec::new();
        write_class_counts(&mut out, &rows)?;
        assert_eq!(
            String::from_utf8(out)?,
            "Timestamp,Class Name,Count\n2024-03-01 10:00:00,backpack,2\n2024-03-01 10:00:00,person,1\n"
        );
        Ok(())
    }

    #[test]
    fn artifact_paths_use_default_file_names() {
        let paths = ArtifactPaths::in_dir("/tmp/run");
        assert_eq!(
            paths.path(Artifact::UnattendedObjects),
            PathBuf::from("/tmp/run/unattended_objects.json")
        );
        assert_eq!(paths.path(Artifact::FrameLog), PathBuf::from("/tmp/run/output.json"));
        assert_eq!(
            paths.path(Artifact::ClassCounts),
            PathBuf::from("/tmp/run/class_counts.csv")
        );
        assert_eq!(
            paths.path(Artifact::TerminalLog),
            PathBuf::from("/tmp/run/terminal_output.txt")
        );
    }
}
