use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::ReportError;

/// Why a file ended up in the Failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    UnrecognizedFilenameFormat,
    DecodeError,
    WriteError,
    WriteConflict,
}

/// Terminal state of one ingested file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Written { position: String, replaced: bool },
    Skipped { position: String, reason: String },
    Failed { kind: FailureKind, message: String },
}

impl Outcome {
    pub fn failed(kind: FailureKind, error: impl ToString) -> Self {
        Self::Failed {
            kind,
            message: error.to_string(),
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failure,
}

/// Summary of one batch: the terminal state of every file, in the order given
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub instrument: String,
    pub entries: Vec<FileOutcome>,
}

impl RunReport {
    pub fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            entries: vec![],
        }
    }

    pub fn push(&mut self, file: &Path, outcome: Outcome) {
        self.entries.push(FileOutcome {
            file: file.to_path_buf(),
            outcome,
        });
    }

    pub fn written(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_written()).count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_failed()).count()
    }

    /// Success when nothing failed, Failure when everything did
    pub fn status(&self) -> RunStatus {
        let failed = self.failed();
        if failed == 0 {
            RunStatus::Success
        } else if failed == self.entries.len() {
            RunStatus::Failure
        } else {
            RunStatus::PartialSuccess
        }
    }

    /// Outcome of the first entry for a given file
    pub fn outcome_of(&self, file: &Path) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.file == file)
            .map(|e| &e.outcome)
    }

    pub fn log_summary(&self) {
        log::info!(
            "{}: {} written, {} skipped, {} failed ({:?})",
            self.instrument,
            self.written(),
            self.skipped(),
            self.failed(),
            self.status()
        );
        for entry in self.entries.iter() {
            if let Outcome::Failed { kind, message } = &entry.outcome {
                log::warn!("{} failed ({:?}): {}", entry.file.display(), kind, message);
            }
        }
    }

    /// Write the report as YAML
    pub fn write_yaml(&self, path: &Path) -> Result<(), ReportError> {
        let mut report_file = std::fs::File::create(path)?;
        report_file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(position: &str) -> Outcome {
        Outcome::Written {
            position: position.into(),
            replaced: false,
        }
    }

    #[test]
    fn test_status() {
        let mut report = RunReport::new("edx");
        assert_eq!(report.status(), RunStatus::Success);
        report.push(Path::new("a_p01.spx"), written("p01"));
        report.push(
            Path::new("b_p01.spx"),
            Outcome::Skipped {
                position: "p01".into(),
                reason: "taken".into(),
            },
        );
        assert_eq!(report.status(), RunStatus::Success);
        report.push(
            Path::new("c.spx"),
            Outcome::failed(FailureKind::DecodeError, "bad xml"),
        );
        assert_eq!(report.status(), RunStatus::PartialSuccess);
        assert_eq!((report.written(), report.skipped(), report.failed()), (1, 1, 1));

        let mut all_bad = RunReport::new("xrd");
        all_bad.push(
            Path::new("x.img"),
            Outcome::failed(FailureKind::UnrecognizedFilenameFormat, "no counter"),
        );
        assert_eq!(all_bad.status(), RunStatus::Failure);
    }

    #[test]
    fn test_yaml_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.yml");
        let mut report = RunReport::new("edx");
        report.push(Path::new("a_p01.spx"), written("p01"));
        report.write_yaml(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("instrument: edx"));
        assert!(text.contains("state: written"));
        assert!(text.contains("position: p01"));
    }
}
