//! Durable benchmark records
//!
//! One pretty-printed JSON file per record under a single directory:
//!
//! ```text
//! benchmark_results/
//! ├── {taskId}_{backendId}_{timestamp}.json     BenchmarkResult
//! └── {prefix_}summary_{timestamp}.json         BenchmarkSummary
//! ```
//!
//! Timestamps are RFC 3339 with `:` replaced by `-`. Loaders tell the two
//! kinds apart only by whether the filename contains `summary`, and skip
//! files that fail to read or parse.

use super::types::{BenchmarkResult, BenchmarkSummary};
use crate::error::{RoutingError, RoutingResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SUMMARY_MARKER: &str = "summary";

/// Upper bound on `_N` suffixes tried when a filename is already taken.
const MAX_NAME_COLLISIONS: u32 = 1_000;

#[derive(Debug, Clone)]
pub struct BenchmarkStore {
    dir: PathBuf,
}

impl BenchmarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_result(&self, result: &BenchmarkResult) -> RoutingResult<PathBuf> {
        let stem = format!(
            "{}_{}_{}",
            sanitize(result.task_id.as_str()),
            sanitize(&result.backend_id),
            file_timestamp(&result.timestamp)
        );
        self.write_record(&stem, result)
    }

    pub fn save_summary(
        &self,
        summary: &BenchmarkSummary,
        prefix: Option<&str>,
    ) -> RoutingResult<PathBuf> {
        let stamp = file_timestamp(&summary.generated_at);
        let stem = match prefix {
            Some(prefix) if !prefix.is_empty() => {
                format!("{}_{}_{}", sanitize(prefix), SUMMARY_MARKER, stamp)
            }
            _ => format!("{}_{}", SUMMARY_MARKER, stamp),
        };
        self.write_record(&stem, summary)
    }

    /// All non-summary records. A missing directory yields an empty list.
    pub fn load_results(&self) -> RoutingResult<Vec<BenchmarkResult>> {
        self.load_matching(false)
    }

    /// All summary records. A missing directory yields an empty list.
    pub fn load_summaries(&self) -> RoutingResult<Vec<BenchmarkSummary>> {
        self.load_matching(true)
    }

    fn write_record<T: Serialize>(&self, stem: &str, record: &T) -> RoutingResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;

        for n in 0..MAX_NAME_COLLISIONS {
            let name = if n == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, n)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    debug!(path = %path.display(), "Benchmark record written");
                    return Ok(path);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RoutingError::Io(e)),
            }
        }

        Err(RoutingError::Io(std::io::Error::new(
            IoErrorKind::AlreadyExists,
            format!("no free filename for {}", stem),
        )))
    }

    fn load_matching<T: DeserializeOwned>(&self, summaries: bool) -> RoutingResult<Vec<T>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| {
                let is_summary = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(SUMMARY_MARKER));
                is_summary == summaries
            })
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable benchmark record"),
            }
        }
        Ok(records)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> RoutingResult<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn file_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-")
}

/// Keep filenames portable whatever the ids contain.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::task::TaskId;
    use chrono::TimeZone;

    fn result(task: &str, backend: &str) -> BenchmarkResult {
        BenchmarkResult {
            task_id: TaskId::from(task),
            backend_id: backend.into(),
            success: true,
            latency_ms: 420,
            prompt_tokens: 12,
            completion_tokens: 30,
            error_kind: None,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap(),
            quality_score: Some(0.875),
        }
    }

    #[test]
    fn test_result_filename_is_filesystem_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path());
        let path = store.save_result(&result("t/1", "gpt:4o")).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "t_1_gpt_4o_2024-05-01T12-30-45.000Z.json"
        );
    }

    #[test]
    fn test_same_name_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path());
        let first = store.save_result(&result("t1", "a")).unwrap();
        let second = store.save_result(&result("t1", "a")).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.load_results().unwrap().len(), 2);
    }

    #[test]
    fn test_results_and_summaries_are_separated() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path());
        store.save_result(&result("t1", "a")).unwrap();
        let summary = BenchmarkSummary {
            backend_id: "a".into(),
            sample_count: 1,
            success_rate: 1.0,
            avg_latency_ms: 420.0,
            avg_quality_estimate: 0.875,
            generated_at: Utc::now(),
        };
        let path = store.save_summary(&summary, Some("nightly")).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("nightly_summary_"));

        assert_eq!(store.load_results().unwrap(), vec![result("t1", "a")]);
        assert_eq!(store.load_summaries().unwrap(), vec![summary]);
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path());
        store.save_result(&result("t1", "a")).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = store.load_results().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].error_kind, None);
    }

    #[test]
    fn test_missing_directory_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path().join("never-created"));
        assert!(store.load_results().unwrap().is_empty());
        assert!(store.load_summaries().unwrap().is_empty());
    }

    #[test]
    fn test_failed_result_keeps_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(dir.path());
        let failed = BenchmarkResult {
            success: false,
            error_kind: Some(ErrorKind::ContextLengthExceeded),
            quality_score: None,
            ..result("t2", "b")
        };
        store.save_result(&failed).unwrap();
        assert_eq!(store.load_results().unwrap(), vec![failed]);
    }
}
