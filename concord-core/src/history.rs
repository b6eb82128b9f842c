//! Append-only run history and trend recomputation.
//!
//! Every finished run appends exactly one CSV row. The trend is never kept
//! as live state; it is re-derived from the full log on demand, so a restart
//! (or a second process reading the same file) always agrees with the
//! process that wrote it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Current row schema version. Bump when the column set changes.
pub const SCHEMA_VERSION: u32 = 1;

const HEADER: &str =
    "schema,run_id,timestamp,auto_mean,instance_mean,agreement,reference_regions,unmatched_references";

/// One appended history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Leading schema version column; rows with an unsupported version are
    /// rejected at read time rather than silently skipped.
    pub schema: u32,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub auto_mean: f32,
    pub instance_mean: f32,
    pub agreement: f32,
    pub reference_regions: usize,
    pub unmatched_references: usize,
}

impl RunRecord {
    pub fn new(
        run_id: Uuid,
        auto_mean: f32,
        instance_mean: f32,
        agreement: f32,
        reference_regions: usize,
        unmatched_references: usize,
    ) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            run_id,
            timestamp: Utc::now(),
            auto_mean,
            instance_mean,
            agreement,
            reference_regions,
            unmatched_references,
        }
    }
}

/// Per-metric series and running means derived from the full log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSummary {
    pub runs: usize,
    pub auto_series: Vec<f32>,
    pub instance_series: Vec<f32>,
    pub agreement_series: Vec<f32>,
    pub auto_mean: f32,
    pub instance_mean: f32,
    pub agreement_mean: f32,
    pub latest: Option<RunRecord>,
}

impl TrendSummary {
    pub fn from_rows(rows: Vec<RunRecord>) -> Self {
        let runs = rows.len();
        let auto_series: Vec<f32> = rows.iter().map(|r| r.auto_mean).collect();
        let instance_series: Vec<f32> = rows.iter().map(|r| r.instance_mean).collect();
        let agreement_series: Vec<f32> = rows.iter().map(|r| r.agreement).collect();
        Self {
            runs,
            auto_mean: mean(&auto_series),
            instance_mean: mean(&instance_series),
            agreement_mean: mean(&agreement_series),
            auto_series,
            instance_series,
            agreement_series,
            latest: rows.into_iter().last(),
        }
    }
}

fn mean(series: &[f32]) -> f32 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().sum::<f32>() / series.len() as f32
}

/// Append-only CSV run log.
pub struct RunLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RunLog {
    /// Binds the log to a file path. The file is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row, writing the header first when the file is new or
    /// empty.
    ///
    /// The row is serialized into a buffer and written with a single call
    /// while an exclusive lock is held, so concurrent run completions never
    /// interleave partial rows.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if record.schema != SCHEMA_VERSION {
            return Err(Error::SchemaMismatch(format!(
                "refusing to append row with schema {} (current {})",
                record.schema, SCHEMA_VERSION
            )));
        }

        let mut row = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut row);
            writer.serialize(record)?;
            writer.flush()?;
        }

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if file.metadata()?.len() == 0 {
            let mut headed = Vec::with_capacity(HEADER.len() + 1 + row.len());
            headed.extend_from_slice(HEADER.as_bytes());
            headed.push(b'\n');
            headed.extend_from_slice(&row);
            file.write_all(&headed)?;
        } else {
            file.write_all(&row)?;
        }

        debug!(run_id = %record.run_id, "appended history row");
        Ok(())
    }

    /// Reads and validates every row. A missing or empty file is an empty
    /// history, not an error; a foreign header or an unsupported schema
    /// version is rejected.
    pub fn read_all(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        if std::fs::metadata(&self.path)?.len() == 0 {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;

        let actual: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let expected: Vec<&str> = HEADER.split(',').collect();
        if actual != expected {
            return Err(Error::SchemaMismatch(format!(
                "history header {:?} in {} does not match {:?}",
                actual,
                self.path.display(),
                expected
            )));
        }

        let mut rows = Vec::new();
        for result in reader.deserialize() {
            let record: RunRecord = result?;
            if record.schema != SCHEMA_VERSION {
                return Err(Error::SchemaMismatch(format!(
                    "history row schema {} is not supported (current {})",
                    record.schema, SCHEMA_VERSION
                )));
            }
            rows.push(record);
        }
        Ok(rows)
    }

    /// Re-derives the trend from the full log. Calling this twice without an
    /// intervening append yields identical summaries.
    pub fn recompute_trend(&self) -> Result<TrendSummary> {
        let rows = self.read_all()?;
        Ok(TrendSummary::from_rows(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(auto: f32, instance: f32, agreement: f32) -> RunRecord {
        RunRecord::new(Uuid::new_v4(), auto, instance, agreement, 3, 0)
    }

    #[test]
    fn test_append_writes_header_exactly_once() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("history.csv"));

        log.append(&record(0.5, 0.6, 0.7)).unwrap();
        log.append(&record(0.1, 0.2, 0.3)).unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let header_lines = text.lines().filter(|l| l.starts_with("schema,")).count();
        assert_eq!(header_lines, 1);
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with(HEADER));
    }

    #[test]
    fn test_read_all_round_trips_rows() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("history.csv"));

        let first = record(0.25, 0.5, 0.75);
        let second = record(1.0, 0.0, 0.0);
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].run_id, first.run_id);
        assert_eq!(rows[0].auto_mean, 0.25);
        assert_eq!(rows[1].run_id, second.run_id);
        assert_eq!(rows[1].instance_mean, 0.0);
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("nothing.csv"));
        assert!(log.read_all().unwrap().is_empty());

        let trend = log.recompute_trend().unwrap();
        assert_eq!(trend.runs, 0);
        assert!(trend.auto_series.is_empty());
        assert_eq!(trend.auto_mean, 0.0);
        assert!(trend.latest.is_none());
    }

    #[test]
    fn test_recompute_trend_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("history.csv"));
        log.append(&record(0.4, 0.6, 0.5)).unwrap();
        log.append(&record(0.8, 0.2, 0.5)).unwrap();

        let first = log.recompute_trend().unwrap();
        let second = log.recompute_trend().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.runs, 2);
        assert!((first.auto_mean - 0.6).abs() < 1e-6);
        assert!((first.instance_mean - 0.4).abs() < 1e-6);
        assert_eq!(first.latest.as_ref().unwrap().auto_mean, 0.8);
    }

    #[test]
    fn test_trend_reflects_new_append() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("history.csv"));
        log.append(&record(0.4, 0.4, 0.4)).unwrap();
        let before = log.recompute_trend().unwrap();

        log.append(&record(0.8, 0.8, 0.8)).unwrap();
        let after = log.recompute_trend().unwrap();

        assert_eq!(before.runs, 1);
        assert_eq!(after.runs, 2);
        assert_eq!(after.auto_series, vec![0.4, 0.8]);
    }

    #[test]
    fn test_unsupported_row_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        let log = RunLog::open(&path);
        log.append(&record(0.5, 0.5, 0.5)).unwrap();

        // Hand-append a row claiming a future schema version.
        let mut text = std::fs::read_to_string(&path).unwrap();
        let forged = text.lines().nth(1).unwrap().replacen("1,", "99,", 1);
        text.push_str(&forged);
        text.push('\n');
        std::fs::write(&path, text).unwrap();

        let err = log.read_all().unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch(_)));
    }

    #[test]
    fn test_foreign_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(&path, "something,else\n1,2\n").unwrap();

        let log = RunLog::open(&path);
        assert!(matches!(
            log.read_all().unwrap_err(),
            Error::SchemaMismatch(_)
        ));
    }

    #[test]
    fn test_append_rejects_stale_schema_record() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::open(dir.path().join("history.csv"));
        let mut stale = record(0.5, 0.5, 0.5);
        stale.schema = 0;
        assert!(matches!(
            log.append(&stale).unwrap_err(),
            Error::SchemaMismatch(_)
        ));
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(RunLog::open(dir.path().join("history.csv")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        log.append(&record(i as f32 / 8.0, 0.5, 0.5)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = log.read_all().unwrap();
        assert_eq!(rows.len(), 80);
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("schema,")).count(), 1);
    }

    #[test]
    fn test_empty_file_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.csv");
        std::fs::write(&path, "").unwrap();
        let log = RunLog::open(&path);
        assert!(log.read_all().unwrap().is_empty());
    }
}
