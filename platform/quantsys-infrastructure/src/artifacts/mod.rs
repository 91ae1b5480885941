use crate::reporting;
use quantsys_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use quantsys_domain::services::audit::AuditEvent;
use quantsys_domain::services::engine::RejectedOrder;
use quantsys_domain::services::performance::PerformanceSummary;
use quantsys_domain::value_objects::equity_point::EquityPoint;
use quantsys_domain::value_objects::fill::Fill;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Writes run artifacts to the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemArtifactWriter;

impl FilesystemArtifactWriter {
    pub fn new() -> Self {
        Self
    }
}

/// Reads artifacts back for `report`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilesystemArtifactReader;

impl FilesystemArtifactReader {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Write,
    Read,
}

/// Runs one artifact call and records `quantsys.infra.artifacts.{write,read}.*`
/// labelled by artifact kind and outcome.
fn instrumented<T>(
    direction: Direction,
    kind: &'static str,
    call: impl FnOnce() -> Result<T, String>,
) -> Result<T, String> {
    let started = Instant::now();
    let result = call();
    let outcome = if result.is_ok() { "ok" } else { "err" };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    match direction {
        Direction::Write => {
            metrics::counter!(
                "quantsys.infra.artifacts.write.calls_total",
                "kind" => kind,
                "result" => outcome
            )
            .increment(1);
            metrics::histogram!(
                "quantsys.infra.artifacts.write_ms",
                "kind" => kind,
                "result" => outcome
            )
            .record(elapsed_ms);
        }
        Direction::Read => {
            metrics::counter!(
                "quantsys.infra.artifacts.read.calls_total",
                "kind" => kind,
                "result" => outcome
            )
            .increment(1);
            metrics::histogram!(
                "quantsys.infra.artifacts.read_ms",
                "kind" => kind,
                "result" => outcome
            )
            .record(elapsed_ms);
        }
    }
    if let Err(err) = &result {
        debug!(kind, error = %err, "artifact call failed");
    }
    result
}

impl ArtifactWriter for FilesystemArtifactWriter {
    fn ensure_dir(&self, path: &Path) -> Result<(), String> {
        instrumented(Direction::Write, "dir", || {
            fs::create_dir_all(path)
                .map_err(|err| format!("failed to create run dir {}: {err}", path.display()))
        })
    }

    fn write_trades_csv(&self, path: &Path, fills: &[Fill]) -> Result<(), String> {
        instrumented(Direction::Write, "trades", || {
            reporting::write_trades_csv(path, fills)
        })
    }

    fn write_equity_csv(&self, path: &Path, points: &[EquityPoint]) -> Result<(), String> {
        instrumented(Direction::Write, "equity", || {
            reporting::write_equity_csv(path, points)
        })
    }

    fn write_rejected_orders_csv(
        &self,
        path: &Path,
        rejected: &[RejectedOrder],
    ) -> Result<(), String> {
        instrumented(Direction::Write, "rejected_orders", || {
            reporting::write_rejected_orders_csv(path, rejected)
        })
    }

    fn write_summary_json(
        &self,
        path: &Path,
        summary: &PerformanceSummary,
        meta: Option<&serde_json::Value>,
        config_snapshot: Option<&serde_json::Value>,
    ) -> Result<(), String> {
        instrumented(Direction::Write, "summary", || {
            reporting::write_summary_json(path, summary, meta, config_snapshot)
        })
    }

    fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<(), String> {
        instrumented(Direction::Write, "json", || reporting::write_json(path, value))
    }

    fn write_audit_jsonl(&self, path: &Path, events: &[AuditEvent]) -> Result<(), String> {
        instrumented(Direction::Write, "audit", || {
            reporting::write_audit_jsonl(path, events)
        })
    }

    fn write_config_snapshot_toml(&self, path: &Path, contents: &str) -> Result<(), String> {
        instrumented(Direction::Write, "config_snapshot", || {
            fs::write(path, contents)
                .map_err(|err| format!("failed to write {}: {err}", path.display()))
        })
    }
}

impl ArtifactReader for FilesystemArtifactReader {
    fn read_trades_csv(&self, path: &Path) -> Result<Vec<Fill>, String> {
        instrumented(Direction::Read, "trades", || reporting::read_trades_csv(path))
    }

    fn read_equity_csv(&self, path: &Path) -> Result<Vec<EquityPoint>, String> {
        instrumented(Direction::Read, "equity", || reporting::read_equity_csv(path))
    }

    /// Runs written before snapshots existed have none; that is not an error.
    fn read_config_snapshot_toml(&self, path: &Path) -> Result<Option<String>, String> {
        instrumented(Direction::Read, "config_snapshot", || {
            match fs::read_to_string(path) {
                Ok(contents) => Ok(Some(contents)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(format!("failed to read {}: {err}", path.display())),
            }
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::{FilesystemArtifactReader, FilesystemArtifactWriter};
    use quantsys_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};

    fn scratch(label: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("quantsys_{label}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn missing_config_snapshot_reads_as_none() {
        let dir = scratch("artifacts_snapshot");
        let writer = FilesystemArtifactWriter::new();
        let reader = FilesystemArtifactReader::new();
        writer.ensure_dir(&dir).expect("ensure dir");

        let snapshot = dir.join("config_snapshot.toml");
        assert!(!reader.exists(&snapshot));
        assert_eq!(reader.read_config_snapshot_toml(&snapshot), Ok(None));

        writer
            .write_config_snapshot_toml(&snapshot, "[run]\nrun_id = \"x\"\n")
            .expect("write snapshot");
        assert!(reader.exists(&snapshot));
        let contents = reader.read_config_snapshot_toml(&snapshot).expect("read");
        assert!(contents.is_some_and(|toml| toml.contains("run_id")));
        assert!(!reader.exists(&dir), "directories are not artifacts");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn write_errors_name_the_file() {
        let dir = scratch("artifacts_missing_dir");
        let err = FilesystemArtifactWriter::new()
            .write_json(&dir.join("nested").join("kpis.json"), &serde_json::json!({}))
            .expect_err("parent dir is missing");
        assert!(err.contains("kpis.json"));
    }
}
