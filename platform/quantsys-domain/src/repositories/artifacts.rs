use crate::services::audit::AuditEvent;
use crate::services::engine::RejectedOrder;
use crate::services::performance::PerformanceSummary;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::fill::Fill;
use std::path::Path;

pub trait ArtifactWriter {
    fn ensure_dir(&self, path: &Path) -> Result<(), String>;
    fn write_trades_csv(&self, path: &Path, fills: &[Fill]) -> Result<(), String>;
    fn write_equity_csv(&self, path: &Path, points: &[EquityPoint]) -> Result<(), String>;
    fn write_rejected_orders_csv(
        &self,
        path: &Path,
        rejected: &[RejectedOrder],
    ) -> Result<(), String>;
    fn write_summary_json(
        &self,
        path: &Path,
        summary: &PerformanceSummary,
        meta: Option<&serde_json::Value>,
        config_snapshot: Option<&serde_json::Value>,
    ) -> Result<(), String>;
    fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<(), String>;
    fn write_audit_jsonl(&self, path: &Path, events: &[AuditEvent]) -> Result<(), String>;
    fn write_config_snapshot_toml(&self, path: &Path, contents: &str) -> Result<(), String>;
}

pub trait ArtifactReader {
    fn read_trades_csv(&self, path: &Path) -> Result<Vec<Fill>, String>;
    fn read_equity_csv(&self, path: &Path) -> Result<Vec<EquityPoint>, String>;
    fn read_config_snapshot_toml(&self, path: &Path) -> Result<Option<String>, String>;
    fn exists(&self, path: &Path) -> bool;
}
