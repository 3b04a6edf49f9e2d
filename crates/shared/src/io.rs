use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::RunReport;

/// Get the default directory for storing run reports
pub fn get_default_runs_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("paper-triage")
        .join("runs");

    fs::create_dir_all(&data_dir).context("Failed to create runs directory")?;

    Ok(data_dir)
}

pub fn report_filename(started_at: DateTime<Utc>) -> String {
    format!("run-{}.json", started_at.format("%Y%m%d-%H%M%S"))
}

/// Save a run report as pretty JSON in `dir`
pub fn save_report_to(dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let filepath = dir.join(report_filename(report.started_at));

    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;

    fs::write(&filepath, json)
        .with_context(|| format!("Failed to write run report: {}", filepath.display()))?;

    Ok(filepath)
}

/// Save a run report in the default runs directory
pub fn save_report(report: &RunReport) -> Result<PathBuf> {
    let runs_dir = get_default_runs_dir()?;
    save_report_to(&runs_dir, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_report_filename() {
        let date = Utc.with_ymd_and_hms(2025, 7, 3, 6, 5, 4).unwrap();
        assert_eq!(report_filename(date), "run-20250703-060504.json");
    }

    #[test]
    fn test_save_report_to_writes_json() {
        let dir = std::env::temp_dir().join(format!("paper-triage-runs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut report = RunReport::new(true);
        report.started_at = Utc.with_ymd_and_hms(2025, 7, 3, 6, 5, 4).unwrap();
        report.related = 2;
        report.final_model = Some("gemini-2.5-flash".to_string());

        let path = save_report_to(&dir, &report).unwrap();
        assert_eq!(path, dir.join("run-20250703-060504.json"));

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["started_at"], "2025-07-03T06:05:04Z");
        assert_eq!(saved["dry_run"], true);
        assert_eq!(saved["related"], 2);
        assert_eq!(saved["final_model"], "gemini-2.5-flash");

        fs::remove_dir_all(&dir).unwrap();
    }
}
