use super::types::RunReport;
use anyhow::{Context, Result};
use std::path::Path;

/// Serialize a report. Field order follows the struct definitions, so the
/// output is stable across runs and re-serialization.
pub fn to_json(report: &RunReport) -> Result<String> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}

pub fn read_report(path: &Path) -> Result<RunReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read results: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid results file: {}", path.display()))
}

/// Write `report.json` into `output_dir`
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("report.json");
    std::fs::write(&path, to_json(report)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("JSON report: {}", path.display());
    Ok(())
}

/// Generate JSON report
pub async fn generate(report: &RunReport, output: Option<&Path>) -> Result<()> {
    let json = to_json(report)?;

    if let Some(path) = output {
        std::fs::write(path, json)?;
        println!("JSON report saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::sample_report;

    #[test]
    fn test_reserialization_is_byte_identical() {
        let first = to_json(&sample_report()).unwrap();
        let parsed: RunReport = serde_json::from_str(&first).unwrap();
        assert_eq!(parsed, sample_report());
        assert_eq!(to_json(&parsed).unwrap(), first);
    }

    #[test]
    fn test_camel_case_fields_and_tagged_outcome() {
        let json = to_json(&sample_report()).unwrap();
        assert!(json.contains("\"runId\": \"run-1\""));
        assert!(json.contains("\"status\": \"flakedThenPassed\""));
        assert!(json.contains("\"kind\": \"assertionFailed\""));
        assert!(json.contains("\"backoffMs\": 500"));
        // absent artifacts are omitted, not null
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        write_report(&sample_report(), dir.path()).unwrap();
        let report = read_report(&dir.path().join("report.json")).unwrap();
        assert_eq!(report.summary.flaked, 1);
    }
}
