pub mod html;
pub mod json;
pub mod junit;
pub mod summary;
pub mod types;

pub use types::{RunReport, Summary};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write `report.json`, `junit.xml` and `report.html` under
/// `<output>/<runId>/` and return that directory
pub fn write_reports(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let dir = output_dir.join(&report.run_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    json::write_report(report, &dir)?;
    junit::write_report(report, &dir)?;
    html::write_report(report, &dir)?;
    Ok(dir)
}

/// Generate report from saved results
pub async fn generate_report(
    results_path: &Path,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let report = json::read_report(results_path)?;

    match format {
        "json" => json::generate(&report, output).await,
        "html" => html::generate(&report, output).await,
        "junit" => {
            let xml = junit::generate_junit_xml(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(path, xml)?;
                    println!("JUnit report saved to: {}", path.display());
                }
                None => println!("{}", xml),
            }
            Ok(())
        }
        "summary" => {
            summary::print(&report);
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}
