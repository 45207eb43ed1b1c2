//! End-of-run console summary.

use super::types::RunReport;
use crate::runner::state::Outcome;
use colored::Colorize;
use std::fmt::Write;

/// Counts per outcome, then every non-passing scenario with its failure
/// kind, reason and artifact paths
pub fn render(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", "━━━ Run Summary ━━━".bold());
    let _ = writeln!(
        out,
        "  {} passed  {} flaked  {} failed  {} errored  ({} scenarios in {:.1}s)",
        s.passed.to_string().green().bold(),
        s.flaked.to_string().yellow().bold(),
        s.failed.to_string().red().bold(),
        s.errored.to_string().magenta().bold(),
        s.total,
        report.duration_ms as f64 / 1000.0
    );

    for scenario in &report.scenarios {
        if scenario.outcome == Outcome::FlakedThenPassed {
            let _ = writeln!(
                out,
                "  {} {} passed after {} attempts",
                "~".yellow(),
                scenario.scenario_id,
                scenario.attempts.len()
            );
        }
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        let _ = writeln!(out, "\n{}", "Failures:".red().bold());
    }
    for scenario in failures {
        let kind = match &scenario.outcome {
            Outcome::Failed { kind, .. } => kind.as_str(),
            _ => "Infrastructure",
        };
        let _ = writeln!(
            out,
            "  {} {} [{}] ({})",
            "✗".red(),
            scenario.scenario_id.bold(),
            kind,
            scenario.source
        );
        if let Some(reason) = scenario.outcome.reason() {
            let _ = writeln!(out, "      {}", reason);
        }
        for artifacts in scenario.attempts.iter().filter_map(|a| a.artifacts.as_ref()) {
            for path in artifacts.paths() {
                let _ = writeln!(out, "      {} {}", "↳".dimmed(), path.cyan());
            }
        }
    }

    let verdict = if report.exit_code == 0 {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    let _ = writeln!(out, "\n  {} (exit code {})", verdict, report.exit_code);
    out
}

pub fn print(report: &RunReport) {
    print!("{}", render(report));
}
