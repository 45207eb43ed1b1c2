use super::types::RunReport;
use crate::runner::state::{Attempt, Outcome, ScenarioResult, StepStatus};
use anyhow::Result;
use std::path::Path;

/// Generate HTML report
pub async fn generate(report: &RunReport, output: Option<&Path>) -> Result<()> {
    let base = output.and_then(Path::parent);
    let html = generate_html(report, base);

    if let Some(path) = output {
        std::fs::write(path, html)?;
        println!("HTML report saved to: {}", path.display());
    } else {
        println!("{}", html);
    }

    Ok(())
}

/// Write `report.html` into `output_dir`, linking artifacts relative to it
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<()> {
    let path = output_dir.join("report.html");
    std::fs::write(&path, generate_html(report, Some(output_dir)))?;
    log::info!("HTML report: {}", path.display());
    Ok(())
}

/// Artifact path as seen from the directory holding the HTML file
fn link(path: &str, base: Option<&Path>) -> String {
    let relative = base
        .and_then(|b| Path::new(path).strip_prefix(b).ok())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| path.to_string());
    html_escape(&relative)
}

fn outcome_class(outcome: &Outcome) -> (&'static str, &'static str) {
    match outcome {
        Outcome::Passed => ("Passed", "passed"),
        Outcome::FlakedThenPassed => ("Flaked", "flaked"),
        Outcome::Failed { .. } => ("Failed", "failed"),
        Outcome::Errored { .. } => ("Errored", "errored"),
    }
}

fn render_attempt(attempt: &Attempt, base: Option<&Path>) -> String {
    let mut steps_html = String::new();
    for step in &attempt.steps {
        let (icon, class) = match step.status {
            StepStatus::Passed => ("✓", "passed"),
            StepStatus::Failed => ("✗", "failed"),
            StepStatus::Skipped => ("○", "skipped"),
        };
        let error_html = step
            .error
            .as_deref()
            .map(|e| format!(r#"<div class="error-message">{}</div>"#, html_escape(e)))
            .unwrap_or_default();
        steps_html.push_str(&format!(
            r#"
                <div class="step {class}">
                    <div class="step-icon">{icon}</div>
                    <div class="step-content">
                        <div class="step-name">{}</div>
                        <span class="duration">{}ms</span>
                        {error_html}
                    </div>
                </div>"#,
            html_escape(&step.label),
            step.duration_ms,
        ));
    }

    let failure_html = match &attempt.failure {
        Some(f) if attempt.steps.is_empty() || f.step_index.is_none() => format!(
            r#"<div class="error-message">{}</div>"#,
            html_escape(&f.to_string())
        ),
        _ => String::new(),
    };

    let artifacts_html = match &attempt.artifacts {
        Some(set) => {
            let mut links = String::new();
            if let Some(shot) = &set.screenshot {
                let src = link(shot, base);
                links.push_str(&format!(
                    r##"<a href="#" class="artifact-link" onclick="showScreenshot('{src}')">📸 Screenshot</a>"##
                ));
            }
            for (name, path) in [("Trace", &set.trace), ("Console", &set.console_log)] {
                if let Some(path) = path {
                    links.push_str(&format!(
                        r#"<a href="{}" class="artifact-link">{name}</a>"#,
                        link(path, base)
                    ));
                }
            }
            for error in &set.errors {
                links.push_str(&format!(
                    r#"<span class="capture-error">{}</span>"#,
                    html_escape(error)
                ));
            }
            format!(r#"<div class="artifacts">{links}</div>"#)
        }
        None => String::new(),
    };

    let backoff_html = if attempt.backoff_ms > 0 {
        format!(" · after {}ms backoff", attempt.backoff_ms)
    } else {
        String::new()
    };
    let class = if attempt.passed { "passed" } else { "failed" };

    format!(
        r#"
            <div class="attempt {class}">
                <div class="attempt-header">Attempt {} <span class="duration">{}{backoff_html}</span></div>
                {failure_html}
                {steps_html}
                {artifacts_html}
            </div>"#,
        attempt.number,
        format_duration(attempt.duration_ms),
    )
}

fn render_scenario(scenario: &ScenarioResult, base: Option<&Path>) -> String {
    let (status_text, status_class) = outcome_class(&scenario.outcome);
    let reason_html = scenario
        .outcome
        .reason()
        .map(|r| format!(r#"<div class="error-message">{}</div>"#, html_escape(r)))
        .unwrap_or_default();
    let attempts_html: String = scenario
        .attempts
        .iter()
        .map(|a| render_attempt(a, base))
        .collect();
    let tags_html: String = scenario
        .tags
        .iter()
        .map(|t| format!(r#"<span class="tag">{}</span>"#, html_escape(t)))
        .collect();

    format!(
        r#"
        <div class="scenario {status_class}">
            <div class="scenario-header">
                <h3>{} <span class="status-badge">{status_text}</span> {tags_html}</h3>
                <span class="duration">{} · {} attempt(s)</span>
            </div>
            <div class="scenario-body">
                <div class="source">{}</div>
                {reason_html}
                {attempts_html}
            </div>
        </div>"#,
        html_escape(&scenario.scenario_id),
        format_duration(scenario.duration_ms),
        scenario.attempts.len(),
        html_escape(&scenario.source),
    )
}

pub fn generate_html(report: &RunReport, base: Option<&Path>) -> String {
    let summary = &report.summary;
    let pass_rate = if summary.total > 0 {
        ((summary.passed + summary.flaked) as f64 / summary.total as f64 * 100.0) as u32
    } else {
        0
    };
    let scenarios_html: String = report
        .scenarios
        .iter()
        .map(|s| render_scenario(s, base))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>E2E Report - {run_id}</title>
    <style>
        :root {{
            --bg-primary: #0a0f1d;
            --bg-secondary: #141b2d;
            --bg-tertiary: #1f2937;
            --border: #374151;
            --text-primary: #f9fafb;
            --text-secondary: #9ca3af;
            --green: #10b981;
            --red: #ef4444;
            --yellow: #f59e0b;
            --orange: #f97316;
            --blue: #3b82f6;
        }}
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        body {{
            font-family: system-ui, -apple-system, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.5;
            padding: 3rem 1rem;
        }}
        .container {{ max-width: 1100px; margin: 0 auto; }}
        header {{ margin-bottom: 2rem; display: flex; justify-content: space-between; align-items: flex-end; }}
        h1 {{ font-size: 2rem; font-weight: 800; }}
        .summary {{
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(160px, 1fr));
            gap: 1rem;
            margin-bottom: 2rem;
        }}
        .stat {{ background: var(--bg-secondary); border: 1px solid var(--border); padding: 1.25rem; border-radius: 1rem; }}
        .stat-value {{ font-size: 2.25rem; font-weight: 800; }}
        .stat-label {{ color: var(--text-secondary); font-size: 0.8rem; text-transform: uppercase; letter-spacing: 0.05em; }}
        .stat.passed .stat-value {{ color: var(--green); }}
        .stat.flaked .stat-value {{ color: var(--yellow); }}
        .stat.failed .stat-value {{ color: var(--red); }}
        .stat.errored .stat-value {{ color: var(--orange); }}
        .progress-bar {{ background: var(--bg-secondary); height: 10px; border-radius: 5px; overflow: hidden; margin-bottom: 3rem; border: 1px solid var(--border); }}
        .progress-fill {{ height: 100%; background: var(--green); }}
        .scenario {{ background: var(--bg-secondary); border: 1px solid var(--border); border-radius: 1rem; margin-bottom: 1.5rem; overflow: hidden; }}
        .scenario-header {{ padding: 1.25rem; display: flex; justify-content: space-between; align-items: center; border-bottom: 1px solid var(--border); }}
        .scenario-header h3 {{ font-size: 1.125rem; display: flex; align-items: center; gap: 0.5rem; }}
        .scenario-body {{ padding: 1rem 1.25rem; }}
        .source {{ color: var(--text-secondary); font-family: monospace; font-size: 0.8rem; margin-bottom: 0.5rem; }}
        .status-badge, .tag {{ padding: 0.15rem 0.6rem; border-radius: 9999px; font-size: 0.7rem; font-weight: 600; text-transform: uppercase; }}
        .tag {{ background: var(--bg-tertiary); color: var(--text-secondary); text-transform: none; }}
        .scenario.passed .status-badge {{ background: rgba(16, 185, 129, 0.1); color: var(--green); }}
        .scenario.flaked .status-badge {{ background: rgba(245, 158, 11, 0.1); color: var(--yellow); }}
        .scenario.failed .status-badge {{ background: rgba(239, 68, 68, 0.1); color: var(--red); }}
        .scenario.errored .status-badge {{ background: rgba(249, 115, 22, 0.1); color: var(--orange); }}
        .attempt {{ border-left: 3px solid var(--border); padding-left: 1rem; margin: 1rem 0; }}
        .attempt.passed {{ border-color: var(--green); }}
        .attempt.failed {{ border-color: var(--red); }}
        .attempt-header {{ font-weight: 600; margin-bottom: 0.5rem; }}
        .step {{ display: flex; gap: 0.75rem; padding: 0.4rem 0; }}
        .step-icon {{ width: 1.5rem; text-align: center; }}
        .step.passed .step-icon {{ color: var(--green); }}
        .step.failed .step-icon {{ color: var(--red); }}
        .step.skipped {{ opacity: 0.5; }}
        .step-name {{ font-family: monospace; font-size: 0.9rem; }}
        .duration {{ color: var(--text-secondary); font-size: 0.75rem; }}
        .error-message {{
            background: rgba(239, 68, 68, 0.1);
            border: 1px solid rgba(239, 68, 68, 0.2);
            border-radius: 0.5rem;
            padding: 0.6rem;
            margin: 0.5rem 0;
            color: #fca5a5;
            font-family: monospace;
            font-size: 0.8rem;
            white-space: pre-wrap;
        }}
        .artifacts {{ display: flex; gap: 1rem; margin-top: 0.5rem; }}
        .artifact-link {{ color: var(--blue); font-size: 0.8rem; font-weight: 600; text-decoration: none; }}
        .artifact-link:hover {{ text-decoration: underline; }}
        .capture-error {{ color: var(--yellow); font-size: 0.75rem; }}
        .meta {{ margin-top: 3rem; padding-top: 1.5rem; border-top: 1px solid var(--border); color: var(--text-secondary); font-size: 0.8rem; display: flex; justify-content: center; gap: 2rem; }}
        #modal {{ display: none; position: fixed; z-index: 100; inset: 0; background: rgba(0, 0, 0, 0.9); padding: 2rem; align-items: center; justify-content: center; }}
        #modal img {{ max-width: 100%; max-height: 100%; border-radius: 0.5rem; }}
        #modal.active {{ display: flex; }}
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>E2E Run Report</h1>
            <div style="text-align: right;">
                <div class="duration">Run Duration</div>
                <div style="font-size: 1.25rem; font-weight: 700;">{duration}</div>
            </div>
        </header>

        <div class="summary">
            <div class="stat"><div class="stat-value">{total}</div><div class="stat-label">Scenarios</div></div>
            <div class="stat passed"><div class="stat-value">{passed}</div><div class="stat-label">Passed</div></div>
            <div class="stat flaked"><div class="stat-value">{flaked}</div><div class="stat-label">Flaked</div></div>
            <div class="stat failed"><div class="stat-value">{failed}</div><div class="stat-label">Failed</div></div>
            <div class="stat errored"><div class="stat-value">{errored}</div><div class="stat-label">Errored</div></div>
        </div>

        <div class="progress-bar"><div class="progress-fill" style="width: {pass_rate}%"></div></div>

        {scenarios_html}

        <div class="meta">
            <span>Run: {run_id}</span>
            <span>Workers: {workers}</span>
            <span>Seed: {seed}</span>
            <span>Started: {started_at}</span>
        </div>
    </div>

    <div id="modal" onclick="this.classList.remove('active')">
        <img id="modal-img" src="" alt="Screenshot">
    </div>

    <script>
        function showScreenshot(path) {{
            document.getElementById('modal-img').src = path;
            document.getElementById('modal').classList.add('active');
            event.preventDefault();
        }}
    </script>
</body>
</html>"#,
        run_id = html_escape(&report.run_id),
        duration = format_duration(report.duration_ms),
        total = summary.total,
        passed = summary.passed,
        flaked = summary.flaked,
        failed = summary.failed,
        errored = summary.errored,
        workers = report.workers,
        seed = report.seed,
        started_at = html_escape(&report.started_at),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60000;
        let seconds = (ms % 60000) as f64 / 1000.0;
        format!("{}m {:.0}s", minutes, seconds)
    }
}
