use super::types::RunReport;
use crate::runner::state::{Outcome, ScenarioResult};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Generate a JUnit XML document: one testsuite per run, one testcase per
/// scenario. Failed scenarios get `<failure>`, errored ones `<error>`.
pub fn generate_junit_xml(report: &RunReport) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let tests = report.summary.total.to_string();
    let failures = report.summary.failed.to_string();
    let errors = report.summary.errored.to_string();
    let time = seconds(report.duration_ms);

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "e2e-runner"));
    suites_start.push_attribute(("tests", tests.as_str()));
    suites_start.push_attribute(("failures", failures.as_str()));
    suites_start.push_attribute(("errors", errors.as_str()));
    suites_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", "e2e"));
    suite_start.push_attribute(("id", report.run_id.as_str()));
    suite_start.push_attribute(("tests", tests.as_str()));
    suite_start.push_attribute(("failures", failures.as_str()));
    suite_start.push_attribute(("errors", errors.as_str()));
    suite_start.push_attribute(("skipped", "0"));
    suite_start.push_attribute(("time", time.as_str()));
    suite_start.push_attribute(("timestamp", report.started_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for scenario in &report.scenarios {
        write_test_case(&mut writer, scenario)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, scenario: &ScenarioResult) -> Result<()> {
    let classname = scenario
        .source
        .trim_end_matches(".yaml")
        .trim_end_matches(".yml")
        .replace(['/', '\\'], ".");
    let time = seconds(scenario.duration_ms);

    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", scenario.scenario_id.as_str()));
    case_start.push_attribute(("classname", classname.as_str()));
    case_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(case_start))?;

    let (element, kind) = match &scenario.outcome {
        Outcome::Failed { kind, .. } => (Some("failure"), kind.as_str()),
        Outcome::Errored { .. } => (Some("error"), "Infrastructure"),
        _ => (None, ""),
    };
    if let (Some(element), Some(reason)) = (element, scenario.outcome.reason()) {
        let mut start = BytesStart::new(element);
        start.push_attribute(("message", reason));
        start.push_attribute(("type", kind));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&attempt_details(scenario))))?;
        writer.write_event(Event::End(BytesEnd::new(element)))?;
    }

    // Flaky scenarios pass, but the retries stay visible to CI
    if scenario.outcome == Outcome::FlakedThenPassed {
        let note = format!("passed on attempt {}", scenario.attempts.len());
        writer.write_event(Event::Start(BytesStart::new("system-out")))?;
        writer.write_event(Event::Text(BytesText::new(&note)))?;
        writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Per-attempt failure lines with artifact paths
fn attempt_details(scenario: &ScenarioResult) -> String {
    if scenario.attempts.is_empty() {
        return "no attempt was started".to_string();
    }
    let mut lines = Vec::new();
    for attempt in &scenario.attempts {
        match &attempt.failure {
            Some(failure) => lines.push(format!("attempt {}: {}", attempt.number, failure)),
            None => lines.push(format!("attempt {}: passed", attempt.number)),
        }
        if let Some(artifacts) = &attempt.artifacts {
            for path in artifacts.paths() {
                lines.push(format!("  {}", path));
            }
        }
    }
    lines.join("\n")
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(report: &RunReport, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(report)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    log::info!("JUnit report: {}", path.display());
    Ok(())
}
