use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A parsed end-to-end scenario. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// Unique within a run; defaults to the file stem
    pub id: String,

    pub description: Option<String>,

    /// File the scenario was loaded from
    pub source: PathBuf,

    pub tags: Vec<String>,

    /// Whole-attempt timeout; the harness default applies when unset
    pub timeout_ms: Option<u64>,

    /// Values substituted for `${NAME}` in step arguments
    pub vars: BTreeMap<String, String>,

    pub steps: Vec<Step>,

    /// Conditions that must all hold once the last step has run
    pub expect: Vec<Condition>,
}

impl Scenario {
    /// True when no filter is given or the scenario carries any requested tag
    pub fn matches_tags(&self, wanted: &[String]) -> bool {
        wanted.is_empty() || wanted.iter().any(|t| self.tags.contains(t))
    }
}

/// One browser-driven action, written in YAML as a single-key map
/// (`- click: "button.borrow"`). Dispatched by a single exhaustive match in
/// the scenario runner.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Navigate to a URL; relative URLs resolve against the service base URL
    Navigate(String),
    /// Click the first element matching a selector
    Click(String),
    Fill(FillParams),
    WaitFor(WaitParams),
    Assert(Condition),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FillParams {
    pub selector: String,
    pub value: String,
}

/// A condition plus an optional override of the wait timeout
#[derive(Debug, Clone, PartialEq)]
pub struct WaitParams {
    pub condition: Condition,
    pub timeout_ms: Option<u64>,
}

/// Observable page state checked by `waitFor`, `assert` and `expect`
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Visible(String),
    Hidden(String),
    UrlMatches(String),
    TextContains(TextContainsParams),
    TitleContains(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextContainsParams {
    pub selector: String,
    pub text: String,
}

impl Step {
    /// Short human-readable label used in events, traces and reports
    pub fn label(&self) -> String {
        match self {
            Step::Navigate(url) => format!("navigate {}", url),
            Step::Click(selector) => format!("click {}", selector),
            Step::Fill(p) => format!("fill {} = {:?}", p.selector, p.value),
            Step::WaitFor(p) => format!("waitFor {}", p.condition.describe()),
            Step::Assert(c) => format!("assert {}", c.describe()),
        }
    }
}

impl Condition {
    pub fn describe(&self) -> String {
        match self {
            Condition::Visible(s) => format!("visible({})", s),
            Condition::Hidden(s) => format!("hidden({})", s),
            Condition::UrlMatches(re) => format!("urlMatches(/{}/)", re),
            Condition::TextContains(p) => format!("textContains({}, {:?})", p.selector, p.text),
            Condition::TitleContains(t) => format!("titleContains({:?})", t),
        }
    }
}
