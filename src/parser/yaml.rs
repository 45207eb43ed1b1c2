use super::types::{Condition, FillParams, Scenario, Step, TextContainsParams, WaitParams};
use anyhow::{Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Header document of a scenario file (everything before the `---` line)
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, alias = "timeout")]
    timeout_ms: Option<u64>,
    #[serde(default, alias = "env")]
    vars: BTreeMap<String, Value>,
    #[serde(default)]
    expect: Vec<Value>,
    /// Single-document form: steps inside the header map
    #[serde(default)]
    steps: Option<Value>,
}

/// Parse a YAML scenario file
pub fn parse_scenario_file(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    parse_yaml_content(&content, path)
        .with_context(|| format!("Invalid scenario file: {}", path.display()))
}

/// Parse YAML content into a Scenario.
///
/// Two layouts are accepted: a header map, a `---` line and the step list; or
/// a single map with a `steps` key. A bare step list is also accepted.
pub fn parse_yaml_content(content: &str, source_path: &Path) -> Result<Scenario> {
    let (header, steps) = match split_documents(content) {
        Some((header_yaml, steps_yaml)) => {
            let header = parse_header(header_yaml)?;
            if header.steps.is_some() {
                anyhow::bail!("`steps` in the header conflicts with the step list after `---`");
            }
            (header, parse_steps(steps_yaml)?)
        }
        None => {
            let value: Value =
                serde_yaml::from_str(content).context("Failed to parse YAML content")?;
            match value {
                Value::Sequence(_) => (Header::default(), parse_steps_from_value(&value)?),
                Value::Mapping(_) => {
                    let mut header: Header =
                        serde_yaml::from_value(value).context("Failed to parse YAML header")?;
                    let steps = header
                        .steps
                        .take()
                        .ok_or_else(|| anyhow::anyhow!("Scenario has no `steps`"))?;
                    (header, parse_steps_from_value(&steps)?)
                }
                _ => anyhow::bail!("Invalid YAML format: expected step list or scenario map"),
            }
        }
    };

    let id = match header.id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string(),
    };

    let expect = header
        .expect
        .iter()
        .enumerate()
        .map(|(i, value)| parse_condition_value(value).with_context(|| format!("expect[{}]", i)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Scenario {
        id,
        description: header.description,
        source: source_path.to_path_buf(),
        tags: header.tags,
        timeout_ms: header.timeout_ms,
        vars: stringify_vars(header.vars),
        steps,
        expect,
    })
}

/// Split on the first line consisting solely of `---`. A marker that opens
/// the file (before any content) starts the only document and is skipped.
fn split_documents(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    let mut header_start = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &content[header_start..offset];
            if is_blank_yaml(header) && header_start == 0 {
                header_start = offset + line.len();
                offset = header_start;
                continue;
            }
            let body = &content[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Only whitespace and comments
fn is_blank_yaml(text: &str) -> bool {
    text.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with('#')
    })
}

fn parse_header(header: &str) -> Result<Header> {
    if header.trim().is_empty() {
        return Ok(Header::default());
    }
    serde_yaml::from_str(header).context("Failed to parse YAML header")
}

fn parse_steps(yaml: &str) -> Result<Vec<Step>> {
    if is_blank_yaml(yaml) {
        return Ok(Vec::new());
    }
    let value: Value = serde_yaml::from_str(yaml).context("Failed to parse YAML steps")?;
    parse_steps_from_value(&value)
}

/// Parse a step list
pub fn parse_steps_from_value(value: &Value) -> Result<Vec<Step>> {
    match value {
        Value::Sequence(seq) => seq
            .iter()
            .enumerate()
            .map(|(i, item)| parse_step_value(item).with_context(|| format!("step {}", i + 1)))
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => anyhow::bail!("Failed to parse YAML steps: expected a list of steps"),
    }
}

/// Parse one step, written as a single-key map like `- click: "a.borrow"`
pub fn parse_step_value(value: &Value) -> Result<Step> {
    let (name, params) = single_entry(value, "step")?;
    let step = match name {
        "navigate" => Step::Navigate(string_param(name, params)?),
        "click" => Step::Click(string_param(name, params)?),
        "fill" => Step::Fill(struct_param::<FillParams>(name, params)?),
        "waitFor" => Step::WaitFor(parse_wait_params(params)?),
        "assert" => Step::Assert(parse_condition_value(params)?),
        other => anyhow::bail!("Unknown step: {}", other),
    };
    Ok(step)
}

/// Parse one condition, written as a single-key map like `visible: ".flash"`
pub fn parse_condition_value(value: &Value) -> Result<Condition> {
    let (name, params) = single_entry(value, "condition")?;
    condition_with_params(name, params)
}

fn condition_with_params(name: &str, params: &Value) -> Result<Condition> {
    let condition = match name {
        "visible" => Condition::Visible(string_param(name, params)?),
        "hidden" | "notVisible" => Condition::Hidden(string_param(name, params)?),
        "urlMatches" => Condition::UrlMatches(string_param(name, params)?),
        "textContains" => {
            Condition::TextContains(struct_param::<TextContainsParams>(name, params)?)
        }
        "titleContains" => Condition::TitleContains(string_param(name, params)?),
        other => anyhow::bail!("Unknown condition: {}", other),
    };
    Ok(condition)
}

/// `waitFor` takes one condition key plus an optional `timeoutMs`
fn parse_wait_params(params: &Value) -> Result<WaitParams> {
    let map = params
        .as_mapping()
        .ok_or_else(|| anyhow::anyhow!("waitFor expects a condition map"))?;

    let mut timeout_ms = None;
    let mut condition = None;
    for (key, value) in map {
        let key = key
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("waitFor keys must be strings"))?;
        match key {
            "timeoutMs" | "timeout" => {
                timeout_ms = Some(value.as_u64().ok_or_else(|| {
                    anyhow::anyhow!("waitFor.{} must be a non-negative integer", key)
                })?);
            }
            name => {
                if condition.is_some() {
                    anyhow::bail!("waitFor expects exactly one condition");
                }
                condition = Some(condition_with_params(name, value)?);
            }
        }
    }

    let condition = condition.ok_or_else(|| anyhow::anyhow!("waitFor is missing a condition"))?;
    Ok(WaitParams {
        condition,
        timeout_ms,
    })
}

fn single_entry<'a>(value: &'a Value, what: &str) -> Result<(&'a str, &'a Value)> {
    let map: &Mapping = match value {
        Value::Mapping(map) => map,
        Value::String(s) => anyhow::bail!("`{}` needs parameters", s),
        other => anyhow::bail!("Invalid {} format: {:?}", what, other),
    };
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, params)), None) => {
            let name = key
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("{} name must be a string", what))?;
            Ok((name, params))
        }
        _ => anyhow::bail!("Invalid {} format: expected single key mapping", what),
    }
}

fn string_param(name: &str, params: &Value) -> Result<String> {
    match params {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => anyhow::bail!("`{}` expects a string", name),
    }
}

fn struct_param<T: serde::de::DeserializeOwned>(name: &str, params: &Value) -> Result<T> {
    serde_yaml::from_value(params.clone()).with_context(|| format!("Invalid `{}` parameters", name))
}

fn stringify_vars(vars: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter_map(|(k, v)| {
            let s = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((k, s))
        })
        .collect()
}

/// Collect scenario files under `path` (a file or a directory), sorted by path
pub fn collect_scenario_files(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    files
}

/// Load every scenario under `path`, keep those matching `tags`, and reject
/// duplicate ids.
pub fn load_scenarios(path: &Path, tags: &[String]) -> Result<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();

    for file in collect_scenario_files(path) {
        let scenario = parse_scenario_file(&file)?;
        if let Some(previous) = seen.get(&scenario.id) {
            anyhow::bail!(
                "Duplicate scenario id '{}' in {} (already defined in {})",
                scenario.id,
                file.display(),
                previous.display()
            );
        }
        seen.insert(scenario.id.clone(), file);
        if scenario.matches_tags(tags) {
            scenarios.push(scenario);
        }
    }

    Ok(scenarios)
}
