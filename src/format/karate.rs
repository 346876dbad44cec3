//! Karate feature result documents.
//!
//! Karate writes one JSON file per feature with a `scenarioResults` array.
//! Each scenario becomes its own case. Karate records a boolean `failed`
//! flag instead of a status string, so the outcome is binary.
//!
//! Issues are linked through scenario tags of the form `@issue=SHOP-12`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{
    FieldMap, Outcome, ReportError, ReportFormat, ReportModel, ReportResult, ReportType,
    array_field, non_empty_str_field, optional_array, scalar_text, str_field,
};

const RELATIVE_PATH: &str = "relativePath";
const SCENARIO_RESULTS: &str = "scenarioResults";
const STEP: &str = "step";
const STEP_TEXT: &str = "text";

static ISSUE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?issue=(\S+)$").expect("issue tag pattern is valid"));

/// Adapter for Karate feature results.
#[derive(Debug, Clone, Default)]
pub struct KarateAdapter;

impl KarateAdapter {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self
    }

    /// Folder is the second `/`-separated segment of the feature path.
    fn folder_name(doc: &Value) -> ReportResult<String> {
        let path = non_empty_str_field(doc, RELATIVE_PATH)?;
        path.split('/')
            .nth(1)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ReportError::InvalidField {
                field: RELATIVE_PATH.to_string(),
                expected: "a path with at least two segments",
            })
    }

    fn failed(scenario: &Value, key: &str) -> ReportResult<bool> {
        match scenario.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ReportError::InvalidField {
                field: key.to_string(),
                expected: "a boolean",
            }),
        }
    }

    /// Tags are plain strings in Karate output and `{ "name": .. }` objects
    /// in its cucumber-compatible output.
    fn issues(tags: &[Value]) -> Vec<String> {
        tags.iter()
            .filter_map(|tag| match tag {
                Value::Object(_) => tag.get("name").and_then(scalar_text),
                other => scalar_text(other),
            })
            .filter_map(|tag| {
                ISSUE_TAG
                    .captures(tag.trim())
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .collect()
    }

    /// `<prefix> <text>` of a step result. A step without text is malformed.
    fn step_text(step_result: &Value) -> ReportResult<String> {
        let step = step_result.get(STEP).filter(|s| s.is_object()).unwrap_or(step_result);
        let text = str_field(step, STEP_TEXT).map_err(|e| e.nested(STEP))?;
        match step.get("prefix").and_then(Value::as_str) {
            Some(prefix) if !prefix.is_empty() => Ok(format!("{} {}", prefix, text)),
            _ => Ok(text.to_string()),
        }
    }

    fn error_message(scenario: &Value, steps: &[Value]) -> Option<String> {
        scenario.get("error").and_then(scalar_text).or_else(|| {
            steps
                .iter()
                .filter_map(|s| s.get("result"))
                .find_map(|r| r.get("errorMessage").and_then(scalar_text))
        })
    }
}

impl ReportFormat for KarateAdapter {
    fn report_type(&self) -> ReportType {
        ReportType::Karate
    }

    fn parse(&self, doc: &Value, fields: &FieldMap) -> ReportResult<Vec<ReportModel>> {
        let folder_name = Self::folder_name(doc)?;

        array_field(doc, SCENARIO_RESULTS)?
            .iter()
            .map(|scenario| -> ReportResult<ReportModel> {
                let title = non_empty_str_field(scenario, &fields.test_case_title)?;
                let status = if Self::failed(scenario, &fields.status)? {
                    Outcome::Failed
                } else {
                    Outcome::Passed
                };
                let steps = optional_array(scenario, &fields.test_steps)?;
                let tags = optional_array(scenario, &fields.linked_items)?;
                let step_texts = steps
                    .iter()
                    .map(Self::step_text)
                    .collect::<ReportResult<Vec<_>>>()
                    .map_err(|e| e.nested(&fields.test_steps))?;

                Ok(ReportModel::new(folder_name.clone(), title, status)
                    .with_steps(step_texts)
                    .with_linked_items(Self::issues(tags))
                    .with_stack_trace(Self::error_message(scenario, steps)))
            })
            .collect()
    }
}
