//! Allure `*-result.json` documents.
//!
//! One result file describes exactly one test. The suite is taken from the
//! package of the test class: for `com.shop.accounts.LoginTest` the folder is
//! `accounts`.

use serde_json::Value;

use super::{
    FieldMap, ReportError, ReportFormat, ReportModel, ReportResult, ReportType, array_field,
    non_empty_str_field, optional_array, scalar_text, str_field,
};

const LABELS: &str = "labels";
const TEST_CLASS_LABEL: &str = "testClass";
const TAG_LABEL: &str = "tag";
const STATUS_DETAILS: &str = "statusDetails";
const LINK_NAME: &str = "name";

const SKIPPED_MARKER: &str = "skipped";

/// Adapter for Allure result files.
#[derive(Debug, Clone, Default)]
pub struct AllureAdapter {
    /// Only results carrying a `tag` label equal to this (ignoring case) are kept.
    tag_filter: Option<String>,
}

impl AllureAdapter {
    /// Creates an adapter, optionally restricted to one tag.
    pub fn new(tag_filter: Option<String>) -> Self {
        Self { tag_filter }
    }

    fn label_values<'a>(labels: &'a [Value], name: &'a str) -> impl Iterator<Item = &'a str> {
        labels
            .iter()
            .filter(move |l| l.get("name").and_then(Value::as_str) == Some(name))
            .filter_map(|l| l.get("value").and_then(Value::as_str))
    }

    fn has_tag(&self, labels: &[Value]) -> bool {
        match &self.tag_filter {
            None => true,
            Some(wanted) => Self::label_values(labels, TAG_LABEL)
                .any(|tag| tag.trim().eq_ignore_ascii_case(wanted.trim())),
        }
    }

    /// Second-to-last segment of the `testClass` label.
    fn folder_name(labels: &[Value]) -> ReportResult<String> {
        let field = format!("{}[{}]", LABELS, TEST_CLASS_LABEL);
        let class = Self::label_values(labels, TEST_CLASS_LABEL)
            .last()
            .ok_or_else(|| ReportError::MissingField(field.clone()))?;
        let segments: Vec<&str> = class.split('.').collect();
        match segments.len().checked_sub(2).map(|i| segments[i].trim()) {
            Some(folder) if !folder.is_empty() => Ok(folder.to_string()),
            _ => Err(ReportError::InvalidField {
                field,
                expected: "a package-qualified class name",
            }),
        }
    }

    fn stack_trace(doc: &Value) -> Option<String> {
        let details = doc.get(STATUS_DETAILS)?;
        let message = details.get("message").and_then(scalar_text);
        let trace = details.get("trace").and_then(scalar_text);
        match (message, trace) {
            (Some(m), Some(t)) if t.contains(&m) => Some(t),
            (Some(m), Some(t)) => Some(format!("{}\n{}", m, t)),
            (m, t) => m.or(t),
        }
    }
}

impl ReportFormat for AllureAdapter {
    fn report_type(&self) -> ReportType {
        ReportType::Allure
    }

    fn parse(&self, doc: &Value, fields: &FieldMap) -> ReportResult<Vec<ReportModel>> {
        let raw_status = str_field(doc, &fields.status)?;
        if raw_status.contains(SKIPPED_MARKER) {
            return Ok(Vec::new());
        }

        let labels = array_field(doc, LABELS)?;
        if !self.has_tag(labels) {
            return Ok(Vec::new());
        }

        let status = fields.outcome_for(raw_status, ReportType::Allure)?;
        let folder_name = Self::folder_name(labels)?;
        let title = non_empty_str_field(doc, &fields.test_case_title)?;

        let steps = optional_array(doc, &fields.test_steps)?
            .iter()
            .map(|step| str_field(step, "name").map(str::to_string))
            .collect::<ReportResult<Vec<_>>>()?;

        let links = optional_array(doc, &fields.linked_items)?
            .iter()
            .map(|link| str_field(link, LINK_NAME).map(str::to_string))
            .collect::<ReportResult<Vec<_>>>()
            .map_err(|e| e.nested(&fields.linked_items))?;

        let model = ReportModel::new(folder_name, title, status)
            .with_steps(steps)
            .with_linked_items(links)
            .with_stack_trace(Self::stack_trace(doc));

        Ok(vec![model])
    }
}
