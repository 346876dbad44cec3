//! Serenity BDD test outcome documents.
//!
//! Serenity writes one JSON file per scenario. A scenario outline carries a
//! `dataTable` whose rows are the examples; each row gets its own group of
//! steps under `testSteps[row].children`.
//!
//! ```text
//! {
//!   "title": "Login",
//!   "result": "SUCCESS",
//!   "featureTag": { "name": "Accounts/Login" },
//!   "coreIssues": ["ACC-12"],
//!   "dataTable": { "rows": [ { "values": ["alice", "null"] } ] },
//!   "testSteps": [ { "description": "Example #1", "children": [ ... ] } ]
//! }
//! ```
//!
//! # Naming
//!
//! Each data-table row becomes a case named `"<title>: <v1>: <v2>"`, with
//! `null` values left out. A document without a data table is a single case
//! named after its title with the top-level steps.
//!
//! # Limitations
//!
//! Every row takes the top-level `result`, so one failing example marks all
//! examples of the outline as failed.

use serde_json::Value;

use super::{
    FieldMap, ReportError, ReportFormat, ReportModel, ReportResult, ReportType, field,
    non_empty_str_field, optional_array, scalar_text, str_field,
};

const FEATURE_TAG: &str = "featureTag";
const FEATURE_NAME: &str = "name";
const DATA_TABLE: &str = "dataTable";
const ROWS: &str = "rows";
const ROW_VALUES: &str = "values";
const STEP_DESCRIPTION: &str = "description";
const STEP_CHILDREN: &str = "children";
const FAILURE_CAUSE: &str = "testFailureCause";
const FAILURE_MESSAGE: &str = "testFailureMessage";

/// Raw statuses containing this marker are not published at all.
const IGNORED_MARKER: &str = "IGNORED";

/// Adapter for Serenity BDD outcome files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerenityAdapter;

impl SerenityAdapter {
    /// Folder is the first `/`-separated segment of the feature tag name.
    fn folder_name(doc: &Value) -> ReportResult<String> {
        let tag = field(doc, FEATURE_TAG)?;
        let name = non_empty_str_field(tag, FEATURE_NAME)
            .map_err(|e| e.nested(FEATURE_TAG))?;
        let folder = name.split('/').next().unwrap_or(name).trim();
        if folder.is_empty() {
            return Err(ReportError::EmptyField(format!("{}.{}", FEATURE_TAG, FEATURE_NAME)));
        }
        Ok(folder.to_string())
    }

    /// Appends every non-null row value to the base title.
    fn row_case_name(title: &str, row: &Value) -> ReportResult<String> {
        let values = optional_array(row, ROW_VALUES)?;
        let mut name = title.to_string();
        for text in values.iter().filter_map(scalar_text) {
            if text != "null" {
                name.push_str(": ");
                name.push_str(&text);
            }
        }
        Ok(name)
    }

    fn step_descriptions(steps: &[Value]) -> ReportResult<Vec<String>> {
        steps
            .iter()
            .map(|step| str_field(step, STEP_DESCRIPTION).map(str::to_string))
            .collect()
    }

    /// Failure detail from `testFailureCause`, falling back to the message.
    fn stack_trace(doc: &Value) -> Option<String> {
        if let Some(cause) = doc.get(FAILURE_CAUSE).filter(|c| c.is_object()) {
            let error_type = cause.get("errorType").and_then(Value::as_str).unwrap_or("Error");
            let message = cause.get("message").and_then(Value::as_str).unwrap_or_default();
            let mut trace = format!("{}: {}", error_type, message);
            let frames = cause
                .get("stackTrace")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for frame in frames {
                let class = frame.get("declaringClass").and_then(Value::as_str).unwrap_or("?");
                let method = frame.get("methodName").and_then(Value::as_str).unwrap_or("?");
                let file = frame.get("fileName").and_then(Value::as_str).unwrap_or("Unknown Source");
                match frame.get("lineNumber").and_then(Value::as_i64) {
                    Some(line) => trace.push_str(&format!("\n\tat {}.{}({}:{})", class, method, file, line)),
                    None => trace.push_str(&format!("\n\tat {}.{}({})", class, method, file)),
                }
            }
            return Some(trace);
        }
        doc.get(FAILURE_MESSAGE).and_then(scalar_text)
    }
}

impl ReportFormat for SerenityAdapter {
    fn report_type(&self) -> ReportType {
        ReportType::Serenity
    }

    fn parse(&self, doc: &Value, fields: &FieldMap) -> ReportResult<Vec<ReportModel>> {
        let raw_status = str_field(doc, &fields.status)?;
        if raw_status.contains(IGNORED_MARKER) {
            return Ok(Vec::new());
        }

        let status = fields.outcome_for(raw_status, ReportType::Serenity)?;
        let folder_name = Self::folder_name(doc)?;
        let title = non_empty_str_field(doc, &fields.test_case_title)?;
        let linked_items: Vec<String> = optional_array(doc, &fields.linked_items)?
            .iter()
            .filter_map(scalar_text)
            .collect();
        let stack_trace = Self::stack_trace(doc);
        let top_level_steps = optional_array(doc, &fields.test_steps)?;

        let rows = match doc.get(DATA_TABLE) {
            Some(table) if !table.is_null() => optional_array(table, ROWS)?,
            _ => &[],
        };

        let model = |name: String, steps: Vec<String>| {
            ReportModel::new(folder_name.clone(), name, status)
                .with_steps(steps)
                .with_linked_items(linked_items.iter().cloned())
                .with_stack_trace(stack_trace.clone())
        };

        if rows.is_empty() {
            let steps = Self::step_descriptions(top_level_steps)?;
            return Ok(vec![model(title.to_string(), steps)]);
        }

        rows.iter()
            .enumerate()
            .map(|(index, row)| -> ReportResult<ReportModel> {
                let name = Self::row_case_name(title, row)?;
                let steps = match top_level_steps.get(index) {
                    Some(group) => Self::step_descriptions(optional_array(group, STEP_CHILDREN)?)?,
                    None => Vec::new(),
                };
                Ok(model(name, steps))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Outcome, ReportRegistry};
    use serde_json::json;

    fn fields() -> FieldMap {
        ReportRegistry::get(ReportType::Serenity, None).fields
    }

    fn parse(doc: Value) -> ReportResult<Vec<ReportModel>> {
        SerenityAdapter.parse(&doc, &fields())
    }

    #[test]
    fn test_data_table_rows_become_named_cases() {
        let models = parse(json!({
            "title": "Login",
            "result": "SUCCESS",
            "featureTag": {"name": "Accounts/Login"},
            "dataTable": {"rows": [
                {"values": ["A", "null"]},
                {"values": ["B", "C"]}
            ]},
            "testSteps": [
                {"description": "Example 1", "children": [{"description": "open page"}]},
                {"description": "Example 2", "children": [
                    {"description": "open page"},
                    {"description": "submit"}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].test_case_name, "Login: A");
        assert_eq!(models[1].test_case_name, "Login: B: C");
        assert_eq!(models[0].test_steps, vec!["open page"]);
        assert_eq!(models[1].test_steps, vec!["open page", "submit"]);
        assert!(models.iter().all(|m| m.folder_name == "Accounts"));
        assert!(models.iter().all(|m| m.status == Outcome::Passed));
    }

    #[test]
    fn test_json_null_values_are_omitted() {
        let models = parse(json!({
            "title": "Search",
            "result": "SUCCESS",
            "featureTag": {"name": "Catalog"},
            "dataTable": {"rows": [{"values": [null, 3, "shoes"]}]},
            "testSteps": []
        }))
        .unwrap();

        assert_eq!(models[0].test_case_name, "Search: 3: shoes");
        assert!(models[0].test_steps.is_empty());
    }

    #[test]
    fn test_without_data_table_uses_flat_steps() {
        let models = parse(json!({
            "title": "Pay",
            "result": "SUCCESS",
            "featureTag": {"name": "Checkout/Payments"},
            "coreIssues": ["SHOP-1", "SHOP-2"],
            "testSteps": [
                {"description": "click pay", "children": [{"description": "nested"}]},
                {"description": "confirm"}
            ]
        }))
        .unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].test_case_name, "Pay");
        assert_eq!(models[0].folder_name, "Checkout");
        assert_eq!(models[0].test_steps, vec!["click pay", "confirm"]);
        assert_eq!(models[0].linked_items.len(), 2);
    }

    #[test]
    fn test_single_case_with_no_steps() {
        let models = parse(json!({
            "title": "Refund",
            "result": "FAILURE",
            "featureTag": {"name": "Checkout"},
            "testSteps": [],
            "testFailureCause": {
                "errorType": "java.lang.AssertionError",
                "message": "expected refund",
                "stackTrace": [
                    {"declaringClass": "steps.Refund", "methodName": "check", "fileName": "Refund.java", "lineNumber": 42}
                ]
            }
        }))
        .unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].status, Outcome::Failed);
        assert!(models[0].test_steps.is_empty());
        let trace = models[0].stack_trace.as_deref().unwrap();
        assert!(trace.starts_with("java.lang.AssertionError: expected refund"));
        assert!(trace.contains("at steps.Refund.check(Refund.java:42)"));
    }

    #[test]
    fn test_ignored_document_yields_nothing() {
        let models = parse(json!({
            "title": "Later",
            "result": "TEST_IGNORED",
            "featureTag": {"name": "Backlog"}
        }))
        .unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn test_every_mapped_status_round_trips() {
        let fields = fields();
        for (raw, outcome) in &fields.status_map {
            let doc = json!({
                "title": "Case",
                "result": raw,
                "featureTag": {"name": "Folder"}
            });
            let models = SerenityAdapter.parse(&doc, &fields).unwrap();
            assert_eq!(models.len(), 1, "status {}", raw);
            assert_eq!(models[0].status, *outcome, "status {}", raw);
        }
    }

    #[test]
    fn test_unmapped_status_is_data_error() {
        let err = parse(json!({
            "title": "Case",
            "result": "WEIRD",
            "featureTag": {"name": "Folder"}
        }))
        .unwrap_err();
        assert!(matches!(err, ReportError::UnmappedStatus { ref status, .. } if status == "WEIRD"));
    }

    #[test]
    fn test_missing_feature_tag_is_data_error() {
        let err = parse(json!({"title": "Case", "result": "SUCCESS"})).unwrap_err();
        assert!(matches!(err, ReportError::MissingField(ref f) if f == "featureTag"));

        let err = parse(json!({
            "title": "Case",
            "result": "SUCCESS",
            "featureTag": {"type": "feature"}
        }))
        .unwrap_err();
        assert!(matches!(err, ReportError::MissingField(ref f) if f == "featureTag.name"));
    }

    #[test]
    fn test_row_without_step_group_has_no_steps() {
        let models = parse(json!({
            "title": "Login",
            "result": "ERROR",
            "featureTag": {"name": "Accounts"},
            "dataTable": {"rows": [{"values": ["A"]}, {"values": ["B"]}]},
            "testSteps": [{"description": "Example 1", "children": [{"description": "go"}]}]
        }))
        .unwrap();

        assert_eq!(models.len(), 2);
        assert_eq!(models[1].test_steps.len(), 0);
        assert!(models.iter().all(|m| m.status == Outcome::Failed));
    }
}
