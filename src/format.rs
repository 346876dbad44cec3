//! Report formats and the canonical test-result model.
//!
//! Every supported report producer writes JSON documents with its own shape.
//! This module turns those documents into one canonical [`ReportModel`] per
//! test case so the rest of the pipeline never sees a format-specific field.
//!
//! # Architecture
//!
//! ```text
//!   raw JSON document
//!          │
//!          ▼
//!   FormatAdapter::parse(&doc) ──► Vec<ReportModel>
//!          │                            │
//!   ┌──────┼───────────┐                ▼
//!   │      │           │         folder / name / steps /
//! Serenity Allure    Karate      linked issues / outcome
//! ```
//!
//! # Built-in Formats
//!
//! | Adapter | Producer | Cases per document |
//! |---------|----------|--------------------|
//! | [`serenity::SerenityAdapter`] | Serenity BDD `*.json` outcomes | one per data-table row, or one |
//! | [`allure::AllureAdapter`] | Allure `*-result.json` | one |
//! | [`karate::KarateAdapter`] | Karate feature JSON | one per scenario |
//!
//! Adapters are pure: they read the document and their [`FieldMap`], and
//! never talk to the remote system.

pub mod allure;
pub mod karate;
pub mod registry;
pub mod serenity;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::{RegisteredFormat, ReportRegistry, ReportType};

/// Result type for report parsing.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors raised while turning a report document into models.
///
/// These are data errors: the document is malformed for its declared format.
/// They are never retried and fail the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The document is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A field required by the format is absent.
    #[error("Missing required field `{0}`")]
    MissingField(String),

    /// A field is present but has the wrong JSON type.
    #[error("Field `{field}` should be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    /// A field that names a suite or case is present but empty.
    #[error("Field `{0}` is empty")]
    EmptyField(String),

    /// The raw status string has no entry in the format's status map.
    #[error("Status `{status}` is not mapped for {format} reports")]
    UnmappedStatus { status: String, format: ReportType },
}

impl ReportError {
    /// Prefixes the offending field with the object it was found in.
    pub(crate) fn nested(self, parent: &str) -> Self {
        match self {
            ReportError::MissingField(f) => ReportError::MissingField(format!("{}.{}", parent, f)),
            ReportError::EmptyField(f) => ReportError::EmptyField(format!("{}.{}", parent, f)),
            ReportError::InvalidField { field, expected } => ReportError::InvalidField {
                field: format!("{}.{}", parent, field),
                expected,
            },
            other => other,
        }
    }
}

/// The outcome recorded for a test case in the remote test run.
///
/// Serialized with the exact names the remote results API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    /// The case ran and passed.
    Passed,
    /// The case ran and failed or errored.
    Failed,
    /// The case was not executed (e.g. skipped or pending steps).
    NotExecuted,
    /// The case does not apply to this run.
    NotApplicable,
}

impl Outcome {
    /// Returns the name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "Passed",
            Outcome::Failed => "Failed",
            Outcome::NotExecuted => "NotExecuted",
            Outcome::NotApplicable => "NotApplicable",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed test case, independent of the report format it came from.
///
/// # Example
///
/// ```
/// use resultsync::format::{Outcome, ReportModel};
///
/// let model = ReportModel::new("Checkout", "Pay", Outcome::Passed)
///     .with_steps(["click pay", "confirm"])
///     .with_linked_items(["SHOP-12"]);
///
/// assert_eq!(model.test_steps.len(), 2);
/// assert!(model.linked_items.contains("SHOP-12"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportModel {
    /// Name of the suite the case belongs to, directly under the parent suite.
    pub folder_name: String,

    /// Case title, including data-table parameter suffixes.
    pub test_case_name: String,

    /// Ordered step descriptions.
    pub test_steps: Vec<String>,

    /// External issue identifiers the case verifies.
    pub linked_items: BTreeSet<String>,

    /// Mapped outcome.
    pub status: Outcome,

    /// Failure detail for failed cases, if the document carries one.
    pub stack_trace: Option<String>,
}

impl ReportModel {
    /// Creates a model with no steps, issues or failure detail.
    pub fn new(
        folder_name: impl Into<String>,
        test_case_name: impl Into<String>,
        status: Outcome,
    ) -> Self {
        Self {
            folder_name: folder_name.into(),
            test_case_name: test_case_name.into(),
            test_steps: Vec::new(),
            linked_items: BTreeSet::new(),
            status,
            stack_trace: None,
        }
    }

    /// Sets the step descriptions.
    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.test_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds linked issue identifiers.
    pub fn with_linked_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_items.extend(items.into_iter().map(Into::into));
        self
    }

    /// Sets the failure detail. Ignored unless the case failed.
    pub fn with_stack_trace(mut self, trace: Option<String>) -> Self {
        if self.status == Outcome::Failed {
            self.stack_trace = trace.filter(|t| !t.is_empty());
        }
        self
    }
}

/// How report files are recognised in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    /// File name contains the marker anywhere.
    Contains(String),
    /// File name ends with the marker.
    EndsWith(String),
}

impl FileFilter {
    /// Returns `true` if a file with this name should be processed.
    pub fn matches(&self, file_name: &str) -> bool {
        match self {
            FileFilter::Contains(marker) => file_name.contains(marker.as_str()),
            FileFilter::EndsWith(marker) => file_name.ends_with(marker.as_str()),
        }
    }
}

impl fmt::Display for FileFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFilter::Contains(marker) => write!(f, "*{}*", marker),
            FileFilter::EndsWith(marker) => write!(f, "*{}", marker),
        }
    }
}

/// Field names and status table for one report format.
///
/// Adapters never hard-code the document keys listed here; they read them
/// through the map so a registry entry fully describes a format.
#[derive(Debug, Clone)]
pub struct FieldMap {
    /// Which files in the input directory belong to this format.
    pub file_filter: FileFilter,

    /// Key holding the case title.
    pub test_case_title: String,

    /// Key holding the step list.
    pub test_steps: String,

    /// Key holding the raw status.
    pub status: String,

    /// Key holding linked issues (or tags carrying them).
    pub linked_items: String,

    /// Raw status string to outcome.
    pub status_map: BTreeMap<String, Outcome>,
}

impl FieldMap {
    /// Maps a raw status through the status table.
    ///
    /// Unknown statuses are a data error rather than a silent default.
    pub fn outcome_for(&self, raw: &str, format: ReportType) -> ReportResult<Outcome> {
        self.status_map
            .get(raw)
            .copied()
            .ok_or_else(|| ReportError::UnmappedStatus {
                status: raw.to_string(),
                format,
            })
    }
}

/// Parses a raw report document into canonical models.
///
/// Implementations must be pure: the same document and field map always
/// produce the same models, and no I/O happens.
pub trait ReportFormat: Send + Sync {
    /// The report type handled by this implementation.
    fn report_type(&self) -> ReportType;

    /// Converts one document into zero or more models.
    ///
    /// Zero models is a valid outcome (e.g. the document was skipped).
    fn parse(&self, document: &Value, fields: &FieldMap) -> ReportResult<Vec<ReportModel>>;
}

/// Closed set of report formats, dispatched to one [`ReportFormat`] each.
#[derive(Debug, Clone)]
pub enum FormatAdapter {
    Serenity(serenity::SerenityAdapter),
    Allure(allure::AllureAdapter),
    Karate(karate::KarateAdapter),
}

impl FormatAdapter {
    fn inner(&self) -> &dyn ReportFormat {
        match self {
            FormatAdapter::Serenity(a) => a,
            FormatAdapter::Allure(a) => a,
            FormatAdapter::Karate(a) => a,
        }
    }
}

impl ReportFormat for FormatAdapter {
    fn report_type(&self) -> ReportType {
        self.inner().report_type()
    }

    fn parse(&self, document: &Value, fields: &FieldMap) -> ReportResult<Vec<ReportModel>> {
        self.inner().parse(document, fields)
    }
}

// Document accessors shared by the adapters.

pub(crate) fn field<'a>(doc: &'a Value, key: &str) -> ReportResult<&'a Value> {
    match doc.get(key) {
        Some(Value::Null) | None => Err(ReportError::MissingField(key.to_string())),
        Some(v) => Ok(v),
    }
}

pub(crate) fn str_field<'a>(doc: &'a Value, key: &str) -> ReportResult<&'a str> {
    field(doc, key)?
        .as_str()
        .ok_or_else(|| ReportError::InvalidField {
            field: key.to_string(),
            expected: "a string",
        })
}

pub(crate) fn non_empty_str_field<'a>(doc: &'a Value, key: &str) -> ReportResult<&'a str> {
    let value = str_field(doc, key)?;
    if value.trim().is_empty() {
        return Err(ReportError::EmptyField(key.to_string()));
    }
    Ok(value)
}

pub(crate) fn array_field<'a>(doc: &'a Value, key: &str) -> ReportResult<&'a [Value]> {
    field(doc, key)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ReportError::InvalidField {
            field: key.to_string(),
            expected: "an array",
        })
}

/// Like [`array_field`] but an absent or null key yields an empty slice.
pub(crate) fn optional_array<'a>(doc: &'a Value, key: &str) -> ReportResult<&'a [Value]> {
    match doc.get(key) {
        Some(Value::Null) | None => Ok(&[]),
        Some(_) => array_field(doc, key),
    }
}

/// Renders a scalar JSON value the way a report author wrote it.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
