//! Report type selection.
//!
//! The registry is the only place that knows which adapter, file filter and
//! status table belong to a report type. Everything downstream receives a
//! [`RegisteredFormat`] and stays format-agnostic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::allure::AllureAdapter;
use super::karate::KarateAdapter;
use super::serenity::SerenityAdapter;
use super::{FieldMap, FileFilter, FormatAdapter, Outcome};
use crate::config::ConfigError;

/// Supported report producers.
///
/// Accepts both the short names and the `*Report` spellings.
///
/// ```
/// use resultsync::format::ReportType;
///
/// assert_eq!("serenity".parse::<ReportType>().unwrap(), ReportType::Serenity);
/// assert_eq!("AllureReport".parse::<ReportType>().unwrap(), ReportType::Allure);
/// assert!("junit".parse::<ReportType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    #[serde(alias = "SerenityReport")]
    Serenity,
    #[serde(alias = "AllureReport")]
    Allure,
    #[serde(alias = "KarateReport")]
    Karate,
}

impl ReportType {
    /// All supported report types.
    pub const ALL: [ReportType; 3] = [ReportType::Serenity, ReportType::Allure, ReportType::Karate];

    /// The short configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Serenity => "serenity",
            ReportType::Allure => "allure",
            ReportType::Karate => "karate",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "serenity" | "SerenityReport" => Ok(ReportType::Serenity),
            "allure" | "AllureReport" => Ok(ReportType::Allure),
            "karate" | "KarateReport" => Ok(ReportType::Karate),
            other => Err(ConfigError::UnsupportedReportType(other.to_string())),
        }
    }
}

/// An adapter together with the field map it parses with.
#[derive(Debug, Clone)]
pub struct RegisteredFormat {
    pub adapter: FormatAdapter,
    pub fields: FieldMap,
}

impl RegisteredFormat {
    /// The report type of the adapter.
    pub fn report_type(&self) -> ReportType {
        use super::ReportFormat;
        self.adapter.report_type()
    }

    /// Overrides or extends the status table.
    pub fn with_status_overrides(mut self, overrides: &BTreeMap<String, Outcome>) -> Self {
        self.fields
            .status_map
            .extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }
}

/// Looks up adapters by report type.
pub struct ReportRegistry;

impl ReportRegistry {
    /// Resolves a report type identifier.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedReportType`] for anything outside the closed
    /// set, so the pipeline never starts without an adapter.
    pub fn lookup(identifier: &str) -> Result<RegisteredFormat, ConfigError> {
        let report_type: ReportType = identifier.parse()?;
        Ok(Self::get(report_type, None))
    }

    /// Returns the adapter and default field map for a report type.
    ///
    /// `tag_filter` restricts Allure results to those carrying a matching
    /// `tag` label; it is ignored by the other formats.
    pub fn get(report_type: ReportType, tag_filter: Option<&str>) -> RegisteredFormat {
        match report_type {
            ReportType::Serenity => RegisteredFormat {
                adapter: FormatAdapter::Serenity(SerenityAdapter),
                fields: FieldMap {
                    file_filter: FileFilter::Contains("json".into()),
                    test_case_title: "title".into(),
                    test_steps: "testSteps".into(),
                    status: "result".into(),
                    linked_items: "coreIssues".into(),
                    status_map: status_map(&[
                        ("SUCCESS", Outcome::Passed),
                        ("ERROR", Outcome::Failed),
                        ("FAILURE", Outcome::Failed),
                        ("COMPROMISED", Outcome::Failed),
                        ("SKIPPED", Outcome::NotExecuted),
                        ("PENDING", Outcome::NotExecuted),
                    ]),
                },
            },
            ReportType::Allure => RegisteredFormat {
                adapter: FormatAdapter::Allure(AllureAdapter::new(tag_filter.map(str::to_string))),
                fields: FieldMap {
                    file_filter: FileFilter::EndsWith("result.json".into()),
                    test_case_title: "name".into(),
                    test_steps: "steps".into(),
                    status: "status".into(),
                    linked_items: "links".into(),
                    status_map: status_map(&[
                        ("passed", Outcome::Passed),
                        ("failed", Outcome::Failed),
                        ("broken", Outcome::Failed),
                        ("unknown", Outcome::NotApplicable),
                    ]),
                },
            },
            ReportType::Karate => RegisteredFormat {
                adapter: FormatAdapter::Karate(KarateAdapter::new()),
                fields: FieldMap {
                    file_filter: FileFilter::EndsWith(".json".into()),
                    test_case_title: "name".into(),
                    test_steps: "stepResults".into(),
                    status: "failed".into(),
                    linked_items: "tags".into(),
                    // Outcome is derived from the boolean `failed` flag.
                    status_map: BTreeMap::new(),
                },
            },
        }
    }
}

fn status_map(entries: &[(&str, Outcome)]) -> BTreeMap<String, Outcome> {
    entries
        .iter()
        .map(|(raw, outcome)| (raw.to_string(), *outcome))
        .collect()
}
