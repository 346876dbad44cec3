//! Configuration schema definitions for resultsync.
//!
//! This module defines the configuration types deserialized from
//! `resultsync.toml`. Every required setting is optional at this level
//! because it may also come from the environment; validation into
//! [`PublishSettings`](super::PublishSettings) happens afterwards.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── SyncConfig     - Chunking, retries, timeouts, run name
//! ├── ReportConfig   - Report type, input directory, status overrides
//! └── RemoteConfig   - Azure DevOps organization, project, plan, credentials
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::format::{Outcome, ReportType};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [sync]
/// chunk_size = 10
/// max_retries = 3
///
/// [report]
/// type = "serenity"
/// input_dir = "target/site/serenity"
///
/// [remote]
/// organization = "contoso"
/// project = "shop"
/// test_plan_id = 1201
/// test_suite_parent_id = 1202
/// user_name = "ci-bot"
/// ```
///
/// # Example
///
/// ```
/// use resultsync::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [report]
///     type = "allure"
///     input_dir = "allure-results"
/// "#).unwrap();
///
/// assert_eq!(config.sync.chunk_size, 10);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Pipeline settings (chunking, retries, timeouts).
    #[serde(default)]
    pub sync: SyncConfig,

    /// Which reports to read and where.
    #[serde(default)]
    pub report: ReportConfig,

    /// Remote test-management system.
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Pipeline execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `chunk_size` | 10 |
/// | `max_retries` | 3 |
/// | `retry_backoff_ms` | 500 |
/// | `request_timeout_secs` | 60 |
/// | `deadline_secs` | None (no deadline) |
/// | `run_name` | `Branch: $BRANCH_NAME (<date>)` or `resultsync (<date>)` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Number of report files per concurrently processed chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Total attempts per remote call, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry; doubled on each further retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Timeout for a single remote call attempt.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Upper bound on processing all chunks.
    ///
    /// When exceeded the pipeline aborts and the run is left in progress.
    pub deadline_secs: Option<u64>,

    /// Name of the test run created in the remote system.
    pub run_name: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
            deadline_secs: None,
            run_name: None,
        }
    }
}

fn default_chunk_size() -> usize {
    10
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    60
}

/// Report input settings.
///
/// # Example
///
/// ```toml
/// [report]
/// type = "allure"
/// input_dir = "build/allure-results"
/// tag_filter = "integration test"
///
/// [report.status_map]
/// unknown = "NotExecuted"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Report format: `serenity`, `allure` or `karate`.
    #[serde(rename = "type")]
    pub report_type: Option<ReportType>,

    /// Directory holding the report JSON files. `~` is expanded.
    pub input_dir: Option<PathBuf>,

    /// Only publish Allure results carrying this `tag` label.
    pub tag_filter: Option<String>,

    /// Extra or replacement entries for the format's status table.
    #[serde(default)]
    pub status_map: BTreeMap<String, Outcome>,
}

/// Azure DevOps connection settings.
///
/// Credentials are usually supplied through the environment rather than
/// committed to the file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// API host.
    ///
    /// Default: `https://dev.azure.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// REST API version sent in the `Accept` header.
    ///
    /// Default: `7.0`
    #[serde(default = "default_api_version")]
    pub api_version: String,

    pub organization: Option<String>,

    /// Project name or ID.
    pub project: Option<String>,

    /// Test plan that owns the suites.
    pub test_plan_id: Option<u64>,

    /// Suite under which one child suite per folder is kept.
    pub test_suite_parent_id: Option<u64>,

    pub user_name: Option<String>,

    /// Personal access token.
    pub token: Option<String>,

    /// Work item fields set on newly created test cases.
    ///
    /// Default: `System.State = "Design"`. Projects tracking automation
    /// status typically add `Custom.Testautomationstatus = "Automated"`.
    #[serde(default = "default_test_case_fields")]
    pub test_case_fields: BTreeMap<String, String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            organization: None,
            project: None,
            test_plan_id: None,
            test_suite_parent_id: None,
            user_name: None,
            token: None,
            test_case_fields: default_test_case_fields(),
        }
    }
}

fn default_base_url() -> String {
    "https://dev.azure.com".to_string()
}

fn default_api_version() -> String {
    "7.0".to_string()
}

fn default_test_case_fields() -> BTreeMap<String, String> {
    BTreeMap::from([("System.State".to_string(), "Design".to_string())])
}
