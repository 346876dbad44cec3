//! Configuration loading, environment overrides and validation.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. `resultsync.toml` (optional), see [`schema`]
//! 2. Environment variables (names shared with the CI scripts that predate
//!    the config file, e.g. `AZURE_TOKEN`, `JSON_INPUT_PATH`)
//! 3. Command-line overrides applied by the binary
//!
//! The merged [`Config`] is then validated once into [`PublishSettings`] (or
//! [`ReportSettings`] for commands that never talk to the remote system).
//! Nothing below the binary reads the environment.

pub mod schema;

pub use schema::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::format::{Outcome, RegisteredFormat, ReportRegistry, ReportType};

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration problems. All of them are reported before any remote call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A required setting is absent from both file and environment.
    #[error("Missing required setting `{key}` (set it in the config file or via ${env})")]
    Missing {
        key: &'static str,
        env: &'static str,
    },

    #[error("Invalid value {value:?} for `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported report type `{0}` (expected one of: serenity, allure, karate)")]
    UnsupportedReportType(String),
}

/// Environment variables recognised by [`apply_env`].
pub mod env {
    pub const REPORT_TYPE: &str = "REPORT_TYPE";
    pub const INPUT_PATH: &str = "JSON_INPUT_PATH";
    pub const USER_NAME: &str = "AZURE_USER_NAME";
    pub const TOKEN: &str = "AZURE_TOKEN";
    pub const ORGANIZATION: &str = "AZURE_ORGANIZATION";
    pub const PROJECT: &str = "AZURE_PROJECT_ID";
    pub const TEST_PLAN_ID: &str = "AZURE_TEST_PLAN_ID";
    pub const TEST_SUITE_PARENT_ID: &str = "AZURE_TEST_SUITE_PARENT_ID";
    pub const MAX_RETRY: &str = "MAX_RETRY";
    pub const CHUNK_SIZE: &str = "CHUNK_SIZE";
    pub const BRANCH_NAME: &str = "BRANCH_NAME";
}

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or doesn't match the schema.
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Loads configuration from a TOML string.
///
/// ```
/// use resultsync::config::load_config_str;
/// use resultsync::format::ReportType;
///
/// let config = load_config_str(r#"
///     [report]
///     type = "karate"
///     input_dir = "target/karate-reports"
/// "#)?;
///
/// assert_eq!(config.report.report_type, Some(ReportType::Karate));
/// # Ok::<(), resultsync::config::ConfigError>(())
/// ```
pub fn load_config_str(content: &str) -> ConfigResult<Config> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<string>"),
        source: Box::new(source),
    })
}

/// Overlays environment variables onto a loaded configuration.
///
/// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
/// Empty values are ignored.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(env::REPORT_TYPE) {
        config.report.report_type = Some(v.parse()?);
    }
    if let Some(v) = get(env::INPUT_PATH) {
        config.report.input_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = get(env::USER_NAME) {
        config.remote.user_name = Some(v);
    }
    if let Some(v) = get(env::TOKEN) {
        config.remote.token = Some(v);
    }
    if let Some(v) = get(env::ORGANIZATION) {
        config.remote.organization = Some(v);
    }
    if let Some(v) = get(env::PROJECT) {
        config.remote.project = Some(v);
    }
    if let Some(v) = get(env::TEST_PLAN_ID) {
        config.remote.test_plan_id = Some(parse_number(env::TEST_PLAN_ID, &v)?);
    }
    if let Some(v) = get(env::TEST_SUITE_PARENT_ID) {
        config.remote.test_suite_parent_id = Some(parse_number(env::TEST_SUITE_PARENT_ID, &v)?);
    }
    if let Some(v) = get(env::MAX_RETRY) {
        config.sync.max_retries = parse_number(env::MAX_RETRY, &v)?;
    }
    if let Some(v) = get(env::CHUNK_SIZE) {
        config.sync.chunk_size = parse_number(env::CHUNK_SIZE, &v)?;
    }
    if config.sync.run_name.is_none()
        && let Some(branch) = get(env::BRANCH_NAME)
    {
        config.sync.run_name = Some(format!("Branch: {} ({})", branch, today()));
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Current date in `Mon Jan 01 2024` form.
fn today() -> String {
    chrono::Local::now().format("%a %b %d %Y").to_string()
}

/// Validated report input settings.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub report_type: ReportType,
    pub input_dir: PathBuf,
    pub tag_filter: Option<String>,
    pub status_overrides: BTreeMap<String, Outcome>,
}

impl ReportSettings {
    /// Resolves the adapter and field map for these settings.
    pub fn format(&self) -> RegisteredFormat {
        ReportRegistry::get(self.report_type, self.tag_filter.as_deref())
            .with_status_overrides(&self.status_overrides)
    }
}

/// Validated Azure DevOps settings.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_version: String,
    pub organization: String,
    pub project: String,
    pub test_plan_id: u64,
    pub test_suite_parent_id: u64,
    pub user_name: String,
    pub token: String,
    pub test_case_fields: BTreeMap<String, String>,
}

/// Everything the publishing pipeline needs, validated once at startup.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub report: ReportSettings,
    pub remote: RemoteSettings,
    pub run_name: String,
    pub chunk_size: usize,
    pub max_attempts: usize,
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    pub deadline: Option<Duration>,
}

impl Config {
    /// Validates the report section.
    pub fn report_settings(&self) -> ConfigResult<ReportSettings> {
        let report_type = self.report.report_type.ok_or(ConfigError::Missing {
            key: "report.type",
            env: env::REPORT_TYPE,
        })?;
        let input_dir = self.report.input_dir.as_ref().ok_or(ConfigError::Missing {
            key: "report.input_dir",
            env: env::INPUT_PATH,
        })?;
        let input_dir = PathBuf::from(shellexpand::tilde(&input_dir.to_string_lossy()).as_ref());

        Ok(ReportSettings {
            report_type,
            input_dir,
            tag_filter: self.report.tag_filter.clone(),
            status_overrides: self.report.status_map.clone(),
        })
    }

    /// Validates the remote section.
    pub fn remote_settings(&self) -> ConfigResult<RemoteSettings> {
        let remote = &self.remote;
        Ok(RemoteSettings {
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            api_version: remote.api_version.clone(),
            organization: required(&remote.organization, "remote.organization", env::ORGANIZATION)?,
            project: required(&remote.project, "remote.project", env::PROJECT)?,
            test_plan_id: remote.test_plan_id.ok_or(ConfigError::Missing {
                key: "remote.test_plan_id",
                env: env::TEST_PLAN_ID,
            })?,
            test_suite_parent_id: remote.test_suite_parent_id.ok_or(ConfigError::Missing {
                key: "remote.test_suite_parent_id",
                env: env::TEST_SUITE_PARENT_ID,
            })?,
            user_name: required(&remote.user_name, "remote.user_name", env::USER_NAME)?,
            token: required(&remote.token, "remote.token", env::TOKEN)?,
            test_case_fields: remote.test_case_fields.clone(),
        })
    }

    /// Validates everything needed to publish.
    pub fn publish_settings(&self) -> ConfigResult<PublishSettings> {
        let sync = &self.sync;
        if sync.chunk_size == 0 {
            return Err(invalid("sync.chunk_size", sync.chunk_size, "must be at least 1"));
        }
        if sync.max_retries == 0 {
            return Err(invalid("sync.max_retries", sync.max_retries, "must be at least 1"));
        }
        if sync.request_timeout_secs == 0 {
            return Err(invalid(
                "sync.request_timeout_secs",
                sync.request_timeout_secs,
                "must be at least 1",
            ));
        }

        Ok(PublishSettings {
            report: self.report_settings()?,
            remote: self.remote_settings()?,
            run_name: sync
                .run_name
                .clone()
                .unwrap_or_else(|| format!("resultsync ({})", today())),
            chunk_size: sync.chunk_size,
            max_attempts: sync.max_retries,
            retry_backoff: Duration::from_millis(sync.retry_backoff_ms),
            request_timeout: Duration::from_secs(sync.request_timeout_secs),
            deadline: sync.deadline_secs.map(Duration::from_secs),
        })
    }
}

fn required(value: &Option<String>, key: &'static str, env: &'static str) -> ConfigResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::Missing { key, env })
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
