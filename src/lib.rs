//! resultsync: publish test reports to Azure DevOps test plans.
//!
//! Reads the JSON reports written by Serenity BDD, Allure or Karate, mirrors
//! their suites, cases, steps and linked issues into a test plan without
//! creating duplicates, and records every outcome in a single test run.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Format**: Parse report documents into a canonical [`ReportModel`]
//! - **Hierarchy**: Create-or-get suites and test cases
//! - **Remote**: Azure DevOps client with retrying transport
//! - **Publish**: Chunked, concurrent pipeline from files to a completed run
//! - **Report**: Console progress and summary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resultsync::config::load_config;
//! use resultsync::publish::PublishingEngine;
//! use resultsync::remote::{DevOpsClient, HttpTransport, RemoteCaller, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = load_config(std::path::Path::new("resultsync.toml"))?.publish_settings()?;
//!     let caller = RemoteCaller::new(HttpTransport::new(&settings.remote)?, RetryPolicy::default());
//!     let api = Arc::new(DevOpsClient::new(caller, &settings.remote));
//!
//!     let summary = PublishingEngine::from_settings(api, &settings).run().await?;
//!     println!("{} results published", summary.cases());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod format;
pub mod hierarchy;
pub mod publish;
pub mod remote;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{Config, PublishSettings, load_config};
pub use format::{FormatAdapter, Outcome, ReportModel, ReportRegistry, ReportType};
pub use hierarchy::HierarchyResolver;
pub use publish::{PublishError, PublishingEngine, RunSummary};
pub use remote::{RemoteCaller, TestManagementApi};
pub use report::Reporter;
