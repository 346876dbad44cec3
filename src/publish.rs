//! The publishing pipeline.
//!
//! Turns a directory of report files into one completed test run in the
//! remote test-management system.
//!
//! # Architecture
//!
//! ```text
//!   create_run() ──► run id
//!        │
//!   enumerate_files() ──► [a.json, b.json, c.json, ...]
//!        │
//!   Chunker::chunk() ──► [[a, b], [c, d], [e]]
//!        │
//!        ├── chunk 0 ─┐   files in order:
//!        ├── chunk 1 ─┤     parse ──► resolve suite (once per file)
//!        └── chunk 2 ─┤       per case: resolve case ──► steps ∥ links ──► test point
//!                     │
//!             try_join_all ──► Vec<CaseResult> (concatenated)
//!                     │
//!   publish_results() (skipped when empty) ──► complete_run()
//! ```
//!
//! # Failure Semantics
//!
//! The first error from any chunk aborts the pipeline: malformed reports,
//! ambiguous names and exhausted remote calls are all fatal. Nothing is
//! published for an aborted pipeline and the run is left in progress on the
//! remote side.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use resultsync::config::{apply_env, Config};
//! use resultsync::publish::PublishingEngine;
//! use resultsync::remote::{DevOpsClient, HttpTransport, RemoteCaller, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     apply_env(&mut config, |k| std::env::var(k).ok())?;
//!     let settings = config.publish_settings()?;
//!
//!     let caller = RemoteCaller::new(HttpTransport::new(&settings.remote)?, RetryPolicy::default());
//!     let api = Arc::new(DevOpsClient::new(caller, &settings.remote));
//!
//!     let summary = PublishingEngine::from_settings(api, &settings).run().await?;
//!     println!("Published {} results to run {}", summary.cases(), summary.run_id);
//!     Ok(())
//! }
//! ```

pub mod chunk;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::future::try_join_all;
use tokio_stream::wrappers::ReadDirStream;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PublishSettings};
use crate::format::{
    FileFilter, Outcome, RegisteredFormat, ReportError, ReportFormat, ReportModel,
};
use crate::hierarchy::{HierarchyResolver, ResolveError};
use crate::remote::{CaseResult, RemoteError, TestManagementApi};
use crate::report::{NullReporter, Reporter};

pub use chunk::Chunker;

/// Result type for the publishing pipeline.
pub type PublishResult<T> = Result<T, PublishError>;

/// Anything that aborts the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A report file is malformed for the configured format.
    #[error("Invalid report {}: {source}", file.display())]
    Data {
        file: PathBuf,
        #[source]
        source: ReportError,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The case exists but is not bound to the suite through a test point.
    #[error("No test point for test case {case} (`{title}`) in suite {suite}")]
    MissingTestPoint { suite: u64, case: u64, title: String },

    /// Processing the chunks took longer than the configured deadline.
    #[error("Publishing did not finish within {0:?}; the test run was left in progress")]
    DeadlineExceeded(Duration),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PublishError + '_ {
    move |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Outcome of a completed pipeline.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// ID of the remote test run.
    pub run_id: u64,

    pub run_name: String,

    /// Number of report files processed.
    pub files: usize,

    /// Wall-clock duration of the pipeline.
    pub duration: Duration,

    /// Every published result, in chunk order.
    pub results: Vec<CaseResult>,
}

impl RunSummary {
    /// Number of published results.
    pub fn cases(&self) -> usize {
        self.results.len()
    }

    /// Number of results with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Lists files in `dir` accepted by `filter`, in directory listing order.
pub async fn list_report_files(dir: &Path, filter: &FileFilter) -> PublishResult<Vec<PathBuf>> {
    let entries = tokio::fs::read_dir(dir).await.map_err(io_error(dir))?;
    let mut stream = ReadDirStream::new(entries);
    let mut files = Vec::new();

    while let Some(entry) = stream.next().await {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(io_error(&path))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name();
        if filter.matches(&name.to_string_lossy()) {
            files.push(path);
        }
    }

    Ok(files)
}

/// Reads and parses one report file.
pub async fn parse_report_file(path: &Path, format: &RegisteredFormat) -> PublishResult<Vec<ReportModel>> {
    let content = tokio::fs::read_to_string(path).await.map_err(io_error(path))?;
    let data_error = |source| PublishError::Data {
        file: path.to_path_buf(),
        source,
    };
    let document: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| data_error(ReportError::InvalidJson(e)))?;
    format.adapter.parse(&document, &format.fields).map_err(data_error)
}

/// Publishes a directory of reports as one test run.
pub struct PublishingEngine<A: ?Sized> {
    api: Arc<A>,
    resolver: HierarchyResolver<A>,
    format: RegisteredFormat,
    input_dir: PathBuf,
    chunker: Chunker,
    run_name: String,
    deadline: Option<Duration>,
    reporter: Arc<dyn Reporter>,
}

impl<A: TestManagementApi + ?Sized> PublishingEngine<A> {
    /// Creates an engine with default chunking, no deadline and no reporter.
    pub fn new(
        api: Arc<A>,
        format: RegisteredFormat,
        input_dir: impl Into<PathBuf>,
        parent_suite: u64,
    ) -> Self {
        Self {
            resolver: HierarchyResolver::new(api.clone(), parent_suite),
            api,
            format,
            input_dir: input_dir.into(),
            chunker: Chunker::default(),
            run_name: "resultsync".to_string(),
            deadline: None,
            reporter: Arc::new(NullReporter),
        }
    }

    /// Creates an engine from validated settings.
    pub fn from_settings(api: Arc<A>, settings: &PublishSettings) -> Self {
        Self::new(
            api,
            settings.report.format(),
            settings.report.input_dir.clone(),
            settings.remote.test_suite_parent_id,
        )
        .with_chunk_size(settings.chunk_size)
        .with_run_name(settings.run_name.clone())
        .with_deadline(settings.deadline)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunker = Chunker::new(chunk_size);
        self
    }

    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = name.into();
        self
    }

    /// Bounds the chunk processing phase.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Runs the whole pipeline.
    ///
    /// # Errors
    ///
    /// Any data, resolution or remote error aborts the run before results
    /// are published.
    pub async fn run(&self) -> PublishResult<RunSummary> {
        let start = Instant::now();

        // Fail on a missing input directory before anything is created remotely.
        tokio::fs::metadata(&self.input_dir)
            .await
            .map_err(io_error(&self.input_dir))?;

        let run_id = self.create_run().await?;

        let files = self.enumerate_files().await?;
        info!(
            "Found {} {} report file(s) in {}",
            files.len(),
            self.format.report_type(),
            self.input_dir.display()
        );
        self.reporter.on_files_enumerated(&files).await;

        let chunks = self.chunker.chunk(&files);
        debug!(
            "Processing {} chunk(s) of up to {} file(s)",
            chunks.len(),
            self.chunker.chunk_size()
        );

        let processing = try_join_all(chunks.iter().map(|chunk| self.process_chunk(chunk)));
        let per_chunk = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, processing)
                .await
                .map_err(|_| PublishError::DeadlineExceeded(deadline))??,
            None => processing.await?,
        };
        let results: Vec<CaseResult> = per_chunk.into_iter().flatten().collect();
        info!("Aggregated {} result(s)", results.len());

        self.publish_and_complete(run_id, &results).await?;

        let summary = RunSummary {
            run_id,
            run_name: self.run_name.clone(),
            files: files.len(),
            duration: start.elapsed(),
            results,
        };
        self.reporter.on_run_complete(&summary).await;

        Ok(summary)
    }

    /// Creates the test run every result is published to.
    pub async fn create_run(&self) -> PublishResult<u64> {
        let run_id = self.api.create_run(&self.run_name).await?;
        info!("Created test run {} (`{}`)", run_id, self.run_name);
        self.reporter.on_run_created(run_id, &self.run_name).await;
        Ok(run_id)
    }

    /// Report files for the configured format.
    pub async fn enumerate_files(&self) -> PublishResult<Vec<PathBuf>> {
        list_report_files(&self.input_dir, &self.format.fields.file_filter).await
    }

    /// Processes the files of one chunk sequentially.
    pub async fn process_chunk(&self, files: &[PathBuf]) -> PublishResult<Vec<CaseResult>> {
        let mut results = Vec::new();
        for file in files {
            let file_results = self.process_file(file).await?;
            self.reporter.on_file_processed(file, &file_results).await;
            results.extend(file_results);
        }
        Ok(results)
    }

    async fn process_file(&self, file: &Path) -> PublishResult<Vec<CaseResult>> {
        let models = parse_report_file(file, &self.format).await?;
        let Some(first) = models.first() else {
            debug!("{}: nothing to publish", file.display());
            return Ok(Vec::new());
        };

        let suite = self.resolver.resolve_suite(&first.folder_name).await?;
        if models.iter().any(|m| m.folder_name != first.folder_name) {
            warn!(
                "{}: cases span several folders; all are published to `{}`",
                file.display(),
                first.folder_name
            );
        }

        let mut results = Vec::with_capacity(models.len());
        for model in models {
            results.push(self.process_case(suite, model).await?);
        }
        debug!("{}: {} case(s)", file.display(), results.len());
        Ok(results)
    }

    async fn process_case(&self, suite: u64, model: ReportModel) -> PublishResult<CaseResult> {
        let case = self
            .resolver
            .resolve_test_case(&model.test_case_name, suite)
            .await?;

        futures::try_join!(
            async {
                self.api
                    .set_test_steps(case, &model.test_steps)
                    .await
                    .map_err(PublishError::from)
            },
            self.link_issues(case, &model),
        )?;

        let point = self
            .api
            .test_point(suite, case)
            .await?
            .ok_or_else(|| PublishError::MissingTestPoint {
                suite,
                case,
                title: model.test_case_name.clone(),
            })?;

        Ok(
            CaseResult::new(suite, case, point, model.test_case_name, model.status)
                .with_stack_trace(model.stack_trace),
        )
    }

    /// Adds the issue links the case does not have yet.
    async fn link_issues(&self, case: u64, model: &ReportModel) -> PublishResult<()> {
        if model.linked_items.is_empty() {
            return Ok(());
        }

        let existing = self.api.linked_issues(case).await?;
        for issue in model.linked_items.difference(&existing) {
            self.api.link_issue(case, issue).await?;
            debug!("Linked issue {} to test case {}", issue, case);
        }
        Ok(())
    }

    /// Submits all results in one batch, then completes the run.
    ///
    /// An empty result set is not submitted, but the run is still completed.
    pub async fn publish_and_complete(&self, run_id: u64, results: &[CaseResult]) -> PublishResult<()> {
        if results.is_empty() {
            info!("No results to publish");
        } else {
            self.api.publish_results(run_id, results).await?;
            info!("Published {} result(s) to run {}", results.len(), run_id);
        }

        self.api.complete_run(run_id).await?;
        info!("Completed test run {}", run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ReportRegistry, ReportType};
    use crate::testing::InMemoryApi;
    use serde_json::json;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const PARENT: u64 = 1;

    fn write(dir: &TempDir, name: &str, doc: serde_json::Value) {
        std::fs::write(dir.path().join(name), doc.to_string()).unwrap();
    }

    fn serenity(title: &str, result: &str, folder: &str, steps: &[&str]) -> serde_json::Value {
        let steps: Vec<_> = steps.iter().map(|s| json!({"description": s})).collect();
        json!({
            "title": title,
            "result": result,
            "featureTag": {"name": folder},
            "testSteps": steps
        })
    }

    fn engine(api: Arc<InMemoryApi>, dir: &TempDir) -> PublishingEngine<InMemoryApi> {
        PublishingEngine::new(
            api,
            ReportRegistry::get(ReportType::Serenity, None),
            dir.path(),
            PARENT,
        )
        .with_run_name("nightly")
    }

    #[tokio::test]
    async fn test_end_to_end_checkout() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout/Payments", &["click pay", "confirm"]));
        write(&dir, "refund.json", serenity("Refund", "FAILURE", "Checkout/Refunds", &[]));

        let api = Arc::new(InMemoryApi::new());
        let summary = engine(api.clone(), &dir).run().await.unwrap();

        assert_eq!(api.count("create_run"), 1);
        assert_eq!(api.count("create_suite"), 1);
        assert_eq!(api.count("create_test_case"), 2);
        assert_eq!(api.count("publish_results"), 1);
        assert_eq!(api.count("complete_run"), 1);

        let published = api.published();
        let (run, results) = &published[0];
        assert_eq!(*run, summary.run_id);
        assert_eq!(results.len(), 2);
        let outcomes: BTreeSet<_> = results
            .iter()
            .map(|r| (r.test_case_title.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            BTreeSet::from([("Pay", Outcome::Passed), ("Refund", Outcome::Failed)])
        );

        let pay = api.case_id("Pay").unwrap();
        assert_eq!(api.steps(pay).unwrap(), vec!["click pay", "confirm"]);
        let refund = api.case_id("Refund").unwrap();
        assert_eq!(api.steps(refund).unwrap(), Vec::<String>::new());

        let calls = api.calls();
        assert_eq!(calls.first(), Some(&"create_run"));
        assert_eq!(&calls[calls.len() - 2..], &["publish_results", "complete_run"]);

        assert_eq!(api.run_names(), vec!["nightly"]);
        assert_eq!(api.completed(), vec![summary.run_id]);
        assert_eq!(summary.cases(), 2);
        assert_eq!(summary.count(Outcome::Failed), 1);
    }

    #[tokio::test]
    async fn test_second_publish_reuses_hierarchy() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &["click pay"]));

        let api = Arc::new(InMemoryApi::new());
        engine(api.clone(), &dir).run().await.unwrap();
        engine(api.clone(), &dir).run().await.unwrap();

        assert_eq!(api.count("create_run"), 2);
        assert_eq!(api.count("create_suite"), 1);
        assert_eq!(api.count("create_test_case"), 1);
    }

    #[tokio::test]
    async fn test_chunk_size_does_not_change_results() {
        let dir = TempDir::new().unwrap();
        let n = 7;
        for i in 0..n {
            let folder = if i % 2 == 0 { "Even" } else { "Odd" };
            let result = if i % 3 == 0 { "FAILURE" } else { "SUCCESS" };
            write(
                &dir,
                &format!("case-{}.json", i),
                serenity(&format!("Case {}", i), result, folder, &["step"]),
            );
        }

        let mut aggregates = Vec::new();
        for chunk_size in [1, n, n + 10] {
            let api = Arc::new(InMemoryApi::new());
            let summary = engine(api.clone(), &dir)
                .with_chunk_size(chunk_size)
                .run()
                .await
                .unwrap();

            assert_eq!(api.count("create_suite"), 2, "chunk size {}", chunk_size);
            assert_eq!(api.count("publish_results"), 1);
            let set: BTreeSet<_> = summary
                .results
                .iter()
                .map(|r| (r.test_case_title.clone(), r.outcome))
                .collect();
            assert_eq!(set.len(), n);
            aggregates.push(set);
        }

        assert!(aggregates.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_empty_run_is_completed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ignored.json", serenity("Later", "TEST_IGNORED", "Backlog", &[]));
        std::fs::write(dir.path().join("notes.txt"), "not a report").unwrap();

        let api = Arc::new(InMemoryApi::new());
        let summary = engine(api.clone(), &dir).run().await.unwrap();

        assert_eq!(summary.cases(), 0);
        assert_eq!(api.count("publish_results"), 0);
        assert_eq!(api.count("create_suite"), 0);
        assert_eq!(api.count("complete_run"), 1);
    }

    #[tokio::test]
    async fn test_malformed_file_aborts_before_publish() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &[]));
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let api = Arc::new(InMemoryApi::new());
        let err = engine(api.clone(), &dir).with_chunk_size(1).run().await.unwrap_err();

        match err {
            PublishError::Data { file, source } => {
                assert!(file.ends_with("broken.json"));
                assert!(matches!(source, ReportError::InvalidJson(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(api.count("publish_results"), 0);
        assert_eq!(api.count("complete_run"), 0);
    }

    #[tokio::test]
    async fn test_unmapped_status_aborts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "odd.json", serenity("Odd", "WEIRD", "Checkout", &[]));

        let api = Arc::new(InMemoryApi::new());
        let err = engine(api.clone(), &dir).run().await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Data { source: ReportError::UnmappedStatus { .. }, .. }
        ));
        assert_eq!(api.count("complete_run"), 0);
    }

    #[tokio::test]
    async fn test_remote_failure_aborts() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &["a"]));

        let api = Arc::new(InMemoryApi::new().failing_on("set_test_steps"));
        let err = engine(api.clone(), &dir).run().await.unwrap_err();

        assert!(matches!(err, PublishError::Remote(RemoteError::Rejected { .. })));
        assert_eq!(api.count("publish_results"), 0);
        assert_eq!(api.count("complete_run"), 0);
    }

    #[tokio::test]
    async fn test_run_creation_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &[]));

        let api = Arc::new(InMemoryApi::new().failing_on("create_run"));
        let err = engine(api.clone(), &dir).run().await.unwrap_err();

        assert!(matches!(err, PublishError::Remote(_)));
        assert_eq!(api.calls(), vec!["create_run"]);
    }

    #[tokio::test]
    async fn test_missing_test_point() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &[]));

        let api = Arc::new(InMemoryApi::new().without_test_points());
        let err = engine(api.clone(), &dir).run().await.unwrap_err();
        assert!(matches!(err, PublishError::MissingTestPoint { ref title, .. } if title == "Pay"));
    }

    #[tokio::test]
    async fn test_only_missing_issue_links_are_added() {
        let dir = TempDir::new().unwrap();
        let mut doc = serenity("Pay", "SUCCESS", "Checkout", &[]);
        doc["coreIssues"] = json!(["7", "9"]);
        write(&dir, "pay.json", doc);

        let api = InMemoryApi::new().with_suite(PARENT, "Checkout");
        let suite = api.suite_id("Checkout").unwrap();
        let api = api.with_case(suite, "Pay");
        let case = api.case_id("Pay").unwrap();
        let api = Arc::new(api.with_link(case, "7"));

        engine(api.clone(), &dir).run().await.unwrap();

        assert_eq!(api.count("link_issue"), 1);
        assert_eq!(api.links(case), BTreeSet::from(["7".to_string(), "9".to_string()]));
    }

    #[tokio::test]
    async fn test_no_links_means_no_link_calls() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &[]));

        let api = Arc::new(InMemoryApi::new());
        engine(api.clone(), &dir).run().await.unwrap();

        assert_eq!(api.count("linked_issues"), 0);
        assert_eq!(api.count("link_issue"), 0);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_leaves_run_open() {
        let dir = TempDir::new().unwrap();
        write(&dir, "pay.json", serenity("Pay", "SUCCESS", "Checkout", &[]));

        let api = Arc::new(
            InMemoryApi::new().with_slow_operation("child_suites", Duration::from_secs(10)),
        );
        let err = engine(api.clone(), &dir)
            .with_deadline(Some(Duration::from_millis(50)))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::DeadlineExceeded(_)));
        assert_eq!(api.count("complete_run"), 0);
    }

    #[tokio::test]
    async fn test_missing_input_dir_creates_nothing() {
        let api = Arc::new(InMemoryApi::new());
        let engine = PublishingEngine::new(
            api.clone(),
            ReportRegistry::get(ReportType::Serenity, None),
            "/nonexistent/reports",
            PARENT,
        );

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_report_files_applies_filter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a-result.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a-container.json"), "{}").unwrap();
        std::fs::create_dir(dir.path().join("nested-result.json")).unwrap();

        let filter = FileFilter::EndsWith("result.json".into());
        let files = list_report_files(dir.path(), &filter).await.unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a-result.json"));
    }
}
