//! Progress and summary output.
//!
//! The engine notifies a [`Reporter`] as the pipeline advances. The binary
//! uses [`ConsoleReporter`]; library users and tests get [`NullReporter`]
//! by default.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::format::Outcome;
use crate::publish::RunSummary;
use crate::remote::CaseResult;

/// Receives pipeline events.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the remote test run exists.
    async fn on_run_created(&self, run_id: u64, name: &str);

    /// Called when the report files are known.
    async fn on_files_enumerated(&self, files: &[PathBuf]);

    /// Called after every case of a file has been synchronized.
    async fn on_file_processed(&self, file: &Path, results: &[CaseResult]);

    /// Called after the run has been completed.
    async fn on_run_complete(&self, summary: &RunSummary);
}

/// A reporter that does nothing.
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_created(&self, _run_id: u64, _name: &str) {}
    async fn on_files_enumerated(&self, _files: &[PathBuf]) {}
    async fn on_file_processed(&self, _file: &Path, _results: &[CaseResult]) {}
    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// Console reporter with a progress bar over report files.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }
}

fn outcome_label(outcome: Outcome) -> console::StyledObject<&'static str> {
    match outcome {
        Outcome::Passed => console::style("PASS").green(),
        Outcome::Failed => console::style("FAIL").red(),
        Outcome::NotExecuted => console::style("SKIP").yellow(),
        Outcome::NotApplicable => console::style("N/A ").dim(),
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_created(&self, run_id: u64, name: &str) {
        println!("Created test run {} ({})", console::style(run_id).bold(), name);
    }

    async fn on_files_enumerated(&self, files: &[PathBuf]) {
        println!("Found {} report files", files.len());

        let pb = indicatif::ProgressBar::new(files.len() as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    async fn on_file_processed(&self, file: &Path, results: &[CaseResult]) {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pb) = progress.as_ref() else {
            return;
        };
        pb.inc(1);

        for result in results {
            if self.verbose || result.outcome != Outcome::Passed {
                pb.println(format!(
                    "{} {} ({})",
                    outcome_label(result.outcome),
                    result.test_case_title,
                    file.display()
                ));
            }
        }
    }

    async fn on_run_complete(&self, summary: &RunSummary) {
        if let Some(pb) = self.progress.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Published to run {} ({}):", summary.run_id, summary.run_name);
        println!("  Files:          {}", summary.files);
        println!("  Cases:          {}", summary.cases());
        println!("  Passed:         {}", console::style(summary.count(Outcome::Passed)).green());
        println!("  Failed:         {}", console::style(summary.count(Outcome::Failed)).red());
        println!(
            "  Not executed:   {}",
            console::style(summary.count(Outcome::NotExecuted)).yellow()
        );
        let not_applicable = summary.count(Outcome::NotApplicable);
        if not_applicable > 0 {
            println!("  Not applicable: {}", console::style(not_applicable).dim());
        }
        println!("  Duration:       {:?}", summary.duration);

        if summary.cases() == 0 {
            println!();
            println!(
                "{}",
                console::style("No results were published; the run was completed empty.")
                    .yellow()
                    .bold()
            );
        } else if summary.count(Outcome::Failed) > 0 {
            println!();
            println!("Failed cases:");
            for result in summary.results.iter().filter(|r| r.outcome == Outcome::Failed) {
                println!("  - {}", result.test_case_title);
                if self.verbose
                    && let Some(trace) = &result.stack_trace
                {
                    for line in trace.lines() {
                        println!("      {}", console::style(line).dim());
                    }
                }
            }
        }
    }
}
