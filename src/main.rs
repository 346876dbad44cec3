//! resultsync CLI - publish test reports to Azure DevOps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use resultsync::config::{self, Config};
use resultsync::format::{ReportModel, ReportType};
use resultsync::publish::{self, PublishingEngine};
use resultsync::remote::{DevOpsClient, HttpTransport, RemoteCaller, RetryPolicy};
use resultsync::report::ConsoleReporter;

const DEFAULT_CONFIG: &str = "resultsync.toml";

#[derive(Parser)]
#[command(name = "resultsync")]
#[command(about = "Publish Serenity, Allure and Karate reports to Azure DevOps test plans", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (optional; settings may come from the environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish reports as a new test run
    Publish {
        #[command(flatten)]
        input: InputArgs,

        /// Override the number of files per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the test run name
        #[arg(long)]
        run_name: Option<String>,
    },

    /// Parse reports without contacting the remote system
    Parse {
        #[command(flatten)]
        input: InputArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Validate configuration and print the resolved settings
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Report type the file is written for
        #[arg(short, long, default_value = "serenity")]
        report_type: String,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Override the report directory
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Override the report type (serenity, allure, karate)
    #[arg(short = 't', long)]
    report_type: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Publish {
            input,
            chunk_size,
            run_name,
        } => {
            let mut config = load(cli.config.as_deref())?;
            input.apply(&mut config)?;
            if let Some(chunk_size) = chunk_size {
                config.sync.chunk_size = chunk_size;
            }
            if let Some(run_name) = run_name {
                config.sync.run_name = Some(run_name);
            }
            publish_reports(config, cli.verbose).await
        }
        Commands::Parse { input, format } => {
            let mut config = load(cli.config.as_deref())?;
            input.apply(&mut config)?;
            parse_reports(&config, format).await
        }
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Init { report_type } => init_config(&report_type),
    }
}

impl InputArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(input) = &self.input {
            config.report.input_dir = Some(input.clone());
        }
        if let Some(report_type) = &self.report_type {
            config.report.report_type = Some(report_type.parse()?);
        }
        Ok(())
    }
}

/// File (if any), then environment.
fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG))?,
        None => Config::default(),
    };
    config::apply_env(&mut config, |key| std::env::var(key).ok())
        .context("Invalid environment configuration")?;
    Ok(config)
}

async fn publish_reports(config: Config, verbose: bool) -> Result<()> {
    let settings = config.publish_settings().context("Invalid configuration")?;
    info!(
        "Publishing {} reports from {} to plan {}",
        settings.report.report_type,
        settings.report.input_dir.display(),
        settings.remote.test_plan_id
    );

    let policy = RetryPolicy {
        max_attempts: settings.max_attempts,
        initial_backoff: settings.retry_backoff,
        request_timeout: settings.request_timeout,
        ..RetryPolicy::default()
    };
    let transport = HttpTransport::new(&settings.remote).context("Failed to set up HTTP client")?;
    let api = Arc::new(DevOpsClient::new(RemoteCaller::new(transport, policy), &settings.remote));

    let engine = PublishingEngine::from_settings(api, &settings)
        .with_reporter(Arc::new(ConsoleReporter::new(verbose)));
    engine.run().await.context("Publishing failed")?;

    Ok(())
}

#[derive(Serialize)]
struct ParsedFile {
    file: PathBuf,
    cases: Vec<ReportModel>,
}

async fn parse_reports(config: &Config, format: OutputFormat) -> Result<()> {
    let settings = config.report_settings().context("Invalid configuration")?;
    let registered = settings.format();

    let files = publish::list_report_files(&settings.input_dir, &registered.fields.file_filter).await?;
    let mut parsed = Vec::with_capacity(files.len());
    for file in files {
        let cases = publish::parse_report_file(&file, &registered).await?;
        parsed.push(ParsedFile { file, cases });
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }
        OutputFormat::Text => {
            let total: usize = parsed.iter().map(|p| p.cases.len()).sum();
            println!("Parsed {} cases from {} files:", total, parsed.len());
            for entry in &parsed {
                println!("  {}", entry.file.display());
                for case in &entry.cases {
                    let issues = if case.linked_items.is_empty() {
                        String::new()
                    } else {
                        let ids: Vec<&str> = case.linked_items.iter().map(String::as_str).collect();
                        format!(" [{}]", ids.join(", "))
                    };
                    println!(
                        "    {:<13} {} / {} ({} steps){}",
                        case.status.as_str(),
                        case.folder_name,
                        case.test_case_name,
                        case.test_steps.len(),
                        issues
                    );
                }
            }
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;
    let settings = config.publish_settings().context("Configuration is invalid")?;

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Report type:   {}", settings.report.report_type);
    println!("  Input dir:     {}", settings.report.input_dir.display());
    println!("  Organization:  {}", settings.remote.organization);
    println!("  Project:       {}", settings.remote.project);
    println!("  Test plan:     {}", settings.remote.test_plan_id);
    println!("  Parent suite:  {}", settings.remote.test_suite_parent_id);
    println!("  User:          {}", settings.remote.user_name);
    println!("  Token:         {}", mask(&settings.remote.token));
    println!("  Run name:      {}", settings.run_name);
    println!("  Chunk size:    {}", settings.chunk_size);
    println!("  Max attempts:  {}", settings.max_attempts);
    println!("  Timeout:       {:?}", settings.request_timeout);
    if let Some(deadline) = settings.deadline {
        println!("  Deadline:      {:?}", deadline);
    }

    Ok(())
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.chars().count() <= 8 {
        "********".to_string()
    } else {
        format!("********{}", visible)
    }
}

fn init_config(report_type: &str) -> Result<()> {
    let report_type: ReportType = report_type.parse()?;
    let (input_dir, extra) = match report_type {
        ReportType::Serenity => ("target/site/serenity", ""),
        ReportType::Allure => (
            "build/allure-results",
            "\n# Only publish results tagged with this label\n# tag_filter = \"integration test\"\n",
        ),
        ReportType::Karate => ("target/karate-reports", ""),
    };

    let config = format!(
        r#"# resultsync configuration file
#
# Every value can also be set through the environment, e.g. AZURE_TOKEN,
# AZURE_TEST_PLAN_ID, JSON_INPUT_PATH. Environment values win.

[sync]
chunk_size = 10
max_retries = 3
retry_backoff_ms = 500
request_timeout_secs = 60

[report]
type = "{}"
input_dir = "{}"
{}
[remote]
organization = "my-organization"
project = "my-project"
test_plan_id = 1
test_suite_parent_id = 2
user_name = "ci-bot"
# token is best supplied via AZURE_TOKEN

[remote.test_case_fields]
"System.State" = "Design"
# Projects with the automation status field usually also want:
# "Custom.Testautomationstatus" = "Automated"
"#,
        report_type, input_dir, extra
    );

    let path = PathBuf::from(DEFAULT_CONFIG);
    if path.exists() {
        bail!("{} already exists. Remove it first or edit manually.", DEFAULT_CONFIG);
    }

    std::fs::write(&path, config).with_context(|| format!("Failed to write {}", DEFAULT_CONFIG))?;
    println!("Created {}", DEFAULT_CONFIG);
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  resultsync publish");

    Ok(())
}
