use crate::utils::format_duration;
use crate::{
    read_places, BrowserFactory, Config, CsvResultSink, Pipeline, PipelineReport,
    PrometheusExporter, RatingExtractor,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "places-scraper")]
#[command(about = "Collects map ratings for a list of places using a pool of Chrome sessions")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Browser pool size")]
    pub pool_size: Option<usize>,

    #[arg(long, help = "Browsers kept out of the page concurrency limit")]
    pub reserve: Option<usize>,

    #[arg(long, help = "Maximum pages loading at once")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Per-page timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rate every place in the input file
    Run {
        #[arg(short, long, help = "Input CSV file (default from config)")]
        input: Option<PathBuf>,

        #[arg(short, long, help = "Directory for the result file (default from config)")]
        output_dir: Option<PathBuf>,

        #[arg(long, help = "Show the browser windows")]
        headful: bool,

        #[arg(long, help = "Serve Prometheus metrics on this port")]
        metrics_port: Option<u16>,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

impl Cli {
    /// Applies command-line values on top of `config`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(reserve) = self.reserve {
            config.reserved_workers = reserve;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_pages = Some(max_concurrent);
        }
        if let Some(timeout) = self.timeout {
            config.page_timeout = Some(Duration::from_secs(timeout));
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.browser.chrome_path = Some(chrome_path.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub headful: bool,
    pub metrics_port: Option<u16>,
}

pub struct CliRunner {
    pub config: Config,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run {
                input,
                output_dir,
                headful,
                metrics_port,
            } => {
                let report = self
                    .run_scrape(RunOptions {
                        input: input.unwrap_or_else(|| self.config.input_path.clone()),
                        output_dir: output_dir.unwrap_or_else(|| self.config.output_dir.clone()),
                        headful,
                        metrics_port,
                    })
                    .await?;
                print_report(&report);
                Ok(())
            }
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    pub async fn run_scrape(&self, options: RunOptions) -> Result<PipelineReport> {
        let mut config = self.config.clone();
        if options.headful {
            config.browser.headless = false;
        }

        if let Some(port) = options.metrics_port {
            PrometheusExporter::new(SocketAddr::from(([0, 0, 0, 0], port))).start()?;
        }

        let places = read_places(&options.input).await?;
        let mut sink = CsvResultSink::create_in(&options.output_dir, &chrono::Local::now())?;
        info!("Writing results to {}", sink.path().display());

        let pipeline = Pipeline::new(
            config.clone(),
            BrowserFactory::new(config.browser.clone()),
            RatingExtractor::from_config(&config),
        );

        let report = pipeline
            .run(places, &mut sink)
            .await
            .with_context(|| format!("scraping {} failed", options.input.display()))?;

        info!(
            rows = sink.rows_written(),
            "Results written to {}",
            sink.path().display()
        );
        Ok(report)
    }

    pub async fn validate_config(&self, config_path: PathBuf) -> Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let config_content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("cannot parse {}", config_path.display()))?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Browser pool size: {}", config.pool_size);
        println!("  Reserved browsers: {}", config.reserved_workers);
        println!("  Max concurrent pages: {}", config.execution_ceiling());
        println!("  Starvation threshold: {:?}", config.starvation_threshold);
        println!("  Starvation policy: {:?}", config.starvation_policy);
        println!("  Page timeout: {:?}", config.page_timeout);
        println!("  Headless: {}", config.browser.headless);

        Ok(())
    }
}

fn print_report(report: &PipelineReport) {
    println!("Run {} finished in {}", report.run_id, format_duration(report.elapsed));
    println!("  Places processed: {}", report.items);
    println!("  Rated: {}", report.completed);
    println!("  Without rating: {} ({} without map URL)", report.degraded, report.skipped);
    println!("  Starvation warnings: {}", report.starvation_warnings);
    println!("  Peak pages in flight: {}", report.peak_in_flight);
    println!(
        "  Browsers closed: {} ({} failed)",
        report.teardown.destroyed, report.teardown.failures
    );
}

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StarvationPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "places-scraper",
            "--pool-size",
            "8",
            "--reserve",
            "3",
            "--timeout",
            "45",
            "run",
            "--input",
            "data/Places.csv",
            "--headful",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.reserved_workers, 3);
        assert_eq!(config.execution_ceiling(), 5);
        assert_eq!(config.page_timeout, Some(Duration::from_secs(45)));

        match cli.command {
            Commands::Run { input, headful, output_dir, metrics_port } => {
                assert_eq!(input, Some(PathBuf::from("data/Places.csv")));
                assert!(headful);
                assert!(output_dir.is_none());
                assert!(metrics_port.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_max_concurrent_override() {
        let cli = Cli::try_parse_from(["places-scraper", "--max-concurrent", "2", "run"]).unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.max_concurrent_pages, Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["places-scraper"]).is_err());
    }

    #[tokio::test]
    async fn test_validate_config_file() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"pool_size": 6, "reserved_workers": 2, "starvation_policy": "fail_after_threshold"}"#,
        )
        .unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"pool_size": 2, "reserved_workers": 2}"#).unwrap();

        let runner = CliRunner::new(Config::default());
        assert!(runner.validate_config(good.clone()).await.is_ok());
        assert!(runner.validate_config(bad).await.is_err());
        assert!(runner
            .validate_config(dir.path().join("missing.json"))
            .await
            .is_err());

        let parsed: Config = serde_json::from_str(&std::fs::read_to_string(good).unwrap()).unwrap();
        assert_eq!(parsed.starvation_policy, StarvationPolicy::FailAfterThreshold);
    }
}
