//! Configuration management with serde serialization/deserialization
//!
//! This module holds the run configuration for the scraper: the two
//! independent concurrency bounds (worker pool size and page concurrency),
//! acquisition behaviour, and the Chrome launch settings.

use crate::ScrapeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the scraper
///
/// `pool_size` is the number of browser sessions kept alive for the whole run.
/// The number of pages actually loading at once is a separate, smaller bound:
/// `max_concurrent_pages` if set, otherwise `pool_size - reserved_workers`.
///
/// # Examples
///
/// ```rust
/// use places_scraper::Config;
///
/// let config = Config {
///     pool_size: 8,
///     reserved_workers: 2,
///     ..Default::default()
/// };
/// assert_eq!(config.execution_ceiling(), 6);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of browser sessions in the pool (default: 5)
    pub pool_size: usize,

    /// Sessions kept out of the execution ceiling so acquisition can run
    /// ahead of execution (default: 2)
    pub reserved_workers: usize,

    /// Explicit page concurrency; must not exceed `pool_size - reserved_workers`
    pub max_concurrent_pages: Option<usize>,

    /// Longest single wait for a released worker before re-checking the pool
    /// (default: 1 second)
    pub acquire_poll_interval: Duration,

    /// How long one item may wait for a worker before a starvation warning
    /// is emitted (default: 30 seconds)
    pub starvation_threshold: Duration,

    /// What to do once the starvation threshold is crossed
    pub starvation_policy: StarvationPolicy,

    /// Optional upper bound on a single page visit (default: none)
    pub page_timeout: Option<Duration>,

    /// Time given to a page to render before the rating is read (default: 2 seconds)
    pub page_settle_delay: Duration,

    /// CSS selector of the rating container
    pub rating_selector: String,

    /// Page loaded after an extraction error to get the session back to a known state
    pub recovery_url: String,

    /// Default input file
    pub input_path: PathBuf,

    /// Directory receiving timestamped result files
    pub output_dir: PathBuf,

    /// Chrome launch settings
    pub browser: BrowserSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 5,
            reserved_workers: 2,
            max_concurrent_pages: None,
            acquire_poll_interval: Duration::from_secs(1),
            starvation_threshold: Duration::from_secs(30),
            starvation_policy: StarvationPolicy::WarnAndContinue,
            page_timeout: None,
            page_settle_delay: Duration::from_secs(2),
            rating_selector: ".F7nice".to_string(),
            recovery_url: "https://www.google.com/".to_string(),
            input_path: PathBuf::from("./inputs/Places.csv"),
            output_dir: PathBuf::from("./outputs"),
            browser: BrowserSettings::default(),
        }
    }
}

impl Config {
    /// Number of processing calls allowed in flight at once.
    pub fn execution_ceiling(&self) -> usize {
        self.max_concurrent_pages
            .unwrap_or_else(|| self.pool_size.saturating_sub(self.reserved_workers))
    }

    /// Checks `1 <= ceiling <= pool_size - reserved_workers` and the timing values.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.pool_size == 0 {
            return Err(ScrapeError::ConfigurationError(
                "pool size must be greater than 0".to_string(),
            ));
        }

        if self.reserved_workers >= self.pool_size {
            return Err(ScrapeError::ConfigurationError(format!(
                "reserved workers ({}) must be smaller than the pool size ({})",
                self.reserved_workers, self.pool_size
            )));
        }

        let ceiling = self.execution_ceiling();
        let limit = self.pool_size - self.reserved_workers;
        if ceiling == 0 {
            return Err(ScrapeError::ConfigurationError(
                "page concurrency must be greater than 0".to_string(),
            ));
        }
        if ceiling > limit {
            return Err(ScrapeError::ConfigurationError(format!(
                "page concurrency {ceiling} exceeds pool size {} minus {} reserved workers",
                self.pool_size, self.reserved_workers
            )));
        }

        if self.acquire_poll_interval.is_zero() {
            return Err(ScrapeError::ConfigurationError(
                "acquire poll interval must be greater than 0".to_string(),
            ));
        }

        if self.starvation_threshold.is_zero() {
            return Err(ScrapeError::ConfigurationError(
                "starvation threshold must be greater than 0".to_string(),
            ));
        }

        if matches!(self.page_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ScrapeError::ConfigurationError(
                "page timeout must be greater than 0 when set".to_string(),
            ));
        }

        if self.rating_selector.trim().is_empty() {
            return Err(ScrapeError::ConfigurationError(
                "rating selector must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Behaviour once an item has waited longer than `starvation_threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StarvationPolicy {
    /// Log a warning and keep waiting (default)
    WarnAndContinue,
    /// Log a warning and abort the run
    FailAfterThreshold,
}

impl Default for StarvationPolicy {
    fn default() -> Self {
        Self::WarnAndContinue
    }
}

/// Chrome launch settings shared by every session in the pool
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run Chrome without a window (default: true)
    pub headless: bool,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Window width in pixels (default: 1366)
    pub window_width: u32,

    /// Window height in pixels (default: 768)
    pub window_height: u32,

    /// Pause between consecutive browser launches (default: 500ms)
    pub launch_stagger: Duration,

    /// First remote debugging port; instance `n` uses `base + n`
    pub debugging_port_base: u16,

    /// Additional Chrome command-line arguments
    pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            window_width: 1366,
            window_height: 768,
            launch_stagger: Duration::from_millis(500),
            debugging_port_base: 9222,
            extra_args: Vec::new(),
        }
    }
}

/// Generate Chrome arguments for one pool member
///
/// Every instance gets its own user data directory and debugging port so
/// sessions never collide on Chrome's process singleton.
///
/// # Examples
///
/// ```rust
/// use places_scraper::{get_chrome_args_with_instance_id, BrowserSettings};
///
/// let args = get_chrome_args_with_instance_id(&BrowserSettings::default(), 3);
/// assert!(args.contains(&"--remote-debugging-port=9225".to_string()));
/// ```
pub fn get_chrome_args_with_instance_id(
    settings: &BrowserSettings,
    instance_id: usize,
) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), instance_id);

    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI,ProcessSingleton".to_string(),
        format!(
            "--window-size={},{}",
            settings.window_width, settings.window_height
        ),
        format!("--user-data-dir=/tmp/places-scraper-{unique_id}"),
        format!(
            "--remote-debugging-port={}",
            settings.debugging_port_base as usize + instance_id
        ),
    ];

    if settings.headless {
        args.push("--headless".to_string());
    }

    args.extend(settings.extra_args.iter().cloned());
    args
}

pub fn create_browser_config_with_instance_id(
    settings: &BrowserSettings,
    instance_id: usize,
) -> Result<chromiumoxide::browser::BrowserConfig, ScrapeError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(settings.window_width, settings.window_height)
        .args(get_chrome_args_with_instance_id(settings, instance_id));

    if !settings.headless {
        builder = builder.with_head();
    }

    if let Some(chrome_path) = &settings.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(ScrapeError::ConfigurationError)
}
