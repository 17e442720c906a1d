//! # Places Scraper
//!
//! Reads a list of places from CSV, visits each place's map page with a pool
//! of long-lived Chrome sessions and writes the places back out with their
//! star rating.
//!
//! ## How a run works
//!
//! - **Worker pool**: `pool_size` browser sessions are launched once at startup
//!   and closed once at the end. Free sessions are handed out least recently
//!   used first.
//! - **Acquisition**: input rows are bound to free sessions strictly in file
//!   order. An item that waits too long for a session logs a starvation warning.
//! - **Bounded execution**: at most `pool_size - reserved_workers` pages load at
//!   once, so acquisition always has sessions to run ahead with.
//! - **Degraded results**: a row without a usable map URL, or whose page fails,
//!   still produces an output row with an empty rating.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use places_scraper::{
//!     read_places, BrowserFactory, Config, CsvResultSink, Pipeline, RatingExtractor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let places = read_places(&config.input_path).await?;
//!     let mut sink = CsvResultSink::create_in(&config.output_dir, &chrono::Local::now())?;
//!
//!     let pipeline = Pipeline::new(
//!         config.clone(),
//!         BrowserFactory::new(config.browser.clone()),
//!         RatingExtractor::from_config(&config),
//!     );
//!     let report = pipeline.run(places, &mut sink).await?;
//!     println!("{} places rated, {} without rating", report.completed, report.degraded);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! places-scraper --pool-size 5 --reserve 2 run --input ./inputs/Places.csv
//! places-scraper validate --config scraper.json
//! ```

/// Configuration and settings for the scraper
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Traits connecting the pipeline to browsers, processing and output
pub mod traits;

/// Fixed-size pool of exclusively leased workers
pub mod worker_pool;

/// In-order binding of input items to free workers
pub mod scheduler;

/// Concurrency-bounded per-item processing
pub mod executor;

/// Run orchestration from startup to teardown
pub mod pipeline;

/// Place records
pub mod place;

/// CSV input and output
pub mod csv_io;

/// Chrome sessions used as workers
pub mod browser;

/// Rating extraction from place pages
pub mod rating;

/// Command-line interface implementation
pub mod cli;

/// Pipeline metrics and the Prometheus exporter
pub mod metrics;

/// Utility functions and helpers
pub mod utils;


pub use self::metrics::*;
pub use browser::*;
pub use cli::*;
pub use config::*;
pub use csv_io::*;
pub use error::*;
pub use executor::*;
pub use pipeline::*;
pub use place::*;
pub use rating::*;
pub use scheduler::*;
pub use traits::*;
pub use utils::*;
pub use worker_pool::*;
