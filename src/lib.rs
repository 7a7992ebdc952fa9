//! # options-rnd
//!
//! Recovers the risk-neutral probability density of an index level at
//! expiry from historical end-of-day option chains, using the
//! Breeden-Litzenberger relation `q(K) = e^{rT} ∂²C/∂K²`.
//!
//! ## Features
//!
//! - Polars-based loading of wide per-strike chain CSVs (calls and puts on one row)
//! - Quote cleaning with put-call parity and no-arbitrage filters
//! - Call price curve fitting (price spline, implied-vol smile spline, polynomial)
//! - Density recovery, summary statistics and a log-normal reference
//! - PNG/SVG charts, HTML report, JSON summary and CSV/Parquet density table
//! - Environment-based configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use options_rnd::config::Config;
//! use options_rnd::{pipeline, report};
//!
//! fn main() -> options_rnd::error::Result<()> {
//!     let config = Config::from_env()?;
//!     config.init_logging()?;
//!
//!     let days = pipeline::run(&config)?;
//!     for day in &days {
//!         for m in &day.maturities {
//!             println!(
//!                 "{} {}d: mean {:.2}, sd {:.2}",
//!                 day.quote_date, m.target_days, m.stats.mean, m.stats.std_dev
//!             );
//!         }
//!     }
//!
//!     report::write_reports(&days, &config)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{OptionsError, Result};
