use crate::error::{OptionsError, Result};
use crate::utils::fitting::FitMethod;
use chrono::NaiveDate;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Where the option chain comes from and which quote dates to analyze
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV file holding the historical option chain
    pub path: PathBuf,
    /// Explicit quote dates; empty means every date in the file
    pub quote_dates: Vec<NaiveDate>,
    /// Cap on the number of quote dates analyzed (earliest first)
    pub max_dates: Option<usize>,
}

/// Filters applied to raw quotes before a price curve is fitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Maximum (ask - bid) / mid accepted for a quote side
    pub max_relative_spread: f64,
    /// Minimum traded volume; zero disables the filter
    pub min_volume: u64,
    /// Strikes kept within spot * (1 ± window)
    pub moneyness_window: f64,
    /// Replace ITM calls by OTM puts through put-call parity
    pub use_put_parity: bool,
    /// Price a side from its last trade when there is no two-sided market
    pub use_last_price: bool,
    /// Drop points that break monotonicity or the intrinsic lower bound
    pub enforce_no_arbitrage: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            max_relative_spread: 0.5,
            min_volume: 0,
            moneyness_window: 0.25,
            use_put_parity: true,
            use_last_price: false,
            enforce_no_arbitrage: true,
        }
    }
}

/// Numerical settings of the density recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Flat continuously-compounded risk-free rate
    pub risk_free_rate: f64,
    /// Target maturities in calendar days
    pub maturities: Vec<u32>,
    /// Maximum distance in days between a target maturity and a listed expiry
    pub dte_tolerance: f64,
    pub fit_method: FitMethod,
    /// Number of strikes on the density grid
    pub grid_points: usize,
    /// Minimum number of cleaned points needed to fit a curve
    pub min_points: usize,
    pub cleaning: CleaningConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.045,
            maturities: vec![1, 7, 28],
            dte_tolerance: 1.0,
            fit_method: FitMethod::ImpliedVolSpline,
            grid_points: 400,
            min_points: 5,
            cleaning: CleaningConfig::default(),
        }
    }
}

/// Report destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Also write the density table as Parquet
    pub export_parquet: bool,
}

/// Configuration for the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                path: PathBuf::from("data/spx_eod.csv"),
                quote_dates: Vec::new(),
                max_dates: None,
            },
            analysis: AnalysisConfig::default(),
            output: OutputConfig {
                dir: PathBuf::from("output"),
                export_parquet: false,
            },
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        OptionsError::ConfigError(format!("{} has invalid value '{}': {}", name, raw, e))
    })
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(OptionsError::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

/// Parse a comma separated list, skipping empty entries
fn parse_list<T: FromStr>(name: &str, raw: &str) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_var(name, s))
        .collect()
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .map_err(|e| OptionsError::ParseError(format!("invalid date '{}': {}", raw, e)))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source, falling back
    /// to defaults for anything unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("RND_DATA_PATH") {
            config.data.path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("RND_QUOTE_DATES") {
            config.data.quote_dates = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    parse_date(s).map_err(|e| {
                        OptionsError::ConfigError(format!("RND_QUOTE_DATES: {}", e))
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = lookup("RND_MAX_DATES") {
            config.data.max_dates = Some(parse_var("RND_MAX_DATES", &raw)?);
        }

        let analysis = &mut config.analysis;
        if let Some(raw) = lookup("RISK_FREE_RATE") {
            analysis.risk_free_rate = parse_var("RISK_FREE_RATE", &raw)?;
        }
        if let Some(raw) = lookup("RND_MATURITIES") {
            analysis.maturities = parse_list("RND_MATURITIES", &raw)?;
        }
        if let Some(raw) = lookup("RND_DTE_TOLERANCE") {
            analysis.dte_tolerance = parse_var("RND_DTE_TOLERANCE", &raw)?;
        }
        if let Some(raw) = lookup("RND_FIT_METHOD") {
            analysis.fit_method = parse_var("RND_FIT_METHOD", &raw)?;
        }
        if let Some(raw) = lookup("RND_GRID_POINTS") {
            analysis.grid_points = parse_var("RND_GRID_POINTS", &raw)?;
        }
        if let Some(raw) = lookup("RND_MIN_POINTS") {
            analysis.min_points = parse_var("RND_MIN_POINTS", &raw)?;
        }

        let cleaning = &mut analysis.cleaning;
        if let Some(raw) = lookup("RND_MAX_SPREAD") {
            cleaning.max_relative_spread = parse_var("RND_MAX_SPREAD", &raw)?;
        }
        if let Some(raw) = lookup("RND_MIN_VOLUME") {
            cleaning.min_volume = parse_var("RND_MIN_VOLUME", &raw)?;
        }
        if let Some(raw) = lookup("RND_MONEYNESS_WINDOW") {
            cleaning.moneyness_window = parse_var("RND_MONEYNESS_WINDOW", &raw)?;
        }
        if let Some(raw) = lookup("RND_USE_PUTS") {
            cleaning.use_put_parity = parse_bool("RND_USE_PUTS", &raw)?;
        }
        if let Some(raw) = lookup("RND_USE_LAST") {
            cleaning.use_last_price = parse_bool("RND_USE_LAST", &raw)?;
        }
        if let Some(raw) = lookup("RND_ENFORCE_NO_ARB") {
            cleaning.enforce_no_arbitrage = parse_bool("RND_ENFORCE_NO_ARB", &raw)?;
        }

        if let Some(dir) = lookup("RND_OUTPUT_DIR") {
            config.output.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("RND_EXPORT_PARQUET") {
            config.output.export_parquet = parse_bool("RND_EXPORT_PARQUET", &raw)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply positional command-line arguments: the data path, then quote dates
    pub fn apply_args<I, S>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        if let Some(path) = args.next() {
            self.data.path = PathBuf::from(path.as_ref());
        }
        let dates: Vec<NaiveDate> = args
            .map(|a| parse_date(a.as_ref()))
            .collect::<Result<_>>()?;
        if !dates.is_empty() {
            self.data.quote_dates = dates;
        }
        Ok(())
    }

    /// Reject settings the analysis cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data.max_dates == Some(0) {
            return Err(OptionsError::ConfigError(
                "RND_MAX_DATES must be at least 1".to_string(),
            ));
        }
        let analysis = &self.analysis;
        if analysis.maturities.is_empty() {
            return Err(OptionsError::ConfigError(
                "at least one target maturity is required".to_string(),
            ));
        }
        if analysis.maturities.iter().any(|&m| m == 0) {
            return Err(OptionsError::ConfigError(
                "target maturities must be at least one day".to_string(),
            ));
        }
        if !analysis.risk_free_rate.is_finite() {
            return Err(OptionsError::ConfigError(
                "RISK_FREE_RATE must be finite".to_string(),
            ));
        }
        if analysis.dte_tolerance < 0.0 {
            return Err(OptionsError::ConfigError(
                "RND_DTE_TOLERANCE must be non-negative".to_string(),
            ));
        }
        if analysis.grid_points < 10 {
            return Err(OptionsError::ConfigError(
                "RND_GRID_POINTS must be at least 10".to_string(),
            ));
        }
        if analysis.min_points < 3 {
            return Err(OptionsError::ConfigError(
                "RND_MIN_POINTS must be at least 3".to_string(),
            ));
        }
        let cleaning = &analysis.cleaning;
        if cleaning.max_relative_spread <= 0.0 {
            return Err(OptionsError::ConfigError(
                "RND_MAX_SPREAD must be positive".to_string(),
            ));
        }
        if cleaning.moneyness_window <= 0.0 || cleaning.moneyness_window >= 1.0 {
            return Err(OptionsError::ConfigError(
                "RND_MONEYNESS_WINDOW must lie in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| OptionsError::ConfigError(format!("failed to install logger: {}", e)))?;

        Ok(())
    }
}
