use thiserror::Error;

/// Custom error types for the options-rnd library
#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Volatility calculation error: {0}")]
    VolatilityError(String),

    #[error("Curve fitting error: {0}")]
    FitError(String),

    #[error("Density estimation error: {0}")]
    DensityError(String),

    #[error("Plotting error: {0}")]
    PlotError(String),

    #[error("Report error: {0}")]
    ReportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::prelude::PolarsError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OptionsError>;
