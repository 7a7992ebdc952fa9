//! Results of the per-day, per-maturity density analysis.

use crate::models::{CurvePoint, DensityStats, RiskNeutralDensity};
use crate::utils::fitting::FitMethod;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Density recovered for one target maturity on one quote date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturityAnalysis {
    /// Requested maturity in days
    pub target_days: u32,
    /// Listed expiry chosen for the target
    pub expiration: NaiveDate,
    pub dte: f64,
    /// Time to expiry in years
    pub time_to_expiry: f64,
    pub spot: f64,
    pub forward: f64,
    pub fit_method: FitMethod,
    /// Implied volatility of the fitted curve at the forward
    pub atm_vol: Option<f64>,
    /// Cleaned quotes the curve was fitted to
    pub observed: Vec<CurvePoint>,
    /// Fitted call prices sampled across the strike range
    pub fitted: Vec<(f64, f64)>,
    pub density: RiskNeutralDensity,
    /// Unsmoothed finite-difference density at the observed strikes
    pub raw_density: Vec<(f64, f64)>,
    /// Log-normal density at the ATM vol, on the density grid
    pub lognormal: Vec<f64>,
    pub stats: DensityStats,
    pub prob_below_spot: f64,
}

/// A maturity that could not be analyzed, with the reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedMaturity {
    pub target_days: u32,
    pub reason: String,
}

/// Every maturity analyzed for one quote date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAnalysis {
    pub quote_date: NaiveDate,
    pub spot: Option<f64>,
    pub maturities: Vec<MaturityAnalysis>,
    pub skipped: Vec<SkippedMaturity>,
}
