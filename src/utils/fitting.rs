//! Smooth call price curves fitted to cleaned chain observations.
//!
//! The density recovery differentiates the fitted curve twice, so the choice
//! of fit matters far more than the interpolation accuracy at the knots:
//! splining raw prices reproduces every bit of quote noise in `C''`, while
//! splining the smile in implied volatility space and repricing with
//! Black-Scholes gives a much smoother curve.

use crate::error::{OptionsError, Result};
use crate::models::{CurvePoint, OptionType};
use crate::utils::black_scholes;
use crate::utils::spline::CubicSpline;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Floor applied to interpolated implied volatilities
const MIN_VOL: f64 = 1e-4;

/// Points whose time value is below this share of the price carry no usable
/// volatility information and are left out of the smile
const MIN_TIME_VALUE_SHARE: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitMethod {
    /// Natural cubic spline through the call prices
    CubicSpline,
    /// Natural cubic spline through the implied volatility smile, repriced
    /// with Black-Scholes
    ImpliedVolSpline,
    /// Least-squares polynomial in standardized strike
    Polynomial { degree: usize },
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::CubicSpline => write!(f, "spline"),
            FitMethod::ImpliedVolSpline => write!(f, "iv-spline"),
            FitMethod::Polynomial { degree } => write!(f, "poly:{}", degree),
        }
    }
}

impl FromStr for FitMethod {
    type Err = OptionsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "spline" | "cubic-spline" => Ok(FitMethod::CubicSpline),
            "iv-spline" | "iv" => Ok(FitMethod::ImpliedVolSpline),
            other => {
                let degree = other
                    .strip_prefix("poly:")
                    .or_else(|| other.strip_prefix("polynomial:"))
                    .ok_or_else(|| {
                        OptionsError::ParseError(format!(
                            "unknown fit method '{}' (expected spline, iv-spline or poly:<degree>)",
                            other
                        ))
                    })?
                    .parse::<usize>()
                    .map_err(|e| {
                        OptionsError::ParseError(format!("invalid polynomial degree: {}", e))
                    })?;
                if degree < 2 {
                    return Err(OptionsError::ParseError(format!(
                        "polynomial degree must be at least 2 to have curvature, got {}",
                        degree
                    )));
                }
                Ok(FitMethod::Polynomial { degree })
            }
        }
    }
}

/// A call price as a function of strike
pub trait PriceCurve: fmt::Debug {
    fn price(&self, strike: f64) -> f64;

    /// Strikes the curve was fitted on
    fn strike_range(&self) -> (f64, f64);

    fn method(&self) -> FitMethod;
}

#[derive(Debug, Clone)]
pub struct SplinePriceCurve {
    spline: CubicSpline,
}

impl PriceCurve for SplinePriceCurve {
    fn price(&self, strike: f64) -> f64 {
        self.spline.value(strike)
    }

    fn strike_range(&self) -> (f64, f64) {
        self.spline.domain()
    }

    fn method(&self) -> FitMethod {
        FitMethod::CubicSpline
    }
}

#[derive(Debug, Clone)]
pub struct ImpliedVolCurve {
    smile: CubicSpline,
    spot: f64,
    t: f64,
    rate: f64,
}

impl ImpliedVolCurve {
    pub fn vol(&self, strike: f64) -> f64 {
        self.smile.value(strike).max(MIN_VOL)
    }
}

impl PriceCurve for ImpliedVolCurve {
    fn price(&self, strike: f64) -> f64 {
        black_scholes::price(
            self.spot,
            strike,
            self.t,
            self.rate,
            self.vol(strike),
            OptionType::Call,
        )
    }

    fn strike_range(&self) -> (f64, f64) {
        self.smile.domain()
    }

    fn method(&self) -> FitMethod {
        FitMethod::ImpliedVolSpline
    }
}

#[derive(Debug, Clone)]
pub struct PolynomialCurve {
    /// Coefficients in increasing power of the standardized strike
    coeffs: Array1<f64>,
    center: f64,
    scale: f64,
    range: (f64, f64),
}

impl PriceCurve for PolynomialCurve {
    fn price(&self, strike: f64) -> f64 {
        let x = (strike - self.center) / self.scale;
        self.coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    fn strike_range(&self) -> (f64, f64) {
        self.range
    }

    fn method(&self) -> FitMethod {
        FitMethod::Polynomial {
            degree: self.coeffs.len() - 1,
        }
    }
}

/// Fit a call price curve to cleaned points (sorted by strike)
pub fn fit_price_curve(
    points: &[CurvePoint],
    spot: f64,
    t: f64,
    rate: f64,
    method: FitMethod,
) -> Result<Box<dyn PriceCurve>> {
    if points.len() < 3 {
        return Err(OptionsError::FitError(format!(
            "need at least 3 points to fit a price curve, got {}",
            points.len()
        )));
    }

    let strikes: Vec<f64> = points.iter().map(|p| p.strike).collect();
    let prices: Vec<f64> = points.iter().map(|p| p.price).collect();

    match method {
        FitMethod::CubicSpline => Ok(Box::new(SplinePriceCurve {
            spline: CubicSpline::new(strikes, prices)?,
        })),
        FitMethod::ImpliedVolSpline => {
            let curve = fit_implied_vol_curve(points, spot, t, rate)?;
            Ok(Box::new(curve))
        }
        FitMethod::Polynomial { degree } => {
            let curve = fit_polynomial(&strikes, &prices, degree)?;
            Ok(Box::new(curve))
        }
    }
}

pub fn fit_implied_vol_curve(
    points: &[CurvePoint],
    spot: f64,
    t: f64,
    rate: f64,
) -> Result<ImpliedVolCurve> {
    let mut strikes = Vec::with_capacity(points.len());
    let mut vols = Vec::with_capacity(points.len());
    let discount = (-rate * t).exp();
    for p in points {
        let time_value = p.price - (spot - p.strike * discount).max(0.0);
        if time_value < MIN_TIME_VALUE_SHARE * p.price {
            debug!("Skipping strike {} in smile fit: no time value", p.strike);
            continue;
        }
        match black_scholes::implied_volatility(p.price, spot, p.strike, t, rate, OptionType::Call) {
            Ok(iv) => {
                strikes.push(p.strike);
                vols.push(iv);
            }
            Err(e) => debug!("Skipping strike {} in smile fit: {}", p.strike, e),
        }
    }

    if strikes.len() < 3 {
        return Err(OptionsError::FitError(format!(
            "only {} of {} points could be inverted to implied volatility",
            strikes.len(),
            points.len()
        )));
    }

    Ok(ImpliedVolCurve {
        smile: CubicSpline::new(strikes, vols)?,
        spot,
        t,
        rate,
    })
}

pub fn fit_polynomial(strikes: &[f64], prices: &[f64], degree: usize) -> Result<PolynomialCurve> {
    if degree < 2 {
        return Err(OptionsError::FitError(format!(
            "polynomial degree must be at least 2, got {}",
            degree
        )));
    }
    let n = strikes.len();
    if n <= degree {
        return Err(OptionsError::FitError(format!(
            "degree {} polynomial needs more than {} points, got {}",
            degree, degree, n
        )));
    }

    let lo = strikes.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = strikes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let center = 0.5 * (lo + hi);
    let scale = 0.5 * (hi - lo);
    if !(scale > 0.0) {
        return Err(OptionsError::FitError(
            "polynomial fit needs at least two distinct strikes".to_string(),
        ));
    }

    let mut design = Array2::<f64>::zeros((n, degree + 1));
    for (i, &k) in strikes.iter().enumerate() {
        let x = (k - center) / scale;
        let mut power = 1.0;
        for j in 0..=degree {
            design[[i, j]] = power;
            power *= x;
        }
    }
    let y = Array1::from_vec(prices.to_vec());

    let normal = design.t().dot(&design);
    let rhs = design.t().dot(&y);
    let coeffs = solve_linear_system(normal, rhs)?;

    Ok(PolynomialCurve {
        coeffs,
        center,
        scale,
        range: (lo, hi),
    })
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                a[[i, col]]
                    .abs()
                    .partial_cmp(&a[[j, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-14 {
            return Err(OptionsError::FitError(
                "singular system in polynomial fit".to_string(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

/// Black-Scholes implied volatility of the fitted curve at `strike`
pub fn implied_vol_at(curve: &dyn PriceCurve, strike: f64, spot: f64, t: f64, rate: f64) -> Option<f64> {
    black_scholes::implied_volatility(curve.price(strike), spot, strike, t, rate, OptionType::Call).ok()
}
