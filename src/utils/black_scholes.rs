use crate::error::{OptionsError, Result};
use crate::models::OptionType;
use crate::utils::root::{brent, BrentConfig};
use statrs::distribution::ContinuousCDF;
use statrs::distribution::{Continuous, Normal};
use std::sync::OnceLock;

/// Initial implied volatility bracket
const VOL_LOW: f64 = 1e-12;
const VOL_HIGH: f64 = 50.0;
/// The upper bracket is doubled until it reaches this bound
const VOL_HIGH_MAX: f64 = 2000.0;

static NORMAL_DIST: OnceLock<Normal> = OnceLock::new();

fn get_normal() -> &'static Normal {
    NORMAL_DIST.get_or_init(|| Normal::new(0.0, 1.0).expect("unit normal parameters are valid"))
}

/// Calculate d1 parameter for Black-Scholes model
fn calculate_d1(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * t.sqrt())
}

/// Calculate d2 parameter for Black-Scholes model
fn calculate_d2(d1: f64, sigma: f64, t: f64) -> f64 {
    d1 - sigma * t.sqrt()
}

/// Black-Scholes option price
pub fn price(s: f64, k: f64, t: f64, r: f64, sigma: f64, option_type: OptionType) -> f64 {
    let n = get_normal();
    let d1 = calculate_d1(s, k, t, r, sigma);
    let d2 = calculate_d2(d1, sigma, t);
    match option_type {
        OptionType::Call => s * n.cdf(d1) - k * (-r * t).exp() * n.cdf(d2),
        OptionType::Put => k * (-r * t).exp() * n.cdf(-d2) - s * n.cdf(-d1),
    }
}

pub fn delta(s: f64, k: f64, t: f64, r: f64, sigma: f64, option_type: OptionType) -> f64 {
    let n = get_normal();
    let d1 = calculate_d1(s, k, t, r, sigma);
    match option_type {
        OptionType::Call => n.cdf(d1),
        OptionType::Put => n.cdf(d1) - 1.0,
    }
}

pub fn vega(s: f64, k: f64, t: f64, r: f64, sigma: f64) -> f64 {
    let d1 = calculate_d1(s, k, t, r, sigma);
    s * get_normal().pdf(d1) * t.sqrt()
}

/// No-arbitrage price bounds (lower, upper) of a European option
fn price_bounds(s: f64, k: f64, t: f64, r: f64, option_type: OptionType) -> (f64, f64) {
    let discounted_strike = k * (-r * t).exp();
    match option_type {
        OptionType::Call => ((s - discounted_strike).max(0.0), s),
        OptionType::Put => ((discounted_strike - s).max(0.0), discounted_strike),
    }
}

/// Implied volatility by Brent root finding. The upper end of the bracket is
/// widened until the root is enclosed.
pub fn implied_volatility(
    price_target: f64,
    s: f64,
    k: f64,
    t: f64,
    r: f64,
    option_type: OptionType,
) -> Result<f64> {
    if !(price_target > 0.0 && s > 0.0 && k > 0.0 && t > 0.0) {
        return Err(OptionsError::VolatilityError(format!(
            "invalid input: price={}, spot={}, strike={}, t={}",
            price_target, s, k, t
        )));
    }

    let (lower, upper) = price_bounds(s, k, t, r, option_type);
    if price_target <= lower || price_target >= upper {
        return Err(OptionsError::VolatilityError(format!(
            "{} price {:.6} at strike {} is outside the no-arbitrage range ({:.6}, {:.6})",
            option_type, price_target, k, lower, upper
        )));
    }

    let err = |sigma: f64| price(s, k, t, r, sigma, option_type) - price_target;

    let vol_low = VOL_LOW;
    let mut vol_high = VOL_HIGH;
    let f_low = err(vol_low);
    let mut f_high = err(vol_high);
    while f_low * f_high > 0.0 && vol_high < VOL_HIGH_MAX {
        vol_high *= 2.0;
        f_high = err(vol_high);
    }

    if f_low * f_high > 0.0 {
        return Err(OptionsError::VolatilityError(format!(
            "could not bracket implied vol at strike {}: err({})={:.6e}, err({})={:.6e}",
            k, vol_low, f_low, vol_high, f_high
        )));
    }

    brent(err, vol_low, vol_high, &BrentConfig::default())
        .map_err(|e| OptionsError::VolatilityError(format!("strike {}: {}", k, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn textbook_call_price() {
        // Hull: S=42, K=40, r=10%, sigma=20%, T=0.5 -> c=4.76, p=0.81
        let call = price(42.0, 40.0, 0.5, 0.1, 0.2, OptionType::Call);
        let put = price(42.0, 40.0, 0.5, 0.1, 0.2, OptionType::Put);
        assert_abs_diff_eq!(call, 4.76, epsilon = 0.01);
        assert_abs_diff_eq!(put, 0.81, epsilon = 0.01);
    }

    #[test]
    fn put_call_parity_holds() {
        let (s, k, t, r, sigma) = (100.0, 95.0, 0.25, 0.03, 0.25);
        let call = price(s, k, t, r, sigma, OptionType::Call);
        let put = price(s, k, t, r, sigma, OptionType::Put);
        assert_abs_diff_eq!(call - put, s - k * (-r * t).exp(), epsilon = 1e-10);
    }

    #[test]
    fn cached_normal_is_standard() {
        let n = get_normal();
        assert_abs_diff_eq!(n.cdf(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(n.cdf(1.959964), 0.975, epsilon = 1e-6);
        assert_abs_diff_eq!(n.pdf(0.0), 1.0 / (2.0 * std::f64::consts::PI).sqrt(), epsilon = 1e-15);
        assert!(std::ptr::eq(n, get_normal()));
    }

    #[test]
    fn greeks_are_sane() {
        let d = delta(100.0, 100.0, 1.0, 0.0, 0.2, OptionType::Call);
        assert!(d > 0.5 && d < 0.6);
        let dp = delta(100.0, 100.0, 1.0, 0.0, 0.2, OptionType::Put);
        assert_abs_diff_eq!(d - dp, 1.0, epsilon = 1e-12);
        assert!(vega(100.0, 100.0, 1.0, 0.0, 0.2) > 0.0);
    }

    #[test]
    fn implied_vol_round_trip() {
        for &(k, option_type) in &[
            (80.0, OptionType::Put),
            (100.0, OptionType::Call),
            (120.0, OptionType::Call),
        ] {
            let p = price(100.0, k, 28.0 / 365.0, 0.045, 0.35, option_type);
            let iv = implied_volatility(p, 100.0, k, 28.0 / 365.0, 0.045, option_type).unwrap();
            assert_abs_diff_eq!(iv, 0.35, epsilon = 1e-6);
        }
    }

    #[test]
    fn implied_vol_needs_bracket_expansion() {
        let p = price(100.0, 100.0, 1.0 / 365.0, 0.0, 80.0, OptionType::Call);
        let iv = implied_volatility(p, 100.0, 100.0, 1.0 / 365.0, 0.0, OptionType::Call).unwrap();
        assert_abs_diff_eq!(iv, 80.0, epsilon = 1e-5);
    }

    #[test]
    fn implied_vol_rejects_arbitrage_prices() {
        // Below intrinsic
        assert!(implied_volatility(5.0, 110.0, 100.0, 0.1, 0.0, OptionType::Call).is_err());
        // Above the spot
        assert!(implied_volatility(120.0, 100.0, 100.0, 0.1, 0.0, OptionType::Call).is_err());
        assert!(implied_volatility(-1.0, 100.0, 100.0, 0.1, 0.0, OptionType::Call).is_err());
    }
}
