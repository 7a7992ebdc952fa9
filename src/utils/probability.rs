use crate::error::{OptionsError, Result};
use crate::models::{CurvePoint, RiskNeutralDensity};
use crate::utils::fitting::PriceCurve;
use statrs::distribution::{Continuous, LogNormal};
use tracing::{debug, warn};

/// Recover the risk-neutral density from a fitted call price curve with the
/// Breeden-Litzenberger relation `q(K) = e^{rT} ∂²C/∂K²`.
///
/// The second derivative is a central difference on a uniform grid lying
/// strictly inside the fitted strike range. Negative values (butterfly
/// arbitrage in the fit) are clipped to zero before normalizing.
pub fn breeden_litzenberger(
    curve: &dyn PriceCurve,
    t: f64,
    risk_free_rate: f64,
    grid_points: usize,
) -> Result<RiskNeutralDensity> {
    if t <= 0.0 {
        return Err(OptionsError::DensityError(format!(
            "time to expiry must be positive, got {}",
            t
        )));
    }
    if grid_points < 3 {
        return Err(OptionsError::DensityError(format!(
            "density grid needs at least 3 points, got {}",
            grid_points
        )));
    }

    let (lo, hi) = curve.strike_range();
    if !(hi > lo) {
        return Err(OptionsError::DensityError(format!(
            "degenerate strike range [{}, {}]",
            lo, hi
        )));
    }

    // Grid spacing doubles as the finite difference step; the outermost
    // stencil points land exactly on the range ends
    let h = (hi - lo) / (grid_points + 1) as f64;
    let growth = (risk_free_rate * t).exp();

    let mut strikes = Vec::with_capacity(grid_points);
    let mut density = Vec::with_capacity(grid_points);
    let mut raw = Vec::with_capacity(grid_points);
    for i in 1..=grid_points {
        let k = lo + i as f64 * h;
        let second = (curve.price(k + h) - 2.0 * curve.price(k) + curve.price(k - h)) / (h * h);
        let val = growth * second;
        strikes.push(k);
        raw.push(if val.is_finite() { val } else { 0.0 });
        density.push(if val.is_finite() && val > 0.0 { val } else { 0.0 });
    }

    let raw_mass = trapezoid(&strikes, &density);
    let signed_mass = trapezoid(&strikes, &raw);
    let negative_mass = (raw_mass - signed_mass).max(0.0);

    if raw_mass <= 0.0 {
        return Err(OptionsError::DensityError(
            "fitted curve has no positive curvature".to_string(),
        ));
    }
    if negative_mass > 0.05 * raw_mass {
        warn!(
            "{:.1}% of the curvature mass was negative and clipped",
            100.0 * negative_mass / raw_mass
        );
    }
    debug!(
        "Density over [{:.2}, {:.2}]: raw mass {:.4}, clipped {:.4}",
        lo, hi, raw_mass, negative_mass
    );

    for d in &mut density {
        *d /= raw_mass;
    }

    Ok(RiskNeutralDensity {
        strikes,
        density,
        raw_mass,
        negative_mass,
    })
}

fn trapezoid(xs: &[f64], ys: &[f64]) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| 0.5 * (y[0] + y[1]) * (x[1] - x[0]))
        .sum()
}

/// Density straight from the cleaned quotes with a three-point second
/// difference on the (possibly uneven) strike spacing. No smoothing, so it
/// is only a diagnostic next to the fitted density.
pub fn raw_density(points: &[CurvePoint], t: f64, risk_free_rate: f64) -> Vec<(f64, f64)> {
    if points.len() < 3 || t <= 0.0 {
        return Vec::new();
    }
    let growth = (risk_free_rate * t).exp();

    points
        .windows(3)
        .filter_map(|w| {
            let (k0, k1, k2) = (w[0].strike, w[1].strike, w[2].strike);
            let (c0, c1, c2) = (w[0].price, w[1].price, w[2].price);
            let (h0, h1) = (k1 - k0, k2 - k1);
            if h0 <= 0.0 || h1 <= 0.0 {
                return None;
            }
            let second = 2.0 * ((c2 - c1) / h1 - (c1 - c0) / h0) / (h0 + h1);
            let val = growth * second;
            val.is_finite().then_some((k1, val.max(0.0)))
        })
        .collect()
}

/// Log-normal density implied by Black-Scholes with a single volatility
pub fn lognormal_density(
    strikes: &[f64],
    spot: f64,
    t: f64,
    risk_free_rate: f64,
    sigma: f64,
) -> Result<Vec<f64>> {
    let scale = sigma * t.sqrt();
    let location = spot.ln() + (risk_free_rate - 0.5 * sigma * sigma) * t;
    let dist = LogNormal::new(location, scale).map_err(|e| {
        OptionsError::DensityError(format!(
            "invalid log-normal parameters (mu={}, sigma={}): {}",
            location, scale, e
        ))
    })?;
    Ok(strikes.iter().map(|&k| dist.pdf(k)).collect())
}
