//! Risk-neutral density on a strike grid and its summary statistics.

use serde::{Deserialize, Serialize};

/// Density of the underlying at expiry, sampled on an increasing strike grid
/// and normalized to unit mass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskNeutralDensity {
    pub strikes: Vec<f64>,
    pub density: Vec<f64>,
    /// Integral of the discounted second derivative before normalization;
    /// values well below one mean the strike range misses tail mass
    pub raw_mass: f64,
    /// Mass removed by clipping negative second derivatives
    pub negative_mass: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityStats {
    pub mean: f64,
    pub std_dev: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub mode: f64,
    pub q05: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub q95: f64,
}

/// Trapezoid integral of `f(x)·y` over the grid
fn integrate<F: Fn(f64) -> f64>(xs: &[f64], ys: &[f64], f: F) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| 0.5 * (f(x[0]) * y[0] + f(x[1]) * y[1]) * (x[1] - x[0]))
        .sum()
}

impl RiskNeutralDensity {
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    /// Total mass on the grid (one after normalization)
    pub fn mass(&self) -> f64 {
        integrate(&self.strikes, &self.density, |_| 1.0)
    }

    /// Cumulative distribution at each grid strike
    pub fn cdf(&self) -> Vec<f64> {
        let mut cdf = Vec::with_capacity(self.strikes.len());
        let mut acc = 0.0;
        cdf.push(0.0);
        for i in 1..self.strikes.len() {
            let dx = self.strikes[i] - self.strikes[i - 1];
            acc += 0.5 * (self.density[i] + self.density[i - 1]) * dx;
            cdf.push(acc);
        }
        cdf
    }

    /// Strike at which the cumulative probability reaches `p`
    pub fn quantile(&self, p: f64) -> Option<f64> {
        if self.strikes.len() < 2 || !(0.0..=1.0).contains(&p) {
            return None;
        }
        let cdf = self.cdf();
        let total = cdf[cdf.len() - 1];
        if total <= 0.0 {
            return None;
        }
        let target = p * total;
        let i = cdf.partition_point(|&c| c < target);
        if i == 0 {
            return Some(self.strikes[0]);
        }
        if i >= cdf.len() {
            return Some(self.strikes[self.strikes.len() - 1]);
        }
        let (c0, c1) = (cdf[i - 1], cdf[i]);
        let (k0, k1) = (self.strikes[i - 1], self.strikes[i]);
        if c1 - c0 <= 0.0 {
            return Some(k1);
        }
        Some(k0 + (target - c0) / (c1 - c0) * (k1 - k0))
    }

    /// Probability that the underlying settles below `level`
    pub fn probability_below(&self, level: f64) -> f64 {
        let total = self.mass();
        if total <= 0.0 || self.strikes.is_empty() {
            return 0.0;
        }
        let cdf = self.cdf();
        let n = self.strikes.len();
        if level <= self.strikes[0] {
            return 0.0;
        }
        if level >= self.strikes[n - 1] {
            return 1.0;
        }
        let i = self.strikes.partition_point(|&k| k <= level);
        let (k0, k1) = (self.strikes[i - 1], self.strikes[i]);
        let (d0, d1) = (self.density[i - 1], self.density[i]);
        let w = (level - k0) / (k1 - k0);
        let d_level = d0 + w * (d1 - d0);
        (cdf[i - 1] + 0.5 * (d0 + d_level) * (level - k0)) / total
    }

    pub fn stats(&self) -> Option<DensityStats> {
        let total = self.mass();
        if self.strikes.len() < 2 || total <= 0.0 {
            return None;
        }
        let xs = &self.strikes;
        let ys = &self.density;

        let mean = integrate(xs, ys, |x| x) / total;
        let moment = |p: i32| integrate(xs, ys, |x| (x - mean).powi(p)) / total;
        let variance = moment(2);
        let std_dev = variance.sqrt();
        let (skewness, excess_kurtosis) = if variance > 0.0 {
            (moment(3) / std_dev.powi(3), moment(4) / (variance * variance) - 3.0)
        } else {
            (0.0, 0.0)
        };

        let mode = xs
            .iter()
            .zip(ys)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, _)| *k)
            .unwrap_or(mean);

        Some(DensityStats {
            mean,
            std_dev,
            skewness,
            excess_kurtosis,
            mode,
            q05: self.quantile(0.05)?,
            q25: self.quantile(0.25)?,
            median: self.quantile(0.5)?,
            q75: self.quantile(0.75)?,
            q95: self.quantile(0.95)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Unit-mass uniform density on [0, 10]
    fn uniform() -> RiskNeutralDensity {
        let strikes: Vec<f64> = (0..=100).map(|i| i as f64 * 0.1).collect();
        let density = vec![0.1; strikes.len()];
        RiskNeutralDensity {
            strikes,
            density,
            raw_mass: 1.0,
            negative_mass: 0.0,
        }
    }

    #[test]
    fn uniform_moments() {
        let d = uniform();
        assert_abs_diff_eq!(d.mass(), 1.0, epsilon = 1e-12);
        let stats = d.stats().unwrap();
        assert_abs_diff_eq!(stats.mean, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.std_dev, (100.0f64 / 12.0).sqrt(), epsilon = 1e-3);
        assert_abs_diff_eq!(stats.skewness, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.excess_kurtosis, -1.2, epsilon = 1e-3);
        assert_abs_diff_eq!(stats.median, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.q05, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(stats.q95, 9.5, epsilon = 1e-9);
    }

    #[test]
    fn cdf_and_probabilities() {
        let d = uniform();
        let cdf = d.cdf();
        assert_eq!(cdf[0], 0.0);
        assert_abs_diff_eq!(cdf[cdf.len() - 1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.probability_below(2.5), 0.25, epsilon = 1e-9);
        assert_abs_diff_eq!(d.probability_below(2.55), 0.255, epsilon = 1e-9);
        assert_eq!(d.probability_below(-1.0), 0.0);
        assert_eq!(d.probability_below(11.0), 1.0);
    }

    #[test]
    fn quantile_bounds() {
        let d = uniform();
        assert_eq!(d.quantile(0.0), Some(0.0));
        assert_abs_diff_eq!(d.quantile(1.0).unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(d.quantile(1.5), None);
    }

    #[test]
    fn empty_density_has_no_stats() {
        let d = RiskNeutralDensity {
            strikes: vec![1.0, 2.0],
            density: vec![0.0, 0.0],
            raw_mass: 0.0,
            negative_mass: 0.0,
        };
        assert!(d.stats().is_none());
        assert_eq!(d.probability_below(1.5), 0.0);
    }
}
