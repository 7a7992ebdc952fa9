//! Natural cubic spline interpolation.
//!
//! Knot second derivatives come from the tridiagonal system solved with the
//! Thomas algorithm, with `S''` pinned to zero at both ends. Outside the knot
//! range the spline continues along its end tangent, so the second derivative
//! is zero there.

use crate::error::{OptionsError, Result};
use serde::{Deserialize, Serialize};

/// `S(x) = a + b·dx + c·dx² + d·dx³` on `[xᵢ, xᵢ₊₁]` with `dx = x - xᵢ`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Segment {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubicSpline {
    xs: Vec<f64>,
    segments: Vec<Segment>,
    /// Slopes at the first and last knot, used for extrapolation
    left_slope: f64,
    right_slope: f64,
    right_value: f64,
}

impl CubicSpline {
    /// Build a spline through `(xs[i], ys[i])`; needs at least three strictly
    /// increasing finite knots
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(OptionsError::FitError(format!(
                "spline needs equal length inputs, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 3 {
            return Err(OptionsError::FitError(format!(
                "spline requires at least 3 knots, got {}",
                xs.len()
            )));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(OptionsError::FitError(
                "spline knots must be finite".to_string(),
            ));
        }
        if let Some(i) = xs.windows(2).position(|w| w[1] <= w[0]) {
            return Err(OptionsError::FitError(format!(
                "spline knots must be strictly increasing: x[{}]={} >= x[{}]={}",
                i,
                xs[i],
                i + 1,
                xs[i + 1]
            )));
        }

        let n = xs.len();
        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

        // Second derivatives at the knots, zero at both ends
        let mut m = vec![0.0; n];
        let interior = n - 2;
        if interior > 0 {
            let mut diag = vec![0.0; interior];
            let mut rhs = vec![0.0; interior];
            for j in 0..interior {
                let i = j + 1;
                diag[j] = 2.0 * (h[i - 1] + h[i]);
                rhs[j] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
            }
            // Forward sweep; sub- and super-diagonal entries are h[j] and h[j+1]
            for j in 1..interior {
                let w = h[j] / diag[j - 1];
                diag[j] -= w * h[j];
                rhs[j] -= w * rhs[j - 1];
            }
            m[interior] = rhs[interior - 1] / diag[interior - 1];
            for j in (0..interior - 1).rev() {
                m[j + 1] = (rhs[j] - h[j + 1] * m[j + 2]) / diag[j];
            }
        }

        let segments: Vec<Segment> = (0..n - 1)
            .map(|i| Segment {
                a: ys[i],
                b: (ys[i + 1] - ys[i]) / h[i] - h[i] * (2.0 * m[i] + m[i + 1]) / 6.0,
                c: m[i] / 2.0,
                d: (m[i + 1] - m[i]) / (6.0 * h[i]),
            })
            .collect();

        let left_slope = segments[0].b;
        let last = segments[n - 2];
        let hl = h[n - 2];
        let right_slope = last.b + 2.0 * last.c * hl + 3.0 * last.d * hl * hl;

        Ok(Self {
            right_value: ys[n - 1],
            xs,
            segments,
            left_slope,
            right_slope,
        })
    }

    /// Knot range `(first, last)`
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    fn locate(&self, x: f64) -> usize {
        let i = self.xs.partition_point(|&k| k <= x);
        i.saturating_sub(1).min(self.segments.len() - 1)
    }

    pub fn value(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        if x < lo {
            return self.segments[0].a + self.left_slope * (x - lo);
        }
        if x > hi {
            return self.right_value + self.right_slope * (x - hi);
        }
        let i = self.locate(x);
        let s = &self.segments[i];
        let dx = x - self.xs[i];
        s.a + dx * (s.b + dx * (s.c + dx * s.d))
    }

    pub fn derivative(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        if x < lo {
            return self.left_slope;
        }
        if x > hi {
            return self.right_slope;
        }
        let i = self.locate(x);
        let s = &self.segments[i];
        let dx = x - self.xs[i];
        s.b + dx * (2.0 * s.c + 3.0 * s.d * dx)
    }

    pub fn second_derivative(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        if x < lo || x > hi {
            return 0.0;
        }
        let i = self.locate(x);
        let s = &self.segments[i];
        2.0 * s.c + 6.0 * s.d * (x - self.xs[i])
    }
}
