//! Bracketing root finder used for implied volatility inversion.

use crate::error::{OptionsError, Result};

/// Tolerances for Brent's method
#[derive(Debug, Clone, Copy)]
pub struct BrentConfig {
    pub xtol: f64,
    pub rtol: f64,
    pub max_iter: usize,
}

impl Default for BrentConfig {
    fn default() -> Self {
        Self {
            xtol: 1e-12,
            rtol: 1e-12,
            max_iter: 200,
        }
    }
}

/// Find a root of `f` in `[lo, hi]` with Brent's method (inverse quadratic
/// interpolation guarded by bisection). `f(lo)` and `f(hi)` must differ in
/// sign.
pub fn brent<F>(f: F, lo: f64, hi: f64, config: &BrentConfig) -> Result<f64>
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = (lo, hi);
    let (mut fa, mut fb) = (f(a), f(b));

    if !fa.is_finite() || !fb.is_finite() {
        return Err(OptionsError::Other(format!(
            "objective is not finite at the bracket ends: f({})={}, f({})={}",
            a, fa, b, fb
        )));
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa * fb > 0.0 {
        return Err(OptionsError::Other(format!(
            "root is not bracketed: f({})={:.6e}, f({})={:.6e}",
            a, fa, b, fb
        )));
    }

    // c is the previous iterate, b the best estimate, a the contrapoint
    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for _ in 0..config.max_iter {
        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * config.rtol * b.abs() + 0.5 * config.xtol;
        let m = 0.5 * (c - b);
        if m.abs() <= tol || fb == 0.0 {
            return Ok(b);
        }

        if e.abs() >= tol && fa.abs() > fb.abs() {
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                // secant
                (2.0 * m * s, 1.0 - s)
            } else {
                // inverse quadratic
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * m * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            } else {
                p = -p;
            }
            if 2.0 * p < (3.0 * m * q - (tol * q).abs()).min((e * q).abs()) {
                e = d;
                d = p / q;
            } else {
                d = m;
                e = m;
            }
        } else {
            d = m;
            e = m;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(m) };
        fb = f(b);
    }

    Err(OptionsError::Other(format!(
        "Brent's method did not converge in {} iterations",
        config.max_iter
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn finds_polynomial_root() {
        let root = brent(|x| x * x - 2.0, 0.0, 2.0, &BrentConfig::default()).unwrap();
        assert_abs_diff_eq!(root, 2f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn finds_transcendental_root() {
        let root = brent(|x| x.cos() - x, 0.0, 1.0, &BrentConfig::default()).unwrap();
        assert_abs_diff_eq!(root, 0.739_085_133_215_160_6, epsilon = 1e-10);
    }

    #[test]
    fn root_at_bracket_end() {
        let root = brent(|x| x - 1.0, 1.0, 3.0, &BrentConfig::default()).unwrap();
        assert_eq!(root, 1.0);
    }

    #[test]
    fn unbracketed_root_is_an_error() {
        assert!(brent(|x| x * x + 1.0, -1.0, 1.0, &BrentConfig::default()).is_err());
    }
}
