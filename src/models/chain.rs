//! Option chain for a single expiry observed on a single quote date, and the
//! cleaning rules that turn raw quotes into a call price curve.

use crate::config::CleaningConfig;
use crate::error::{OptionsError, Result};
use crate::models::option::{OptionType, QuoteSide, StrikeQuote};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Expiries settle at 21:30 UTC on the expiration date
const EXPIRY_HOUR_UTC: u32 = 21;
const EXPIRY_MINUTE_UTC: u32 = 30;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Strikes closer than this are treated as the same strike
const STRIKE_EPSILON: f64 = 1e-9;

/// Which market a curve point was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Call,
    PutParity,
}

/// A cleaned (strike, call price) observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub strike: f64,
    pub price: f64,
    pub source: PriceSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChain {
    pub quote_date: NaiveDate,
    /// Moment the quotes were taken
    pub quote_time: DateTime<Utc>,
    pub expiration: NaiveDate,
    /// Days to expiry as reported by the data vendor
    pub dte: f64,
    /// Underlying level at quote time
    pub underlying: f64,
    pub quotes: Vec<StrikeQuote>,
}

impl OptionChain {
    /// Time to expiration in years, measured from the quote time to the
    /// settlement time of the expiration date
    pub fn time_to_expiry(&self) -> f64 {
        let settlement = self
            .expiration
            .and_hms_opt(EXPIRY_HOUR_UTC, EXPIRY_MINUTE_UTC, 0)
            .map(|dt| dt.and_utc());

        let tte = match settlement {
            Some(settlement) => (settlement - self.quote_time).num_seconds() as f64 / SECONDS_PER_YEAR,
            None => 0.0,
        };

        if tte > 0.0 {
            tte
        } else if self.dte > 0.0 {
            self.dte / 365.0
        } else {
            0.0
        }
    }

    pub fn forward(&self, rate: f64) -> f64 {
        self.underlying * (rate * self.time_to_expiry()).exp()
    }

    /// Cleaned call prices across strikes, sorted by strike
    pub fn call_price_curve(&self, rate: f64, cleaning: &CleaningConfig) -> Result<Vec<CurvePoint>> {
        let t = self.time_to_expiry();
        if t <= 0.0 {
            return Err(OptionsError::DataError(format!(
                "chain {} -> {} has already expired",
                self.quote_date, self.expiration
            )));
        }
        if !(self.underlying.is_finite() && self.underlying > 0.0) {
            return Err(OptionsError::DataError(format!(
                "chain {} -> {} has invalid underlying price {}",
                self.quote_date, self.expiration, self.underlying
            )));
        }

        let spot = self.underlying;
        let discount = (-rate * t).exp();
        let lower = spot * (1.0 - cleaning.moneyness_window);
        let upper = spot * (1.0 + cleaning.moneyness_window);

        let mut points = Vec::with_capacity(self.quotes.len());
        for quote in &self.quotes {
            let strike = quote.strike;
            if !strike.is_finite() || strike <= 0.0 || strike < lower || strike > upper {
                continue;
            }

            let call = usable_mid(quote, OptionType::Call, cleaning).map(|price| CurvePoint {
                strike,
                price,
                source: PriceSource::Call,
            });
            let parity = if cleaning.use_put_parity {
                usable_mid(quote, OptionType::Put, cleaning)
                    .map(|put| put + spot - strike * discount)
                    .filter(|price| *price > 0.0)
                    .map(|price| CurvePoint {
                        strike,
                        price,
                        source: PriceSource::PutParity,
                    })
            } else {
                None
            };

            // Out-of-the-money quotes are the liquid ones
            let chosen = if strike < spot {
                parity.or(call)
            } else {
                call.or(parity)
            };
            if let Some(point) = chosen {
                points.push(point);
            }
        }

        points.sort_by(|a, b| {
            a.strike
                .partial_cmp(&b.strike)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut points = merge_duplicate_strikes(points);

        if cleaning.enforce_no_arbitrage {
            let before = points.len();
            points.retain(|p| {
                let intrinsic = (spot - p.strike * discount).max(0.0);
                p.price >= intrinsic - 1e-8 && p.price <= spot
            });
            let bound_drops = before - points.len();
            let monotone_drops = enforce_monotone(&mut points);
            if bound_drops + monotone_drops > 0 {
                debug!(
                    "Chain {} -> {}: dropped {} points outside price bounds, {} non-monotone",
                    self.quote_date, self.expiration, bound_drops, monotone_drops
                );
            }
        }

        trace!(
            "Chain {} -> {}: {} cleaned points from {} strikes",
            self.quote_date,
            self.expiration,
            points.len(),
            self.quotes.len()
        );

        Ok(points)
    }
}

fn usable_mid(quote: &StrikeQuote, option_type: OptionType, cleaning: &CleaningConfig) -> Option<f64> {
    let side: &QuoteSide = quote.side(option_type)?;
    if cleaning.min_volume > 0 && side.volume.unwrap_or(0) < cleaning.min_volume {
        return None;
    }
    match (side.mid(), side.relative_spread()) {
        (Some(mid), Some(spread)) => (spread <= cleaning.max_relative_spread).then_some(mid),
        _ if cleaning.use_last_price => side.last_price(),
        _ => None,
    }
}

/// Average the prices of points sharing a strike; input must be sorted
fn merge_duplicate_strikes(points: Vec<CurvePoint>) -> Vec<CurvePoint> {
    let mut merged: Vec<CurvePoint> = Vec::with_capacity(points.len());
    let mut count = 0usize;
    for point in points {
        match merged.last_mut() {
            Some(last) if (point.strike - last.strike).abs() < STRIKE_EPSILON => {
                count += 1;
                last.price += (point.price - last.price) / count as f64;
            }
            _ => {
                merged.push(point);
                count = 1;
            }
        }
    }
    merged
}

/// Remove points until call prices are non-increasing in strike, returning
/// how many were dropped. At each violation the point further from the line
/// through its neighbours is removed.
fn enforce_monotone(points: &mut Vec<CurvePoint>) -> usize {
    let mut dropped = 0;
    while let Some(j) = points.windows(2).position(|w| w[1].price > w[0].price) {
        let drop = if line_residual(points, j) > line_residual(points, j + 1) {
            j
        } else {
            j + 1
        };
        points.remove(drop);
        dropped += 1;
    }
    dropped
}

/// Distance of point `i` from the straight line through its two nearest
/// neighbours (extrapolated at the edges)
fn line_residual(points: &[CurvePoint], i: usize) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let (a, b) = if i == 0 {
        (points[1], points[2])
    } else if i == n - 1 {
        (points[n - 3], points[n - 2])
    } else {
        (points[i - 1], points[i + 1])
    };
    let slope = (b.price - a.price) / (b.strike - a.strike);
    let expected = a.price + slope * (points[i].strike - a.strike);
    (points[i].price - expected).abs()
}
