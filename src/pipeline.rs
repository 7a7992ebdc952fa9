//! End-to-end density recovery: load chains, pick the expiry nearest each
//! target maturity, fit the call curve and differentiate it.

use crate::config::Config;
use crate::error::{OptionsError, Result};
use crate::models::{DailyAnalysis, MaturityAnalysis, OptionChain, SkippedMaturity};
use crate::utils::fitting::{fit_price_curve, implied_vol_at};
use crate::utils::polars_utils::{
    dataframe_to_chains, filter_quote_dates, quote_dates, read_option_chain_csv,
};
use crate::utils::{breeden_litzenberger, lognormal_density, raw_density};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Samples of the fitted curve kept for charting
const FITTED_SAMPLES: usize = 200;

/// Chains settling sooner than half a day after the quote are never used
const MIN_TIME_TO_EXPIRY: f64 = 0.5 / 365.0;

/// Chain whose days to expiry is closest to `target_days`, within
/// `tolerance` days. Ties go to the shorter expiry. Same-day expiries are
/// excluded.
pub fn select_chain(
    chains: &[OptionChain],
    target_days: u32,
    tolerance: f64,
) -> Option<&OptionChain> {
    let target = target_days as f64;
    chains
        .iter()
        .filter(|c| c.expiration > c.quote_date && c.time_to_expiry() >= MIN_TIME_TO_EXPIRY)
        .filter(|c| (c.dte - target).abs() <= tolerance)
        .min_by(|a, b| {
            let da = (a.dte - target).abs();
            let db = (b.dte - target).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.dte.partial_cmp(&b.dte).unwrap_or(std::cmp::Ordering::Equal))
        })
}

pub fn analyze_chain(
    chain: &OptionChain,
    target_days: u32,
    config: &Config,
) -> Result<MaturityAnalysis> {
    let analysis = &config.analysis;
    let rate = analysis.risk_free_rate;
    let t = chain.time_to_expiry();
    let spot = chain.underlying;

    let observed = chain.call_price_curve(rate, &analysis.cleaning)?;
    if observed.len() < analysis.min_points {
        return Err(OptionsError::DataError(format!(
            "only {} usable strikes for expiry {} (need {})",
            observed.len(),
            chain.expiration,
            analysis.min_points
        )));
    }
    debug!(
        "Fitting {} points for expiry {} (T = {:.5}y) with {}",
        observed.len(),
        chain.expiration,
        t,
        analysis.fit_method
    );

    let curve = fit_price_curve(&observed, spot, t, rate, analysis.fit_method)?;
    let density = breeden_litzenberger(curve.as_ref(), t, rate, analysis.grid_points)?;
    let raw = raw_density(&observed, t, rate);

    let forward = chain.forward(rate);
    let (lo, hi) = curve.strike_range();
    let atm_vol = implied_vol_at(curve.as_ref(), forward.clamp(lo, hi), spot, t, rate);
    let lognormal = match atm_vol {
        Some(vol) => lognormal_density(&density.strikes, spot, t, rate, vol)?,
        None => {
            warn!("No ATM implied vol for expiry {}", chain.expiration);
            Vec::new()
        }
    };

    let stats = density.stats().ok_or_else(|| {
        OptionsError::DensityError(format!(
            "density for expiry {} has no mass",
            chain.expiration
        ))
    })?;
    let prob_below_spot = density.probability_below(spot);

    let step = (hi - lo) / (FITTED_SAMPLES - 1) as f64;
    let fitted = (0..FITTED_SAMPLES)
        .map(|i| {
            let k = lo + i as f64 * step;
            (k, curve.price(k))
        })
        .collect();

    Ok(MaturityAnalysis {
        target_days,
        expiration: chain.expiration,
        dte: chain.dte,
        time_to_expiry: t,
        spot,
        forward,
        fit_method: analysis.fit_method,
        atm_vol,
        observed,
        fitted,
        density,
        raw_density: raw,
        lognormal,
        stats,
        prob_below_spot,
    })
}

/// Analyze every configured maturity for the chains of one quote date
pub fn analyze_day(quote_date: NaiveDate, chains: &[OptionChain], config: &Config) -> DailyAnalysis {
    let mut maturities = Vec::new();
    let mut skipped = Vec::new();

    for &target_days in &config.analysis.maturities {
        let outcome = match select_chain(chains, target_days, config.analysis.dte_tolerance) {
            Some(chain) => analyze_chain(chain, target_days, config),
            None => Err(OptionsError::DataError(format!(
                "no expiry within {} days of {}d",
                config.analysis.dte_tolerance, target_days
            ))),
        };

        match outcome {
            Ok(analysis) => {
                info!(
                    "{} {}d (expiry {}): mean {:.2}, sd {:.2}, skew {:.3}, P(S_T < S_0) {:.3}",
                    quote_date,
                    target_days,
                    analysis.expiration,
                    analysis.stats.mean,
                    analysis.stats.std_dev,
                    analysis.stats.skewness,
                    analysis.prob_below_spot
                );
                maturities.push(analysis);
            }
            Err(e) => {
                warn!("Skipping {} {}d: {}", quote_date, target_days, e);
                skipped.push(SkippedMaturity {
                    target_days,
                    reason: e.to_string(),
                });
            }
        }
    }

    DailyAnalysis {
        quote_date,
        spot: chains.first().map(|c| c.underlying),
        maturities,
        skipped,
    }
}

/// Load the configured CSV and analyze the selected quote dates
pub fn run(config: &Config) -> Result<Vec<DailyAnalysis>> {
    info!("Loading option chains from {}", config.data.path.display());
    let mut df = read_option_chain_csv(&config.data.path)?;

    if !config.data.quote_dates.is_empty() {
        df = filter_quote_dates(&df, &config.data.quote_dates)?;
    }

    let mut dates = quote_dates(&df)?;
    for wanted in &config.data.quote_dates {
        if !dates.contains(wanted) {
            warn!("Quote date {} not found in data", wanted);
        }
    }
    if let Some(max) = config.data.max_dates {
        if dates.len() > max {
            dates.truncate(max);
            df = filter_quote_dates(&df, &dates)?;
        }
    }
    if dates.is_empty() {
        return Err(OptionsError::DataError(
            "no quote dates left to analyze".to_string(),
        ));
    }

    let mut by_date: BTreeMap<NaiveDate, Vec<OptionChain>> = BTreeMap::new();
    for chain in dataframe_to_chains(&df)? {
        by_date.entry(chain.quote_date).or_default().push(chain);
    }
    info!(
        "Analyzing {} quote dates, maturities {:?}",
        dates.len(),
        config.analysis.maturities
    );

    let days = dates
        .into_iter()
        .map(|date| {
            let chains = by_date.get(&date).map(Vec::as_slice).unwrap_or(&[]);
            analyze_day(date, chains, config)
        })
        .collect();

    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptionType, QuoteSide, StrikeQuote};
    use crate::utils::black_scholes;
    use approx::assert_abs_diff_eq;

    const SPOT: f64 = 4000.0;
    const SIGMA: f64 = 0.18;

    fn side(mid: f64) -> Option<QuoteSide> {
        Some(QuoteSide {
            bid: Some(mid * 0.99),
            ask: Some(mid * 1.01),
            volume: Some(100),
            ..Default::default()
        })
    }

    fn chain(days: i64, rate: f64) -> OptionChain {
        let quote_date = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        let quote_time = quote_date.and_hms_opt(21, 0, 0).unwrap().and_utc();
        let mut chain = OptionChain {
            quote_date,
            quote_time,
            expiration: quote_date + chrono::Duration::days(days),
            dte: days as f64,
            underlying: SPOT,
            quotes: Vec::new(),
        };
        let t = chain.time_to_expiry();
        let step = if days <= 1 { 5.0 } else { 10.0 };
        let mut strike = 3200.0;
        while strike <= 4800.0 {
            let call = black_scholes::price(SPOT, strike, t, rate, SIGMA, OptionType::Call);
            let put = black_scholes::price(SPOT, strike, t, rate, SIGMA, OptionType::Put);
            if call > 0.05 || put > 0.05 {
                chain.quotes.push(StrikeQuote {
                    strike,
                    call: (call > 0.05).then(|| side(call)).flatten(),
                    put: (put > 0.05).then(|| side(put)).flatten(),
                });
            }
            strike += step;
        }
        chain
    }

    #[test]
    fn selects_nearest_expiry_preferring_shorter() {
        let chains = vec![chain(6, 0.0), chain(8, 0.0), chain(28, 0.0)];
        assert_eq!(select_chain(&chains, 7, 1.0).unwrap().dte, 6.0);
        assert_eq!(select_chain(&chains, 27, 1.0).unwrap().dte, 28.0);
        assert!(select_chain(&chains, 14, 1.0).is_none());
        assert!(select_chain(&chains, 1, 1.0).is_none());
    }

    #[test]
    fn same_day_expiry_never_stands_in() {
        let rate = 0.0;
        // Friday quote: same-day expiry and the following Monday
        let chains = vec![chain(0, rate), chain(3, rate)];
        assert!(select_chain(&chains, 1, 1.0).is_none());
        assert_eq!(select_chain(&chains, 1, 2.0).unwrap().dte, 3.0);

        // Without the exclusion the tie would go to the same-day chain
        let chains = vec![chain(0, rate), chain(2, rate)];
        assert_eq!(select_chain(&chains, 1, 1.0).unwrap().dte, 2.0);

        let config = Config::default();
        let day = analyze_day(chains[0].quote_date, &[chain(0, rate)], &config);
        assert!(day.maturities.is_empty());
        assert_eq!(day.skipped.len(), 3);
    }

    #[test]
    fn analyze_chain_recovers_forward() {
        let config = Config::default();
        let rate = config.analysis.risk_free_rate;
        let c = chain(28, rate);
        let analysis = analyze_chain(&c, 28, &config).unwrap();

        assert_abs_diff_eq!(analysis.density.mass(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(analysis.stats.mean, analysis.forward, epsilon = 0.005 * SPOT);
        assert_abs_diff_eq!(analysis.atm_vol.unwrap(), SIGMA, epsilon = 0.01);
        assert_eq!(analysis.lognormal.len(), analysis.density.strikes.len());
        assert_eq!(analysis.fitted.len(), FITTED_SAMPLES);
        assert!(analysis.prob_below_spot > 0.4 && analysis.prob_below_spot < 0.6);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let mut config = Config::default();
        config.analysis.min_points = 10_000;
        let c = chain(7, config.analysis.risk_free_rate);
        assert!(matches!(
            analyze_chain(&c, 7, &config),
            Err(OptionsError::DataError(_))
        ));
    }

    #[test]
    fn missing_maturities_are_skipped() {
        let config = Config::default();
        let rate = config.analysis.risk_free_rate;
        let chains = vec![chain(7, rate), chain(28, rate)];
        let date = chains[0].quote_date;
        let day = analyze_day(date, &chains, &config);

        assert_eq!(day.spot, Some(SPOT));
        let analyzed: Vec<u32> = day.maturities.iter().map(|m| m.target_days).collect();
        assert_eq!(analyzed, vec![7, 28]);
        assert_eq!(day.skipped.len(), 1);
        assert_eq!(day.skipped[0].target_days, 1);
    }
}
