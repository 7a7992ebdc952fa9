//! Integration tests for the density pipeline.
//!
//! Writes a synthetic Black-Scholes chain in the wide vendor CSV layout,
//! runs loading, cleaning, fitting and differentiation end to end, and
//! checks the written report files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use chrono::{Duration, NaiveDate};
use options_rnd::config::Config;
use options_rnd::models::OptionType;
use options_rnd::utils::black_scholes;
use options_rnd::utils::fitting::FitMethod;
use options_rnd::{pipeline, report, OptionsError};

const SPOT: f64 = 4000.0;
const SIGMA: f64 = 0.18;
const RATE: f64 = 0.045;

/// Quotes below this price are left blank, like deep OTM strikes in vendor files
const MIN_QUOTE: f64 = 0.05;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Bid/ask around a mid, or blanks when the option is worthless
fn market(mid: f64) -> (String, String) {
    if mid < MIN_QUOTE {
        (String::new(), String::new())
    } else {
        (format!("{:.4}", mid * 0.99), format!("{:.4}", mid * 1.01))
    }
}

/// One quote date with the given expiries (in days), priced at a flat vol
fn write_chain_rows(csv: &mut String, quote_date: NaiveDate, expiries: &[i64]) {
    for &days in expiries {
        let expiry = quote_date + Duration::days(days);
        // Quotes taken at 21:00 UTC, settlement at 21:30 UTC
        let t = (days as f64 * 86400.0 + 1800.0) / (365.0 * 86400.0);
        let step = if days <= 1 { 5.0 } else { 10.0 };
        let mut strike = 3200.0;
        while strike <= 4800.0 {
            let call = black_scholes::price(SPOT, strike, t, RATE, SIGMA, OptionType::Call);
            let put = black_scholes::price(SPOT, strike, t, RATE, SIGMA, OptionType::Put);
            let (c_bid, c_ask) = market(call);
            let (p_bid, p_ask) = market(put);
            writeln!(
                csv,
                " {}, {:.2}, {}, {:.1}, {}, {}, 100, {:.1}, {}, {}, 100",
                quote_date, SPOT, expiry, days as f64, c_bid, c_ask, strike, p_bid, p_ask
            )
            .unwrap();
            strike += step;
        }
    }
}

fn write_synthetic_csv(dir: &Path) -> PathBuf {
    let mut csv = String::from(
        "[QUOTE_DATE], [UNDERLYING_LAST], [EXPIRE_DATE], [DTE], [C_BID], [C_ASK], [C_VOLUME], \
         [STRIKE], [P_BID], [P_ASK], [P_VOLUME]\n",
    );
    write_chain_rows(&mut csv, date(2023, 3, 1), &[1, 7, 28]);
    // No expiry near one day on the second date
    write_chain_rows(&mut csv, date(2023, 3, 2), &[7, 28]);

    let path = dir.join("spx_eod.csv");
    std::fs::write(&path, csv).unwrap();
    path
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.data.path = write_synthetic_csv(dir);
    config.output.dir = dir.join("output");
    config.analysis.risk_free_rate = RATE;
    config
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[test]
fn recovers_densities_for_every_listed_maturity() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let days = pipeline::run(&config).unwrap();
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].quote_date, date(2023, 3, 1));
    assert_eq!(days[0].spot, Some(SPOT));

    let first: Vec<u32> = days[0].maturities.iter().map(|m| m.target_days).collect();
    assert_eq!(first, vec![1, 7, 28]);
    assert!(days[0].skipped.is_empty());

    for m in days.iter().flat_map(|d| &d.maturities) {
        assert_abs_diff_eq!(m.density.mass(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.stats.mean, m.forward, epsilon = 0.005 * SPOT);
        assert_abs_diff_eq!(m.atm_vol.unwrap(), SIGMA, epsilon = 0.01);

        let expected_sd = m.forward * ((SIGMA * SIGMA * m.time_to_expiry).exp() - 1.0).sqrt();
        assert!(
            (m.stats.std_dev - expected_sd).abs() < 0.1 * expected_sd,
            "{}d: sd {} vs {}",
            m.target_days,
            m.stats.std_dev,
            expected_sd
        );
        assert!(m.stats.q05 < m.stats.median && m.stats.median < m.stats.q95);
    }

    // Longer maturities spread the distribution wider
    let sds: Vec<f64> = days[0].maturities.iter().map(|m| m.stats.std_dev).collect();
    assert!(sds[0] < sds[1] && sds[1] < sds[2]);
}

#[test]
fn missing_maturity_is_recorded_as_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let days = pipeline::run(&config).unwrap();
    let second = &days[1];
    assert_eq!(second.quote_date, date(2023, 3, 2));
    assert_eq!(second.maturities.len(), 2);
    assert_eq!(second.skipped.len(), 1);
    assert_eq!(second.skipped[0].target_days, 1);
}

#[test]
fn explicit_dates_and_fit_methods() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.data.quote_dates = vec![date(2023, 3, 2)];
    config.analysis.fit_method = FitMethod::CubicSpline;
    config.analysis.maturities = vec![28];

    let days = pipeline::run(&config).unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].quote_date, date(2023, 3, 2));
    let m = &days[0].maturities[0];
    assert_eq!(m.fit_method, FitMethod::CubicSpline);
    assert_abs_diff_eq!(m.stats.mean, m.forward, epsilon = 0.01 * SPOT);
}

#[test]
fn max_dates_caps_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.data.max_dates = Some(1);

    let days = pipeline::run(&config).unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].quote_date, date(2023, 3, 1));
}

#[test]
fn unknown_dates_leave_nothing_to_analyze() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.data.quote_dates = vec![date(2020, 1, 2)];

    assert!(matches!(pipeline::run(&config), Err(OptionsError::DataError(_))));
}

#[test]
fn missing_input_file_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data.path = dir.path().join("missing.csv");

    assert!(matches!(pipeline::run(&config), Err(OptionsError::DataError(_))));
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[test]
fn writes_html_pdf_json_and_density_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.output.export_parquet = true;

    let days = pipeline::run(&config).unwrap();
    let paths = report::write_reports(&days, &config).unwrap();

    let html = std::fs::read_to_string(&paths.html).unwrap();
    assert!(html.contains("2023-03-01"));
    assert!(html.contains("1d skipped"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.summary_json).unwrap()).unwrap();
    assert_eq!(summary["days"].as_array().unwrap().len(), 2);
    assert_eq!(summary["days"][0]["maturities"][2]["target_days"], 28);

    let csv_path = paths.densities_csv.unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let header = csv.lines().next().unwrap();
    assert_eq!(header, "quote_date,target_days,expiration,strike,density,cdf");
    // 5 densities on the default 400-point grid
    assert_eq!(csv.lines().count(), 1 + 5 * 400);

    assert!(paths.densities_parquet.unwrap().exists());

    let pdf = std::fs::read(&paths.pdf).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
    assert!(pdf.len() > 1024);
}
