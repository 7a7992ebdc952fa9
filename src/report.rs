//! Report output: PNG charts, an HTML report with inline SVG charts, a PDF
//! report embedding the PNGs, a JSON summary and the long density table.

use crate::config::Config;
use crate::error::Result;
use crate::models::{DailyAnalysis, DensityStats, MaturityAnalysis, SkippedMaturity};
use crate::utils::pdf::PdfReport;
use crate::utils::polars_utils::{
    cache_dataframe_to_parquet, densities_to_dataframe, write_csv, DensityRecord,
};
use crate::utils::{
    density_overlay_svg, density_svg, plot_density, plot_density_overlay, plot_price_curve,
    price_curve_svg,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Files produced by [`write_reports`]
#[derive(Debug, Clone, Default)]
pub struct ReportPaths {
    pub html: PathBuf,
    pub pdf: PathBuf,
    pub summary_json: PathBuf,
    pub densities_csv: Option<PathBuf>,
    pub densities_parquet: Option<PathBuf>,
    pub charts: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct MaturitySummary<'a> {
    target_days: u32,
    expiration: NaiveDate,
    dte: f64,
    time_to_expiry: f64,
    spot: f64,
    forward: f64,
    fit_method: String,
    atm_vol: Option<f64>,
    observed_points: usize,
    raw_mass: f64,
    negative_mass: f64,
    prob_below_spot: f64,
    stats: &'a DensityStats,
}

#[derive(Debug, Serialize)]
struct DaySummary<'a> {
    quote_date: NaiveDate,
    spot: Option<f64>,
    maturities: Vec<MaturitySummary<'a>>,
    skipped: &'a [SkippedMaturity],
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    generated_at: DateTime<Utc>,
    config: &'a Config,
    days: Vec<DaySummary<'a>>,
}

impl<'a> From<&'a MaturityAnalysis> for MaturitySummary<'a> {
    fn from(m: &'a MaturityAnalysis) -> Self {
        Self {
            target_days: m.target_days,
            expiration: m.expiration,
            dte: m.dte,
            time_to_expiry: m.time_to_expiry,
            spot: m.spot,
            forward: m.forward,
            fit_method: m.fit_method.to_string(),
            atm_vol: m.atm_vol,
            observed_points: m.observed.len(),
            raw_mass: m.density.raw_mass,
            negative_mass: m.density.negative_mass,
            prob_below_spot: m.prob_below_spot,
            stats: &m.stats,
        }
    }
}

/// Write every report artifact for `days` into the configured output dir
pub fn write_reports(days: &[DailyAnalysis], config: &Config) -> Result<ReportPaths> {
    let dir = &config.output.dir;
    fs::create_dir_all(dir)?;

    let mut paths = ReportPaths {
        html: dir.join("report.html"),
        pdf: dir.join("report.pdf"),
        summary_json: dir.join("summary.json"),
        ..Default::default()
    };

    for day in days {
        write_day_charts(day, dir, &mut paths.charts);
    }

    let summary = RunSummary {
        generated_at: Utc::now(),
        config,
        days: days
            .iter()
            .map(|d| DaySummary {
                quote_date: d.quote_date,
                spot: d.spot,
                maturities: d.maturities.iter().map(MaturitySummary::from).collect(),
                skipped: &d.skipped,
            })
            .collect(),
    };
    fs::write(&paths.summary_json, serde_json::to_string_pretty(&summary)?)?;
    info!("Summary written to {}", paths.summary_json.display());

    let records: Vec<DensityRecord<'_>> = days
        .iter()
        .flat_map(|d| {
            d.maturities.iter().map(move |m| DensityRecord {
                quote_date: d.quote_date,
                target_days: m.target_days,
                expiration: m.expiration,
                density: &m.density,
            })
        })
        .collect();

    if records.is_empty() {
        warn!("No densities recovered; skipping density table");
    } else {
        let df = densities_to_dataframe(&records)?;
        let csv_path = dir.join("densities.csv");
        write_csv(&df, &csv_path)?;
        info!("Density table ({} rows) written to {}", df.height(), csv_path.display());
        paths.densities_csv = Some(csv_path);

        if config.output.export_parquet {
            let parquet_path = dir.join("densities.parquet");
            cache_dataframe_to_parquet(&df, &parquet_path)?;
            paths.densities_parquet = Some(parquet_path);
        }
    }

    fs::write(&paths.html, render_html(days, config))?;
    info!("HTML report written to {}", paths.html.display());

    write_pdf(days, config, &paths.charts, &paths.pdf)?;
    info!("PDF report written to {}", paths.pdf.display());

    Ok(paths)
}

fn write_day_charts(day: &DailyAnalysis, dir: &Path, charts: &mut Vec<PathBuf>) {
    let date = day.quote_date.format("%Y-%m-%d");

    for m in &day.maturities {
        let curve_path = dir.join(format!("{}_{}d_price_curve.png", date, m.target_days));
        match plot_price_curve(m, day.quote_date, &curve_path) {
            Ok(()) => charts.push(curve_path),
            Err(e) => warn!("Price curve chart for {} {}d failed: {}", date, m.target_days, e),
        }

        let density_path = dir.join(format!("{}_{}d_density.png", date, m.target_days));
        match plot_density(m, day.quote_date, &density_path) {
            Ok(()) => charts.push(density_path),
            Err(e) => warn!("Density chart for {} {}d failed: {}", date, m.target_days, e),
        }
    }

    if day.maturities.len() > 1 {
        let overlay_path = dir.join(format!("{}_densities.png", date));
        match plot_density_overlay(day, &overlay_path) {
            Ok(()) => charts.push(overlay_path),
            Err(e) => warn!("Density overlay for {} failed: {}", date, e),
        }
    }
    debug!("Charts for {} done", date);
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn svg_or_note(svg: Result<String>, what: &str) -> String {
    match svg {
        Ok(svg) => format!("<div class=\"chart\">{}</div>\n", svg),
        Err(e) => {
            warn!("{} chart unavailable: {}", what, e);
            format!(
                "<p class=\"note\">{} chart unavailable: {}</p>\n",
                escape_html(what),
                escape_html(&e.to_string())
            )
        }
    }
}

fn stats_table(day: &DailyAnalysis) -> String {
    let mut html = String::from(
        "<table>\n<tr><th>Target</th><th>Expiry</th><th>T (years)</th><th>Points</th>\
         <th>Forward</th><th>ATM vol</th><th>Mean</th><th>Std dev</th><th>Skew</th>\
         <th>Ex. kurtosis</th><th>Mode</th><th>5%</th><th>Median</th><th>95%</th>\
         <th>P(S<sub>T</sub> &lt; S<sub>0</sub>)</th><th>Raw mass</th></tr>\n",
    );
    for m in &day.maturities {
        let s = &m.stats;
        let atm = m
            .atm_vol
            .map(|v| format!("{:.2}%", v * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            html,
            "<tr><td>{}d</td><td>{}</td><td>{:.5}</td><td>{}</td><td>{:.2}</td><td>{}</td>\
             <td>{:.2}</td><td>{:.2}</td><td>{:.3}</td><td>{:.3}</td><td>{:.2}</td>\
             <td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.3}</td><td>{:.3}</td></tr>",
            m.target_days,
            m.expiration,
            m.time_to_expiry,
            m.observed.len(),
            m.forward,
            atm,
            s.mean,
            s.std_dev,
            s.skewness,
            s.excess_kurtosis,
            s.mode,
            s.q05,
            s.median,
            s.q95,
            m.prob_below_spot,
            m.density.raw_mass
        );
    }
    html.push_str("</table>\n");
    html
}

fn render_html(days: &[DailyAnalysis], config: &Config) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Risk-neutral densities</title>\n<style>\n\
         body { font-family: sans-serif; margin: 2em; }\n\
         table { border-collapse: collapse; margin: 1em 0; }\n\
         th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: right; }\n\
         .chart svg { max-width: 100%; height: auto; }\n\
         .note { color: #a33; }\n\
         </style>\n</head>\n<body>\n<h1>Risk-neutral densities</h1>\n",
    );

    let _ = writeln!(
        html,
        "<p>Source: {}. Fit: {}. Risk-free rate: {:.2}%. Grid: {} points.</p>",
        escape_html(&config.data.path.display().to_string()),
        config.analysis.fit_method,
        config.analysis.risk_free_rate * 100.0,
        config.analysis.grid_points
    );

    if days.is_empty() {
        html.push_str("<p>No quote dates were analyzed.</p>\n");
    }

    for day in days {
        let _ = writeln!(html, "<h2>{}</h2>", day.quote_date);
        if let Some(spot) = day.spot {
            let _ = writeln!(html, "<p>Spot: {:.2}</p>", spot);
        }

        if day.maturities.is_empty() {
            html.push_str("<p>No maturities could be analyzed.</p>\n");
        } else {
            html.push_str(&stats_table(day));
        }

        if !day.skipped.is_empty() {
            html.push_str("<ul>\n");
            for s in &day.skipped {
                let _ = writeln!(
                    html,
                    "<li class=\"note\">{}d skipped: {}</li>",
                    s.target_days,
                    escape_html(&s.reason)
                );
            }
            html.push_str("</ul>\n");
        }

        if day.maturities.len() > 1 {
            html.push_str(&svg_or_note(density_overlay_svg(day), "Density overlay"));
        }
        for m in &day.maturities {
            let _ = writeln!(html, "<h3>{}d target, expiry {}</h3>", m.target_days, m.expiration);
            html.push_str(&svg_or_note(density_svg(m, day.quote_date), "Density"));
            html.push_str(&svg_or_note(price_curve_svg(m, day.quote_date), "Price curve"));
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn day_charts<'a>(day: &DailyAnalysis, charts: &'a [PathBuf]) -> Vec<&'a PathBuf> {
    let prefix = format!("{}_", day.quote_date.format("%Y-%m-%d"));
    charts
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(&prefix))
        })
        .collect()
}

fn stats_lines(m: &MaturityAnalysis) -> [String; 4] {
    let s = &m.stats;
    let atm = m
        .atm_vol
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "-".to_string());
    [
        format!(
            "{}d target: expiry {}, T = {:.5}y, {} points, forward {:.2}, ATM vol {}",
            m.target_days,
            m.expiration,
            m.time_to_expiry,
            m.observed.len(),
            m.forward,
            atm
        ),
        format!(
            "    mean {:.2}, std dev {:.2}, skew {:.3}, excess kurtosis {:.3}, mode {:.2}",
            s.mean, s.std_dev, s.skewness, s.excess_kurtosis, s.mode
        ),
        format!(
            "    5% {:.2}, median {:.2}, 95% {:.2}",
            s.q05, s.median, s.q95
        ),
        format!(
            "    P(S_T < S_0) {:.3}, raw mass {:.3}, clipped mass {:.4}",
            m.prob_below_spot, m.density.raw_mass, m.density.negative_mass
        ),
    ]
}

fn write_pdf(days: &[DailyAnalysis], config: &Config, charts: &[PathBuf], path: &Path) -> Result<()> {
    let mut pdf = PdfReport::new("Risk-neutral densities")?;
    pdf.line(&format!(
        "Source: {}. Fit: {}. Risk-free rate: {:.2}%. Grid: {} points.",
        config.data.path.display(),
        config.analysis.fit_method,
        config.analysis.risk_free_rate * 100.0,
        config.analysis.grid_points
    ));
    if days.is_empty() {
        pdf.line("No quote dates were analyzed.");
    }

    for (i, day) in days.iter().enumerate() {
        if i > 0 {
            pdf.new_page();
        }
        pdf.heading(&day.quote_date.to_string());
        if let Some(spot) = day.spot {
            pdf.line(&format!("Spot: {:.2}", spot));
        }
        if day.maturities.is_empty() {
            pdf.line("No maturities could be analyzed.");
        }
        for m in &day.maturities {
            for line in stats_lines(m) {
                pdf.line(&line);
            }
        }
        for s in &day.skipped {
            pdf.line(&format!("{}d skipped: {}", s.target_days, s.reason));
        }

        for chart in day_charts(day, charts) {
            if let Err(e) = pdf.png(chart) {
                warn!("Could not embed {} in the PDF: {}", chart.display(), e);
                pdf.line(&format!("Chart {} unavailable: {}", chart.display(), e));
            }
        }
    }

    debug!("PDF report has {} pages", pdf.page_count());
    pdf.save(path)
}
