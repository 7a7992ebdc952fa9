use crate::error::{OptionsError, Result};
use crate::models::{DailyAnalysis, MaturityAnalysis, PriceSource};
use chrono::NaiveDate;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 800;

/// Raw finite-difference points above this multiple of the fitted peak are
/// left off the chart
const RAW_CLIP_FACTOR: f64 = 3.0;

fn series_color(i: usize) -> RGBColor {
    let c = colorous::CATEGORY10[i % colorous::CATEGORY10.len()];
    RGBColor(c.r, c.g, c.b)
}

fn bounds<I: Iterator<Item = f64>>(values: I) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

fn draw_price_curve<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    analysis: &MaturityAnalysis,
    quote_date: NaiveDate,
) -> Result<()> {
    if analysis.observed.is_empty() {
        return Err(OptionsError::PlotError(
            "No observed prices for price curve plot".to_string(),
        ));
    }

    let (min_strike, max_strike) = bounds(analysis.observed.iter().map(|p| p.strike));
    let (_, max_price) = bounds(
        analysis
            .observed
            .iter()
            .map(|p| p.price)
            .chain(analysis.fitted.iter().map(|(_, c)| *c)),
    );
    let strike_range = (max_strike - min_strike).max(1.0);
    let strike_min = min_strike - 0.02 * strike_range;
    let strike_max = max_strike + 0.02 * strike_range;
    let price_max = max_price * 1.05;

    root.fill(&WHITE)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    let mut chart = ChartBuilder::on(root)
        .caption(
            format!(
                "Call prices {} - {}d target (expiry {}, {})",
                quote_date, analysis.target_days, analysis.expiration, analysis.fit_method
            ),
            ("sans-serif", 24).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(strike_min..strike_max, 0.0..price_max)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Strike")
        .y_desc("Call price")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    let fit_color = series_color(0);
    chart
        .draw_series(LineSeries::new(
            analysis.fitted.iter().copied(),
            fit_color.stroke_width(2),
        ))
        .map_err(|e| OptionsError::PlotError(e.to_string()))?
        .label("Fitted curve")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], fit_color.stroke_width(2)));

    for (i, (source, label)) in [
        (PriceSource::Call, "Call mid"),
        (PriceSource::PutParity, "Put mid via parity"),
    ]
    .into_iter()
    .enumerate()
    {
        let color = series_color(i + 1);
        chart
            .draw_series(
                analysis
                    .observed
                    .iter()
                    .filter(|p| p.source == source)
                    .map(|p| Circle::new((p.strike, p.price), 3, color.filled())),
            )
            .map_err(|e| OptionsError::PlotError(e.to_string()))?
            .label(label)
            .legend(move |(x, y)| Circle::new((x + 10, y), 3, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    Ok(())
}

fn draw_density<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    analysis: &MaturityAnalysis,
    quote_date: NaiveDate,
) -> Result<()> {
    let density = &analysis.density;
    if density.is_empty() {
        return Err(OptionsError::PlotError(
            "No density values for density plot".to_string(),
        ));
    }

    let strike_min = density.strikes[0];
    let strike_max = density.strikes[density.strikes.len() - 1];
    let (_, peak) = bounds(density.density.iter().copied().chain(analysis.lognormal.iter().copied()));
    let y_max = (peak * 1.1).max(f64::MIN_POSITIVE);

    root.fill(&WHITE)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    let mut chart = ChartBuilder::on(root)
        .caption(
            format!(
                "Risk-neutral density {} - {}d target (expiry {})",
                quote_date, analysis.target_days, analysis.expiration
            ),
            ("sans-serif", 24).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(strike_min..strike_max, 0.0..y_max)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Underlying at expiry")
        .y_desc("Density")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    let bl_color = series_color(0);
    chart
        .draw_series(LineSeries::new(
            density.strikes.iter().copied().zip(density.density.iter().copied()),
            bl_color.stroke_width(2),
        ))
        .map_err(|e| OptionsError::PlotError(e.to_string()))?
        .label("Breeden-Litzenberger")
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], bl_color.stroke_width(2)));

    if !analysis.lognormal.is_empty() {
        let ln_color = series_color(3);
        let label = match analysis.atm_vol {
            Some(vol) => format!("Log-normal, ATM vol {:.1}%", vol * 100.0),
            None => "Log-normal".to_string(),
        };
        chart
            .draw_series(LineSeries::new(
                density.strikes.iter().copied().zip(analysis.lognormal.iter().copied()),
                ln_color.stroke_width(1),
            ))
            .map_err(|e| OptionsError::PlotError(e.to_string()))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ln_color.stroke_width(1)));
    }

    let raw_color = series_color(7);
    chart
        .draw_series(
            analysis
                .raw_density
                .iter()
                .filter(|(k, v)| {
                    *k >= strike_min && *k <= strike_max && *v <= RAW_CLIP_FACTOR * peak
                })
                .map(|&(k, v)| Circle::new((k, v.min(y_max)), 3, raw_color.filled())),
        )
        .map_err(|e| OptionsError::PlotError(e.to_string()))?
        .label("Quote finite differences")
        .legend(move |(x, y)| Circle::new((x + 10, y), 3, raw_color.filled()));

    if analysis.spot >= strike_min && analysis.spot <= strike_max {
        chart
            .draw_series(LineSeries::new(
                vec![(analysis.spot, 0.0), (analysis.spot, y_max)],
                BLACK.mix(0.5),
            ))
            .map_err(|e| OptionsError::PlotError(e.to_string()))?
            .label(format!("Spot {:.2}", analysis.spot))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.5)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    Ok(())
}

fn draw_density_overlay<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    day: &DailyAnalysis,
) -> Result<()> {
    if day.maturities.is_empty() {
        return Err(OptionsError::PlotError(format!(
            "No densities to overlay for {}",
            day.quote_date
        )));
    }

    let (strike_min, strike_max) = bounds(
        day.maturities
            .iter()
            .flat_map(|m| m.density.strikes.iter().copied()),
    );
    let (_, peak) = bounds(
        day.maturities
            .iter()
            .flat_map(|m| m.density.density.iter().copied()),
    );
    let y_max = (peak * 1.1).max(f64::MIN_POSITIVE);

    root.fill(&WHITE)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    let mut chart = ChartBuilder::on(root)
        .caption(
            format!("Risk-neutral densities by maturity - {}", day.quote_date),
            ("sans-serif", 24).into_font(),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(strike_min..strike_max, 0.0..y_max)
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Underlying at expiry")
        .y_desc("Density")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    for (i, m) in day.maturities.iter().enumerate() {
        let color = series_color(i);
        chart
            .draw_series(LineSeries::new(
                m.density.strikes.iter().copied().zip(m.density.density.iter().copied()),
                color.stroke_width(2),
            ))
            .map_err(|e| OptionsError::PlotError(e.to_string()))?
            .label(format!("{}d (expiry {})", m.target_days, m.expiration))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    if let Some(spot) = day.spot {
        chart
            .draw_series(LineSeries::new(
                vec![(spot, 0.0), (spot, y_max)],
                BLACK.mix(0.5),
            ))
            .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;

    Ok(())
}

/// Observed call prices and the fitted curve, as a PNG file
pub fn plot_price_curve<P: AsRef<Path>>(
    analysis: &MaturityAnalysis,
    quote_date: NaiveDate,
    output_path: P,
) -> Result<()> {
    let root = BitMapBackend::new(output_path.as_ref(), (WIDTH, HEIGHT)).into_drawing_area();
    draw_price_curve(&root, analysis, quote_date)?;
    root.present()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    Ok(())
}

pub fn price_curve_svg(analysis: &MaturityAnalysis, quote_date: NaiveDate) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        draw_price_curve(&root, analysis, quote_date)?;
        root.present()
            .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    }
    Ok(svg)
}

/// Recovered density with the log-normal reference and raw quote
/// differences, as a PNG file
pub fn plot_density<P: AsRef<Path>>(
    analysis: &MaturityAnalysis,
    quote_date: NaiveDate,
    output_path: P,
) -> Result<()> {
    let root = BitMapBackend::new(output_path.as_ref(), (WIDTH, HEIGHT)).into_drawing_area();
    draw_density(&root, analysis, quote_date)?;
    root.present()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    Ok(())
}

pub fn density_svg(analysis: &MaturityAnalysis, quote_date: NaiveDate) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        draw_density(&root, analysis, quote_date)?;
        root.present()
            .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    }
    Ok(svg)
}

/// All maturities of one quote date on a single chart, as a PNG file
pub fn plot_density_overlay<P: AsRef<Path>>(day: &DailyAnalysis, output_path: P) -> Result<()> {
    let root = BitMapBackend::new(output_path.as_ref(), (WIDTH, HEIGHT)).into_drawing_area();
    draw_density_overlay(&root, day)?;
    root.present()
        .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    Ok(())
}

pub fn density_overlay_svg(day: &DailyAnalysis) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        draw_density_overlay(&root, day)?;
        root.present()
            .map_err(|e| OptionsError::PlotError(e.to_string()))?;
    }
    Ok(svg)
}
