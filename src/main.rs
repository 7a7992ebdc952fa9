//! options-rnd command-line application
//!
//! Recovers risk-neutral densities from a historical option chain CSV:
//! 1. Load configuration from the environment and command-line arguments
//! 2. Fit call price curves for each target maturity and quote date
//! 3. Differentiate them into densities (Breeden-Litzenberger)
//! 4. Write charts, HTML and PDF reports, a JSON summary and the density table
//!
//! Usage: `options-rnd [DATA_CSV] [QUOTE_DATE ...]`

use options_rnd::config::Config;
use options_rnd::error::Result;
use options_rnd::{pipeline, report};
use std::env;
use tracing::{info, warn};

fn main() -> Result<()> {
    let mut config = Config::from_env()?;
    config.apply_args(env::args().skip(1))?;
    config.validate()?;
    config.init_logging()?;

    info!("Starting options-rnd");
    info!(
        "Maturities {:?}, fit {}, rate {:.3}",
        config.analysis.maturities, config.analysis.fit_method, config.analysis.risk_free_rate
    );

    let days = pipeline::run(&config)?;

    let analyzed: usize = days.iter().map(|d| d.maturities.len()).sum();
    let skipped: usize = days.iter().map(|d| d.skipped.len()).sum();
    info!(
        "Recovered {} densities over {} quote dates ({} skipped)",
        analyzed,
        days.len(),
        skipped
    );
    if analyzed == 0 {
        warn!("No densities could be recovered; the report will only list skipped maturities");
    }

    let paths = report::write_reports(&days, &config)?;
    info!("Report saved to {:?}", paths.html);
    info!("PDF report saved to {:?}", paths.pdf);
    info!("Summary saved to {:?}", paths.summary_json);
    if let Some(csv) = &paths.densities_csv {
        info!("Density table saved to {:?}", csv);
    }
    if let Some(parquet) = &paths.densities_parquet {
        info!("Density table (Parquet) saved to {:?}", parquet);
    }
    info!("{} charts written to {:?}", paths.charts.len(), config.output.dir);

    Ok(())
}
