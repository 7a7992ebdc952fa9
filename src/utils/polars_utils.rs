use crate::error::{OptionsError, Result};
use crate::models::{OptionChain, QuoteSide, RiskNeutralDensity, StrikeQuote};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Columns every input file must provide (after header normalization)
pub const REQUIRED_COLUMNS: &[&str] = &[
    "quote_date",
    "underlying_last",
    "expire_date",
    "dte",
    "strike",
    "c_bid",
    "c_ask",
    "p_bid",
    "p_ask",
];

/// Columns used when present
pub const OPTIONAL_COLUMNS: &[&str] = &[
    "quote_unixtime",
    "c_last",
    "c_volume",
    "p_last",
    "p_volume",
];

const F64_COLUMNS: &[&str] = &[
    "underlying_last",
    "dte",
    "strike",
    "c_bid",
    "c_ask",
    "c_last",
    "c_volume",
    "p_bid",
    "p_ask",
    "p_last",
    "p_volume",
];

const DATE_COLUMNS: &[&str] = &["quote_date", "expire_date"];

/// Date layouts seen in vendor files, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Quotes without a timestamp are taken at the 16:00 New York close
const DEFAULT_QUOTE_HOUR_UTC: u32 = 21;

/// `" [C_BID] "` -> `"c_bid"`
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_lowercase()
}

/// Trimmed text of a column, with blank cells as null
fn trimmed(name: &str) -> Expr {
    let text = col(name).str().strip_chars(lit(NULL));
    when(text.clone().str().len_bytes().gt(lit(0)))
        .then(text)
        .otherwise(lit(NULL))
}

fn date_expr(name: &str) -> Expr {
    let attempts: Vec<Expr> = DATE_FORMATS
        .iter()
        .map(|fmt| {
            trimmed(name).str().to_date(StrptimeOptions {
                format: Some(fmt.to_string()),
                strict: false,
                ..Default::default()
            })
        })
        .collect();
    coalesce(&attempts).alias(name)
}

/// Read a wide end-of-day option chain CSV (one row per quote date, expiry
/// and strike, calls and puts side by side) into a typed DataFrame
pub fn read_option_chain_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(OptionsError::DataError(format!(
            "option chain file not found: {}",
            path.display()
        )));
    }

    // Every column comes in as text; vendor files pad numbers with spaces
    // and leave blanks for missing quotes
    let mut raw = CsvReader::from_path(path)?
        .has_header(true)
        .infer_schema(Some(0))
        .finish()?;

    let names: Vec<String> = raw
        .get_column_names()
        .iter()
        .map(|n| normalize_header(n))
        .collect();
    raw.set_column_names(names.as_slice())?;

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !names.iter().any(|n| n == c))
        .collect();
    if !missing.is_empty() {
        return Err(OptionsError::DataError(format!(
            "{} is missing required columns: {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let absent: Vec<&str> = OPTIONAL_COLUMNS
        .iter()
        .copied()
        .filter(|c| !names.iter().any(|n| n == c))
        .collect();
    debug!("Optional columns absent: {:?}", absent);

    let mut lf = raw.lazy();
    if !absent.is_empty() {
        lf = lf.with_columns(
            absent
                .iter()
                .map(|c| lit(NULL).cast(DataType::Utf8).alias(c))
                .collect::<Vec<_>>(),
        );
    }

    let mut typed_columns: Vec<Expr> = DATE_COLUMNS.iter().map(|c| date_expr(c)).collect();
    typed_columns.push(
        trimmed("quote_unixtime")
            .strict_cast(DataType::Float64)
            .cast(DataType::Int64)
            .alias("quote_unixtime"),
    );
    typed_columns.extend(
        F64_COLUMNS
            .iter()
            .map(|c| trimmed(c).strict_cast(DataType::Float64).alias(c)),
    );

    let typed = lf
        .select(typed_columns)
        .collect()
        .map_err(|e| OptionsError::ParseError(format!("{}: {}", path.display(), e)))?;

    for name in DATE_COLUMNS {
        let unparsed = typed.column(name)?.null_count();
        if unparsed > 0 {
            return Err(OptionsError::ParseError(format!(
                "{}: {} rows with an empty or unreadable {}",
                path.display(),
                unparsed,
                name
            )));
        }
    }

    info!(
        "Loaded {} option rows from {}",
        typed.height(),
        path.display()
    );
    Ok(typed)
}

/// Keep only the rows quoted on one of `dates`
pub fn filter_quote_dates(df: &DataFrame, dates: &[NaiveDate]) -> Result<DataFrame> {
    let predicate = dates
        .iter()
        .map(|d| col("quote_date").eq(lit(*d).cast(DataType::Date)))
        .reduce(|a, b| a.or(b));

    match predicate {
        Some(predicate) => Ok(df.clone().lazy().filter(predicate).collect()?),
        None => Ok(df.clone()),
    }
}

/// Distinct quote dates in ascending order
pub fn quote_dates(df: &DataFrame) -> Result<Vec<NaiveDate>> {
    let unique = df
        .clone()
        .lazy()
        .select([col("quote_date").unique().sort(false)])
        .collect()?;
    Ok(unique
        .column("quote_date")?
        .date()?
        .as_date_iter()
        .flatten()
        .collect())
}

fn f64_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Float64Chunked> {
    Ok(df.column(name)?.f64()?)
}

fn first_date(df: &DataFrame, name: &str) -> Result<NaiveDate> {
    df.column(name)?
        .date()?
        .as_date_iter()
        .flatten()
        .next()
        .ok_or_else(|| OptionsError::DataError(format!("chain without {}", name)))
}

fn quote_side(
    bid: Option<f64>,
    ask: Option<f64>,
    last: Option<f64>,
    volume: Option<f64>,
) -> Option<QuoteSide> {
    if bid.is_none() && ask.is_none() && last.is_none() {
        return None;
    }
    Some(QuoteSide {
        bid,
        ask,
        last,
        volume: volume.filter(|v| *v >= 0.0).map(|v| v as u64),
    })
}

/// Build one chain from the rows of a single (quote date, expiry) group,
/// already sorted by strike
fn chain_from_group(group: &DataFrame) -> Result<OptionChain> {
    let quote_date = first_date(group, "quote_date")?;
    let expiration = first_date(group, "expire_date")?;

    let underlying = f64_column(group, "underlying_last")?
        .mean()
        .ok_or_else(|| {
            OptionsError::DataError(format!(
                "chain {} -> {} has no underlying",
                quote_date, expiration
            ))
        })?;
    let dte = f64_column(group, "dte")?.get(0).unwrap_or(0.0);

    let quote_time = group
        .column("quote_unixtime")?
        .i64()?
        .into_iter()
        .flatten()
        .next()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .or_else(|| {
            quote_date
                .and_hms_opt(DEFAULT_QUOTE_HOUR_UTC, 0, 0)
                .map(|dt| dt.and_utc())
        })
        .unwrap_or_default();

    let strikes = f64_column(group, "strike")?;
    let c_bid = f64_column(group, "c_bid")?;
    let c_ask = f64_column(group, "c_ask")?;
    let c_last = f64_column(group, "c_last")?;
    let c_volume = f64_column(group, "c_volume")?;
    let p_bid = f64_column(group, "p_bid")?;
    let p_ask = f64_column(group, "p_ask")?;
    let p_last = f64_column(group, "p_last")?;
    let p_volume = f64_column(group, "p_volume")?;

    let quotes = (0..group.height())
        .filter_map(|i| {
            strikes.get(i).map(|strike| StrikeQuote {
                strike,
                call: quote_side(c_bid.get(i), c_ask.get(i), c_last.get(i), c_volume.get(i)),
                put: quote_side(p_bid.get(i), p_ask.get(i), p_last.get(i), p_volume.get(i)),
            })
        })
        .collect();

    Ok(OptionChain {
        quote_date,
        quote_time,
        expiration,
        dte,
        underlying,
        quotes,
    })
}

/// Split a typed frame into one chain per (quote date, expiry), ordered by
/// quote date then expiry
pub fn dataframe_to_chains(df: &DataFrame) -> Result<Vec<OptionChain>> {
    let df = df
        .clone()
        .lazy()
        .filter(
            col("strike")
                .is_not_null()
                .and(col("underlying_last").is_not_null())
                .and(col("dte").is_not_null()),
        )
        .sort("strike", SortOptions::default())
        .collect()?;

    debug!("{} rows with strike, underlying and dte", df.height());
    if df.height() == 0 {
        warn!("No usable option chains in the data");
        return Ok(Vec::new());
    }

    let mut chains = df
        .partition_by_stable(["quote_date", "expire_date"], true)?
        .iter()
        .map(chain_from_group)
        .collect::<Result<Vec<_>>>()?;
    chains.sort_by_key(|c| (c.quote_date, c.expiration));

    debug!("Split {} rows into {} chains", df.height(), chains.len());
    Ok(chains)
}

/// One density to be exported as rows of the long density table
#[derive(Debug, Clone, Copy)]
pub struct DensityRecord<'a> {
    pub quote_date: NaiveDate,
    pub target_days: u32,
    pub expiration: NaiveDate,
    pub density: &'a RiskNeutralDensity,
}

/// Long-format table: one row per (quote date, maturity, grid strike)
pub fn densities_to_dataframe(records: &[DensityRecord<'_>]) -> Result<DataFrame> {
    if records.is_empty() {
        return Err(OptionsError::Other(
            "Cannot create DataFrame from empty densities".to_string(),
        ));
    }

    let total_rows: usize = records.iter().map(|r| r.density.strikes.len()).sum();
    let mut quote_dates = Vec::with_capacity(total_rows);
    let mut targets = Vec::with_capacity(total_rows);
    let mut expirations = Vec::with_capacity(total_rows);
    let mut strikes = Vec::with_capacity(total_rows);
    let mut densities = Vec::with_capacity(total_rows);
    let mut cdfs = Vec::with_capacity(total_rows);

    for record in records {
        let cdf = record.density.cdf();
        let qd = record.quote_date.format("%Y-%m-%d").to_string();
        let ed = record.expiration.format("%Y-%m-%d").to_string();
        for ((k, d), c) in record.density.strikes.iter().zip(&record.density.density).zip(cdf) {
            quote_dates.push(qd.clone());
            targets.push(record.target_days);
            expirations.push(ed.clone());
            strikes.push(*k);
            densities.push(*d);
            cdfs.push(c);
        }
    }

    let df = DataFrame::new(vec![
        Series::new("quote_date", quote_dates),
        Series::new("target_days", targets),
        Series::new("expiration", expirations),
        Series::new("strike", strikes),
        Series::new("density", densities),
        Series::new("cdf", cdfs),
    ])
    .map_err(|e| OptionsError::Other(format!("Failed to create DataFrame: {}", e)))?;

    Ok(df)
}

/// Write a DataFrame as CSV
pub fn write_csv<P: AsRef<Path>>(df: &DataFrame, path: P) -> Result<()> {
    let mut file = std::fs::File::create(path.as_ref())?;
    let mut df_mut = df.clone();
    CsvWriter::new(&mut file)
        .finish(&mut df_mut)
        .map_err(|e| OptionsError::Other(format!("Failed to write CSV file: {}", e)))?;
    Ok(())
}

/// Cache a DataFrame to disk in Parquet format
pub fn cache_dataframe_to_parquet<P: AsRef<Path>>(df: &DataFrame, path: P) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())
        .map_err(|e| OptionsError::Other(format!("Failed to create file: {}", e)))?;

    let mut df_mut = df.clone();
    ParquetWriter::new(file)
        .finish(&mut df_mut)
        .map_err(|e| OptionsError::Other(format!("Failed to write Parquet file: {}", e)))?;

    Ok(())
}

/// Load a cached DataFrame from a Parquet file
pub fn load_dataframe_from_parquet<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(OptionsError::Other(format!(
            "Parquet file not found: {}",
            path.display()
        )));
    }

    let df = LazyFrame::scan_parquet(path, Default::default())
        .map_err(|e| OptionsError::Other(format!("Failed to scan Parquet file: {}", e)))?
        .collect()
        .map_err(|e| OptionsError::Other(format!("Failed to collect DataFrame: {}", e)))?;

    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
[QUOTE_UNIXTIME], [QUOTE_DATE], [UNDERLYING_LAST], [EXPIRE_DATE], [DTE], [C_BID], [C_ASK], [C_VOLUME], [STRIKE], [P_BID], [P_ASK], [P_VOLUME]
1672779600, 2023-01-03, 3824.5, 2023-01-04, 1.0, 30.1, 30.9, 120, 3800.0, 5.2, 5.6, 340
1672779600, 2023-01-03, 3824.5, 2023-01-04, 1.0, 12.0, 12.6, 80, 3825.0, 12.1, 12.8, 90
1672779600, 2023-01-03, 3824.5, 2023-01-04, 1.0,  ,  , , 3850.0, 30.0, 31.0, 10
1672779600, 2023-01-03, 3824.5, 2023-01-10, 7.0, 55.0, 56.0, 5, 3800.0, 28.0, 29.0, 7
1672866000, 2023-01-04, 3852.1, 2023-01-10, 6.0, 70.0, 71.0, 5, 3800.0, 17.0, 17.5, 7
";

    fn write_sample(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("chain.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        path
    }

    #[test]
    fn normalizes_vendor_headers() {
        assert_eq!(normalize_header(" [C_BID]"), "c_bid");
        assert_eq!(normalize_header("strike"), "strike");
    }

    #[test]
    fn reads_and_splits_chains() {
        let dir = tempfile::tempdir().unwrap();
        let df = read_option_chain_csv(write_sample(&dir)).unwrap();
        assert_eq!(df.height(), 5);

        let chains = dataframe_to_chains(&df).unwrap();
        assert_eq!(chains.len(), 3);

        let first = &chains[0];
        assert_eq!(first.quote_date, NaiveDate::from_ymd_opt(2023, 1, 3).unwrap());
        assert_eq!(first.expiration, NaiveDate::from_ymd_opt(2023, 1, 4).unwrap());
        assert_eq!(first.quotes.len(), 3);
        assert_eq!(first.underlying, 3824.5);
        assert_eq!(first.quote_time.timestamp(), 1672779600);
        assert!(first.quotes[2].call.is_none());
        assert_eq!(first.quotes[0].call.as_ref().unwrap().volume, Some(120));
        assert_eq!(first.quotes[1].put.as_ref().unwrap().ask, Some(12.8));
    }

    #[test]
    fn filters_by_quote_date() {
        let dir = tempfile::tempdir().unwrap();
        let df = read_option_chain_csv(write_sample(&dir)).unwrap();
        assert_eq!(
            quote_dates(&df).unwrap(),
            vec![
                NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 4).unwrap()
            ]
        );

        let only = filter_quote_dates(&df, &[NaiveDate::from_ymd_opt(2023, 1, 4).unwrap()]).unwrap();
        assert_eq!(only.height(), 1);
        assert_eq!(filter_quote_dates(&df, &[]).unwrap().height(), 5);
    }

    #[test]
    fn missing_columns_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "quote_date,strike\n2023-01-03,100\n").unwrap();
        match read_option_chain_csv(&path) {
            Err(OptionsError::DataError(msg)) => assert!(msg.contains("underlying_last")),
            other => panic!("expected a data error, got {:?}", other.map(|df| df.height())),
        }
        assert!(read_option_chain_csv(dir.path().join("absent.csv")).is_err());
    }

    #[test]
    fn bad_numbers_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "quote_date,underlying_last,expire_date,dte,strike,c_bid,c_ask,p_bid,p_ask\n\
             2023-01-03,abc,2023-01-04,1,100,1,2,1,2\n",
        )
        .unwrap();
        assert!(matches!(
            read_option_chain_csv(&path),
            Err(OptionsError::ParseError(_))
        ));
    }

    #[test]
    fn types_columns_and_fills_optional_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("us.csv");
        std::fs::write(
            &path,
            "quote_date,underlying_last,expire_date,dte,strike,c_bid,c_ask,p_bid,p_ask\n\
             03/01/2023, 4000.5 ,03/08/2023,7,3950,  ,  ,10.5,11\n\
             03/01/2023,4000.5,03/08/2023,7,4000,40,41,38,39\n",
        )
        .unwrap();
        let df = read_option_chain_csv(&path).unwrap();

        assert_eq!(df.column("quote_date").unwrap().dtype(), &DataType::Date);
        assert_eq!(df.column("underlying_last").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("quote_unixtime").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("c_bid").unwrap().null_count(), 1);
        assert_eq!(df.column("p_volume").unwrap().null_count(), 2);

        let chains = dataframe_to_chains(&df).unwrap();
        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert_eq!(chain.expiration, NaiveDate::from_ymd_opt(2023, 3, 8).unwrap());
        assert_eq!(chain.underlying, 4000.5);
        assert_eq!(chain.quote_time.format("%H:%M").to_string(), "21:00");
        assert!(chain.quotes[0].call.is_none());
        assert_eq!(chain.quotes[0].put.as_ref().unwrap().volume, None);
    }

    #[test]
    fn unreadable_dates_are_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dates.csv");
        std::fs::write(
            &path,
            "quote_date,underlying_last,expire_date,dte,strike,c_bid,c_ask,p_bid,p_ask\n\
             2023-01-03,4000,next friday,1,100,1,2,1,2\n",
        )
        .unwrap();
        match read_option_chain_csv(&path) {
            Err(OptionsError::ParseError(msg)) => assert!(msg.contains("expire_date")),
            other => panic!("expected a parse error, got {:?}", other.map(|df| df.height())),
        }
    }

    #[test]
    fn density_table_export() {
        let density = RiskNeutralDensity {
            strikes: vec![1.0, 2.0, 3.0],
            density: vec![0.25, 0.5, 0.25],
            raw_mass: 1.0,
            negative_mass: 0.0,
        };
        let records = [DensityRecord {
            quote_date: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            target_days: 7,
            expiration: NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
            density: &density,
        }];
        let df = densities_to_dataframe(&records).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 6);

        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("densities.csv");
        write_csv(&df, &csv_path).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.starts_with("quote_date,target_days,expiration,strike,density,cdf"));

        let parquet_path = dir.path().join("densities.parquet");
        cache_dataframe_to_parquet(&df, &parquet_path).unwrap();
        let loaded = load_dataframe_from_parquet(&parquet_path).unwrap();
        assert_eq!(loaded.shape(), df.shape());

        assert!(densities_to_dataframe(&[]).is_err());
    }
}
