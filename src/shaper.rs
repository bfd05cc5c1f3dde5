use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use thiserror::Error;

use crate::{
    model::{Metrics, OptionSide, ShapedRow, SideQuote},
    nse::response::{RawResponse, StrikeRecord},
};

// Strike spacing for indices that do not trade at the default 50 points.
lazy_static::lazy_static! {
    static ref STRIKE_MULTIPLES: HashMap<&'static str, f64> = HashMap::from([
        ("BANKNIFTY", 100.0),
        ("MIDCPNIFTY", 25.0),
        ("NIFTYNXT50", 100.0),
    ]);
}

pub const DEFAULT_STRIKE_MULTIPLE: f64 = 50.0;

#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("Expiry {expiry} not present in response; available: {}", format_dates(.available))]
    ExpiryNotFound {
        expiry: NaiveDate,
        available: Vec<NaiveDate>,
    },
    #[error("Strike {strike} appears more than once for expiry {expiry}")]
    DuplicateStrike { expiry: NaiveDate, strike: f64 },
    #[error("A strike window was requested but the response has no underlying value")]
    MissingUnderlying,
    #[error("No strikes between {low} and {high} around ATM strike {atm}")]
    EmptyWindow { atm: f64, low: f64, high: f64 },
}

fn format_dates(dates: &[NaiveDate]) -> String {
    if dates.is_empty() {
        return "none".into();
    }
    dates
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keep only strikes within `strikes * multiple` of the ATM strike.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrikeWindow {
    pub strikes: u32,
    /// Strike spacing; `None` uses the symbol's default.
    pub multiple: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeOptions {
    pub sort_by_strike: bool,
    pub strike_window: Option<StrikeWindow>,
}

/// Default strike spacing for a symbol.
pub fn strike_multiple(symbol: &str) -> f64 {
    STRIKE_MULTIPLES
        .get(symbol.trim().to_uppercase().as_str())
        .copied()
        .unwrap_or(DEFAULT_STRIKE_MULTIPLE)
}

/// Returns `(atm, low, high)` for an underlying value. Halves round to even.
pub fn strike_range(underlying: f64, multiple: f64, strikes: u32) -> (f64, f64, f64) {
    let atm = (underlying / multiple).round_ties_even() * multiple;
    let span = strikes as f64 * multiple;
    (atm, atm - span, atm + span)
}

/// Flattens the records of one expiry into rows and computes their metrics.
///
/// Rows follow source order unless `options.sort_by_strike` is set. A strike
/// missing its call or put side keeps its row with that side set to `None`.
pub fn shape(
    raw: &RawResponse,
    symbol: &str,
    expiry: NaiveDate,
    options: &ShapeOptions,
) -> Result<(Vec<ShapedRow>, Metrics), ShapeError> {
    let symbol = symbol.trim().to_uppercase();
    let mut rows: Vec<ShapedRow> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();

    for (i, record) in raw.records.data.iter().enumerate() {
        let Some(record_expiry) = record.expiry() else {
            log::warn!("record {} has no readable expiry date, skipping", i);
            continue;
        };
        if record_expiry != expiry {
            continue;
        }
        let Some(row) = flatten(&symbol, expiry, record) else {
            log::warn!("record {} for {} has no strike price, skipping", i, symbol);
            continue;
        };
        if !seen.insert(row.strike.to_bits()) {
            return Err(ShapeError::DuplicateStrike {
                expiry,
                strike: row.strike,
            });
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ShapeError::ExpiryNotFound {
            expiry,
            available: raw.expiries(),
        });
    }

    let underlying = raw.underlying_value();
    let mut atm_strike = underlying.map(|u| strike_range(u, strike_multiple(&symbol), 0).0);

    if let Some(window) = options.strike_window {
        let underlying = underlying.ok_or(ShapeError::MissingUnderlying)?;
        let multiple = window.multiple.unwrap_or_else(|| strike_multiple(&symbol));
        let (atm, low, high) = strike_range(underlying, multiple, window.strikes);
        log::debug!(
            "{} ATM strike {} keeping strikes {} to {}",
            symbol,
            atm,
            low,
            high
        );
        rows.retain(|row| row.strike >= low && row.strike <= high);
        if rows.is_empty() {
            return Err(ShapeError::EmptyWindow { atm, low, high });
        }
        atm_strike = Some(atm);
    }

    if options.sort_by_strike {
        rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));
    }

    let mut metrics = summarize(&rows);
    metrics.underlying_value = underlying;
    metrics.atm_strike = atm_strike;
    metrics.timestamp = raw.timestamp();
    Ok((rows, metrics))
}

/// Metrics over every strike of every expiry in the response.
pub fn summarize_chain(raw: &RawResponse, symbol: &str) -> Metrics {
    let symbol = symbol.trim().to_uppercase();
    let rows: Vec<ShapedRow> = raw
        .records
        .data
        .iter()
        .filter_map(|record| flatten(&symbol, record.expiry()?, record))
        .collect();

    let mut metrics = summarize(&rows);
    metrics.underlying_value = raw.underlying_value();
    metrics.atm_strike = metrics
        .underlying_value
        .map(|u| strike_range(u, strike_multiple(&symbol), 0).0);
    metrics.timestamp = raw.timestamp();
    metrics
}

fn flatten(symbol: &str, expiry: NaiveDate, record: &StrikeRecord) -> Option<ShapedRow> {
    Some(ShapedRow {
        symbol: symbol.to_string(),
        expiry,
        strike: record.strike()?,
        call: record.call.as_ref().map(SideQuote::from),
        put: record.put.as_ref().map(SideQuote::from),
    })
}

/// Sums and ratios over rows. Missing sides and fields count as zero.
pub fn summarize(rows: &[ShapedRow]) -> Metrics {
    let total = |side: OptionSide, field: fn(&SideQuote) -> Option<f64>| -> f64 {
        rows.iter()
            .filter_map(|row| row.side(side))
            .filter_map(field)
            .sum()
    };

    let total_call_oi = total(OptionSide::Call, |q| q.open_interest);
    let total_put_oi = total(OptionSide::Put, |q| q.open_interest);
    let total_call_volume = total(OptionSide::Call, |q| q.total_traded_volume);
    let total_put_volume = total(OptionSide::Put, |q| q.total_traded_volume);

    Metrics {
        rows: rows.len(),
        total_call_oi,
        total_put_oi,
        total_call_volume,
        total_put_volume,
        total_call_oi_change: total(OptionSide::Call, |q| q.change_in_open_interest),
        total_put_oi_change: total(OptionSide::Put, |q| q.change_in_open_interest),
        put_call_ratio: ratio(total_put_oi, total_call_oi),
        volume_put_call_ratio: ratio(total_put_volume, total_call_volume),
        ..Default::default()
    }
}

/// `numerator / denominator`, or `None` when the denominator is zero or not finite.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nse::response::parse_body;
    use approx::assert_abs_diff_eq;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2027, 2, 27).unwrap()
    }

    fn raw(body: &str) -> RawResponse {
        parse_body(body).unwrap().1
    }

    const CHAIN: &str = r#"{
        "records": {
            "timestamp": "16-Oct-2026 15:30:00",
            "underlyingValue": 22431.0,
            "expiryDates": ["27-Feb-2027", "05-Mar-2027"],
            "data": [
                {"strikePrice": 22500, "expiryDate": "27-Feb-2027",
                 "CE": {"openInterest": 300, "totalTradedVolume": 1000, "changeinOpenInterest": 10},
                 "PE": {"openInterest": 150, "totalTradedVolume": 400, "changeinOpenInterest": -5}},
                {"strikePrice": 22300, "expiryDate": "27-Feb-2027",
                 "PE": {"openInterest": 250, "totalTradedVolume": 600}},
                {"strikePrice": 22400, "expiryDate": "27-Feb-2027",
                 "CE": {"openInterest": 200, "totalTradedVolume": 500}},
                {"strikePrice": 22400, "expiryDate": "05-Mar-2027",
                 "CE": {"openInterest": 999}},
                {"strikePrice": 22600}
            ]
        }
    }"#;

    #[test]
    fn missing_sides_keep_their_rows() {
        let (rows, _) = shape(&raw(CHAIN), "nifty", expiry(), &ShapeOptions::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows.iter().map(|r| r.strike).collect::<Vec<_>>(),
            vec![22500.0, 22300.0, 22400.0]
        );
        assert!(rows[1].call.is_none() && rows[1].put.is_some());
        assert!(rows[2].call.is_some() && rows[2].put.is_none());
        assert!(rows.iter().all(|r| r.symbol == "NIFTY" && r.expiry == expiry()));
    }

    #[test]
    fn metrics_sum_over_rows() {
        let (_, metrics) = shape(&raw(CHAIN), "NIFTY", expiry(), &ShapeOptions::default()).unwrap();
        assert_eq!(metrics.rows, 3);
        assert_abs_diff_eq!(metrics.total_call_oi, 500.0);
        assert_abs_diff_eq!(metrics.total_put_oi, 400.0);
        assert_abs_diff_eq!(metrics.total_call_volume, 1500.0);
        assert_abs_diff_eq!(metrics.total_put_volume, 1000.0);
        assert_abs_diff_eq!(metrics.total_call_oi_change, 10.0);
        assert_abs_diff_eq!(metrics.total_put_oi_change, -5.0);
        assert_abs_diff_eq!(metrics.put_call_ratio.unwrap(), 0.8);
        assert_eq!(metrics.underlying_value, Some(22431.0));
        assert_eq!(metrics.atm_strike, Some(22450.0));
        assert!(metrics.timestamp.is_some());
    }

    #[test]
    fn sorting_is_opt_in() {
        let options = ShapeOptions {
            sort_by_strike: true,
            ..Default::default()
        };
        let (rows, _) = shape(&raw(CHAIN), "NIFTY", expiry(), &options).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.strike).collect::<Vec<_>>(),
            vec![22300.0, 22400.0, 22500.0]
        );
    }

    #[test]
    fn unknown_expiry_is_an_error() {
        let missing = NaiveDate::from_ymd_opt(2027, 3, 12).unwrap();
        let err = shape(&raw(CHAIN), "NIFTY", missing, &ShapeOptions::default()).unwrap_err();
        match err {
            ShapeError::ExpiryNotFound { expiry, available } => {
                assert_eq!(expiry, missing);
                assert_eq!(available.len(), 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn duplicate_strike_is_an_error() {
        let body = r#"{"records": {"data": [
            {"strikePrice": 100, "expiryDate": "27-Feb-2027", "CE": {"openInterest": 1}},
            {"strikePrice": 100, "expiryDate": "27-Feb-2027", "PE": {"openInterest": 2}}
        ]}}"#;
        let err = shape(&raw(body), "X", expiry(), &ShapeOptions::default()).unwrap_err();
        assert!(matches!(err, ShapeError::DuplicateStrike { strike, .. } if strike == 100.0));
    }

    #[test]
    fn put_call_ratio_without_call_oi_is_none() {
        let body = r#"{"records": {"data": [
            {"strikePrice": 100, "expiryDate": "27-Feb-2027", "PE": {"openInterest": 20}}
        ]}}"#;
        let (_, metrics) = shape(&raw(body), "X", expiry(), &ShapeOptions::default()).unwrap();
        assert_eq!(metrics.put_call_ratio, None);
        assert_eq!(metrics.volume_put_call_ratio, None);
        assert_eq!(metrics.underlying_value, None);
        assert_eq!(metrics.atm_strike, None);
    }

    #[test]
    fn put_call_ratio_without_put_oi_is_zero() {
        let body = r#"{"records": {"data": [
            {"strikePrice": 100, "expiryDate": "27-Feb-2027", "CE": {"openInterest": 20},
             "PE": {"openInterest": 0}}
        ]}}"#;
        let (_, metrics) = shape(&raw(body), "X", expiry(), &ShapeOptions::default()).unwrap();
        assert_eq!(metrics.put_call_ratio, Some(0.0));
    }

    #[test]
    fn strike_window_around_atm() {
        let options = ShapeOptions {
            strike_window: Some(StrikeWindow {
                strikes: 1,
                multiple: Some(100.0),
            }),
            ..Default::default()
        };
        // underlying 22431 -> ATM 22400, window 22300..=22500
        let (rows, metrics) = shape(&raw(CHAIN), "NIFTY", expiry(), &options).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(metrics.atm_strike, Some(22400.0));

        let options = ShapeOptions {
            strike_window: Some(StrikeWindow {
                strikes: 0,
                multiple: Some(100.0),
            }),
            ..Default::default()
        };
        let (rows, metrics) = shape(&raw(CHAIN), "NIFTY", expiry(), &options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].strike, 22400.0);
        assert_abs_diff_eq!(metrics.total_call_oi, 200.0);
    }

    #[test]
    fn strike_window_needs_underlying() {
        let body = r#"{"records": {"data": [
            {"strikePrice": 100, "expiryDate": "27-Feb-2027"}
        ]}}"#;
        let options = ShapeOptions {
            strike_window: Some(StrikeWindow {
                strikes: 5,
                multiple: None,
            }),
            ..Default::default()
        };
        let err = shape(&raw(body), "X", expiry(), &options).unwrap_err();
        assert!(matches!(err, ShapeError::MissingUnderlying));
    }

    #[test]
    fn window_without_listed_strikes_is_an_error() {
        let body = r#"{"records": {"underlyingValue": 30000, "data": [
            {"strikePrice": 100, "expiryDate": "27-Feb-2027", "CE": {"openInterest": 1}},
            {"strikePrice": 200, "expiryDate": "27-Feb-2027", "PE": {"openInterest": 2}}
        ]}}"#;
        let options = ShapeOptions {
            strike_window: Some(StrikeWindow {
                strikes: 2,
                multiple: None,
            }),
            ..Default::default()
        };
        // ATM 30000 at the default 50 spacing, window 29900..=30100
        match shape(&raw(body), "NIFTY", expiry(), &options).unwrap_err() {
            ShapeError::EmptyWindow { atm, low, high } => {
                assert_eq!((atm, low, high), (30000.0, 29900.0, 30100.0));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn default_multiples() {
        assert_eq!(strike_multiple("BANKNIFTY"), 100.0);
        assert_eq!(strike_multiple("midcpnifty"), 25.0);
        assert_eq!(strike_multiple("NIFTYNXT50"), 100.0);
        assert_eq!(strike_multiple("RELIANCE"), DEFAULT_STRIKE_MULTIPLE);
    }

    #[test]
    fn strike_range_rounds_half_to_even() {
        assert_eq!(strike_range(22425.0, 50.0, 2), (22400.0, 22300.0, 22500.0));
        assert_eq!(strike_range(22475.0, 50.0, 0), (22500.0, 22500.0, 22500.0));
        assert_eq!(strike_range(48012.0, 100.0, 1), (48000.0, 47900.0, 48100.0));
    }

    #[test]
    fn chain_summary_covers_all_expiries() {
        let metrics = summarize_chain(&raw(CHAIN), "NIFTY");
        assert_eq!(metrics.rows, 4);
        assert_abs_diff_eq!(metrics.total_call_oi, 1499.0);
    }

    #[test]
    fn ratio_guards_zero() {
        assert_eq!(ratio(1.0, 0.0), None);
        assert_eq!(ratio(1.0, f64::NAN), None);
        assert_eq!(ratio(0.0, 4.0), Some(0.0));
        assert_eq!(ratio(2.0, 4.0), Some(0.5));
    }
}
