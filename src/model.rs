use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::ConfigError,
    export::ExportError,
    http::client::{FailureClass, FetchError},
    nse::response::{ContractQuote, ParseError, RawResponse},
    shaper::ShapeError,
};

/// Instrument family, selecting the provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Index,
    Stock,
}

impl From<&InstrumentType> for String {
    fn from(value: &InstrumentType) -> Self {
        match value {
            InstrumentType::Index => "index".to_string(),
            InstrumentType::Stock => "stock".to_string(),
        }
    }
}

/// Call (CE) or put (PE) side of a strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    /// Column suffix used by the provider's web page.
    pub fn suffix(&self) -> &'static str {
        match self {
            OptionSide::Call => "ce",
            OptionSide::Put => "pe",
        }
    }
}

/// Market data for one side of one strike. Any field may be missing upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SideQuote {
    pub open_interest: Option<f64>,
    pub change_in_open_interest: Option<f64>,
    pub pchange_in_open_interest: Option<f64>,
    pub total_traded_volume: Option<f64>,
    pub implied_volatility: Option<f64>,
    pub last_price: Option<f64>,
    pub change: Option<f64>,
    pub pchange: Option<f64>,
    pub total_buy_quantity: Option<f64>,
    pub total_sell_quantity: Option<f64>,
    pub bid_qty: Option<f64>,
    pub bid_price: Option<f64>,
    pub ask_qty: Option<f64>,
    pub ask_price: Option<f64>,
}

impl From<&ContractQuote> for SideQuote {
    fn from(value: &ContractQuote) -> Self {
        SideQuote {
            open_interest: value.open_interest,
            change_in_open_interest: value.change_in_open_interest,
            pchange_in_open_interest: value.pchange_in_open_interest,
            total_traded_volume: value.total_traded_volume,
            implied_volatility: value.implied_volatility,
            last_price: value.last_price,
            change: value.change,
            pchange: value.pchange,
            total_buy_quantity: value.total_buy_quantity,
            total_sell_quantity: value.total_sell_quantity,
            bid_qty: value.bid_qty,
            bid_price: value.bid_price,
            ask_qty: value.ask_qty,
            ask_price: value.ask_price,
        }
    }
}

/// One strike of one expiry, call and put side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapedRow {
    pub symbol: String,          // Underlying symbol.
    pub expiry: NaiveDate,       // Expiry date.
    pub strike: f64,             // Strike price.
    pub call: Option<SideQuote>, // None when the strike has no CE record.
    pub put: Option<SideQuote>,  // None when the strike has no PE record.
}

impl ShapedRow {
    pub fn side(&self, side: OptionSide) -> Option<&SideQuote> {
        match side {
            OptionSide::Call => self.call.as_ref(),
            OptionSide::Put => self.put.as_ref(),
        }
    }
}

/// Aggregates over a set of shaped rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub rows: usize,
    pub total_call_oi: f64,
    pub total_put_oi: f64,
    pub total_call_volume: f64,
    pub total_put_volume: f64,
    pub total_call_oi_change: f64,
    pub total_put_oi_change: f64,
    /// Put OI over call OI; `None` when call OI is zero.
    pub put_call_ratio: Option<f64>,
    /// Put volume over call volume; `None` when call volume is zero.
    pub volume_put_call_ratio: Option<f64>,
    pub underlying_value: Option<f64>,
    pub atm_strike: Option<f64>,
    pub timestamp: Option<DateTime<Tz>>,
}

/// Metadata about the data request that produced a payload.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub url: String,
    pub status: u16,
    pub received_at: DateTime<chrono::Utc>,
}

/// Complete result of one fetch-and-shape run.
#[derive(Debug, Clone)]
pub struct OptionChain {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub meta: ResponseMeta,
    pub json: serde_json::Value, // Body exactly as received.
    pub raw: RawResponse,
    pub rows: Vec<ShapedRow>,
    pub metrics: Metrics,
}

pub type Result<T> = std::result::Result<T, OptionChainError>;

/// Any failure of the pipeline, tagged with the stage that raised it.
#[derive(Error, Debug)]
pub enum OptionChainError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),
    #[error("export error: {0}")]
    Export(#[from] ExportError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl OptionChainError {
    /// Only fetch failures can be transient; everything else is permanent.
    pub fn class(&self) -> FailureClass {
        match self {
            OptionChainError::Fetch(err) => err.class(),
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}
