use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::{Asia::Kolkata, Tz};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Date format the provider uses for expiries, e.g. `27-Feb-2027`.
pub const EXPIRY_FORMAT: &str = "%d-%b-%Y";

/// Format of `records.timestamp`, e.g. `16-Oct-2026 15:30:00` (IST).
pub const TIMESTAMP_FORMAT: &str = "%d-%b-%Y %H:%M:%S";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Response body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Response body is an empty JSON object")]
    EmptyPayload,
    #[error("Response is missing expected key `{0}`")]
    MissingKey(&'static str),
    #[error("Response has unexpected structure: {0}")]
    Structure(String),
}

/// Option chain payload returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub records: Records,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<Filtered>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Records {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "underlyingValue", default, deserialize_with = "lenient_number")]
    pub underlying_value: Option<f64>,
    #[serde(rename = "expiryDates", default)]
    pub expiry_dates: Vec<String>,
    pub data: Vec<StrikeRecord>,
}

/// Provider-side totals for the nearest expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filtered {
    #[serde(rename = "CE", default)]
    pub call: Option<ProviderTotals>,
    #[serde(rename = "PE", default)]
    pub put: Option<ProviderTotals>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTotals {
    #[serde(rename = "totOI", default, deserialize_with = "lenient_number")]
    pub total_oi: Option<f64>,
    #[serde(rename = "totVol", default, deserialize_with = "lenient_number")]
    pub total_volume: Option<f64>,
}

/// One strike of one expiry with its optional call and put sides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrikeRecord {
    #[serde(rename = "strikePrice", default, deserialize_with = "lenient_number")]
    pub strike_price: Option<f64>,
    #[serde(rename = "expiryDate", default)]
    pub expiry_date: Option<String>,
    /// Key used by newer payloads; `expiryDate` wins when both are present.
    #[serde(rename = "expiryDates", default)]
    pub expiry_dates: Option<String>,
    #[serde(rename = "CE", default)]
    pub call: Option<ContractQuote>,
    #[serde(rename = "PE", default)]
    pub put: Option<ContractQuote>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractQuote {
    #[serde(rename = "strikePrice", default, deserialize_with = "lenient_number")]
    pub strike_price: Option<f64>,
    #[serde(rename = "expiryDate", default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(rename = "openInterest", default, deserialize_with = "lenient_number")]
    pub open_interest: Option<f64>,
    #[serde(rename = "changeinOpenInterest", default, deserialize_with = "lenient_number")]
    pub change_in_open_interest: Option<f64>,
    #[serde(rename = "pchangeinOpenInterest", default, deserialize_with = "lenient_number")]
    pub pchange_in_open_interest: Option<f64>,
    #[serde(rename = "totalTradedVolume", default, deserialize_with = "lenient_number")]
    pub total_traded_volume: Option<f64>,
    #[serde(rename = "impliedVolatility", default, deserialize_with = "lenient_number")]
    pub implied_volatility: Option<f64>,
    #[serde(rename = "lastPrice", default, deserialize_with = "lenient_number")]
    pub last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub change: Option<f64>,
    #[serde(rename = "pChange", alias = "pchange", default, deserialize_with = "lenient_number")]
    pub pchange: Option<f64>,
    #[serde(rename = "totalBuyQuantity", default, deserialize_with = "lenient_number")]
    pub total_buy_quantity: Option<f64>,
    #[serde(rename = "totalSellQuantity", default, deserialize_with = "lenient_number")]
    pub total_sell_quantity: Option<f64>,
    #[serde(rename = "bidQty", default, deserialize_with = "lenient_number")]
    pub bid_qty: Option<f64>,
    #[serde(rename = "bidprice", default, deserialize_with = "lenient_number")]
    pub bid_price: Option<f64>,
    #[serde(rename = "askQty", default, deserialize_with = "lenient_number")]
    pub ask_qty: Option<f64>,
    #[serde(rename = "askPrice", default, deserialize_with = "lenient_number")]
    pub ask_price: Option<f64>,
    #[serde(rename = "underlyingValue", default, deserialize_with = "lenient_number")]
    pub underlying_value: Option<f64>,
}

// The provider sends numbers, but occasionally "-" or numeric strings; both
// are accepted and anything non-numeric becomes None.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite()),
        _ => None,
    })
}

impl StrikeRecord {
    /// Strike price, taken from the record or either of its sides.
    pub fn strike(&self) -> Option<f64> {
        self.strike_price
            .or_else(|| self.call.as_ref().and_then(|c| c.strike_price))
            .or_else(|| self.put.as_ref().and_then(|p| p.strike_price))
    }

    /// Expiry date, taken from the record or either of its sides.
    pub fn expiry(&self) -> Option<NaiveDate> {
        self.expiry_date
            .as_deref()
            .or(self.expiry_dates.as_deref())
            .or_else(|| self.call.as_ref().and_then(|c| c.expiry_date.as_deref()))
            .or_else(|| self.put.as_ref().and_then(|p| p.expiry_date.as_deref()))
            .and_then(parse_expiry)
    }
}

impl RawResponse {
    /// Records grouped by expiry date, each group in source order.
    /// Records without a readable expiry are left out.
    pub fn by_expiry(&self) -> BTreeMap<NaiveDate, Vec<&StrikeRecord>> {
        let mut groups: BTreeMap<NaiveDate, Vec<&StrikeRecord>> = BTreeMap::new();
        for record in &self.records.data {
            if let Some(expiry) = record.expiry() {
                groups.entry(expiry).or_default().push(record);
            }
        }
        groups
    }

    /// Expiries present in the data, in ascending order.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        self.by_expiry().into_keys().collect()
    }

    /// Underlying value from `records`, else from the first side that carries one.
    pub fn underlying_value(&self) -> Option<f64> {
        self.records.underlying_value.or_else(|| {
            self.records.data.iter().find_map(|record| {
                record
                    .call
                    .as_ref()
                    .and_then(|c| c.underlying_value)
                    .or_else(|| record.put.as_ref().and_then(|p| p.underlying_value))
            })
        })
    }

    pub fn timestamp(&self) -> Option<DateTime<Tz>> {
        self.records.timestamp.as_deref().and_then(parse_timestamp)
    }
}

/// Parses a provider expiry (`27-Feb-2027`), also accepting ISO `2027-02-27`.
pub fn parse_expiry(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, EXPIRY_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()
}

pub fn format_expiry(date: NaiveDate) -> String {
    date.format(EXPIRY_FORMAT).to_string()
}

/// Parses `records.timestamp`, which the provider reports in IST.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()?;
    Kolkata.from_local_datetime(&naive).single()
}

/// Parses a response body into the untouched JSON value and the typed payload.
pub fn parse_body(body: &str) -> Result<(Value, RawResponse), ParseError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| ParseError::Structure("top-level value is not an object".into()))?;
    if object.is_empty() {
        return Err(ParseError::EmptyPayload);
    }

    let records = object
        .get("records")
        .ok_or(ParseError::MissingKey("records"))?;
    match records.get("data") {
        Some(Value::Array(_)) => {}
        Some(_) => return Err(ParseError::Structure("records.data is not a list".into())),
        None => return Err(ParseError::MissingKey("records.data")),
    }

    let raw = RawResponse::deserialize(&value).map_err(|e| ParseError::Structure(e.to_string()))?;
    Ok((value, raw))
}
