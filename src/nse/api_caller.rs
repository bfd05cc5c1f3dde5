use chrono::{NaiveDate, Utc};
use serde_json::Value;

use super::response::{self, RawResponse};
use crate::{
    config::Configuration,
    http::client::{HttpSession, Transport},
    model::{self, InstrumentType, ResponseMeta},
};

/// A parsed provider payload with the request it came from.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub meta: ResponseMeta,
    pub json: Value,
    pub raw: RawResponse,
}

/// Fetches the option chain for `symbol` over a fresh session.
///
/// The session is opened here and dropped before returning, so cookies never
/// outlive a single fetch.
pub async fn fetch(
    config: &Configuration,
    symbol: &str,
    expiry: NaiveDate,
    instrument: InstrumentType,
) -> model::Result<Fetched> {
    let session = HttpSession::open(&config.header, &config.http)?;
    let fetched = fetch_with(&session, config, symbol, expiry, instrument).await;
    drop(session);
    fetched
}

/// Warm-up request to the landing page, then the option chain request.
pub async fn fetch_with<T: Transport>(
    transport: &T,
    config: &Configuration,
    symbol: &str,
    expiry: NaiveDate,
    instrument: InstrumentType,
) -> model::Result<Fetched> {
    let landing = config.landing_url()?;
    let url = config.chain_url(instrument, symbol)?;

    // The provider rejects API calls that do not carry its session cookies.
    let warm_up = transport.get(&landing).await?;
    if let Err(err) = config.policy.check(&warm_up) {
        log::warn!("warm-up request failed: {}", err);
        return Err(err.into());
    }
    log::debug!("warm-up {} answered {}", warm_up.url, warm_up.status);

    log::info!(
        "fetching {} option chain for {} (expiry {})",
        String::from(&instrument),
        symbol,
        response::format_expiry(expiry)
    );
    let resp = transport.get(&url).await?;
    if let Err(err) = config.policy.check(&resp) {
        log::warn!("option chain request failed: {}", err);
        return Err(err.into());
    }

    let (json, raw) = response::parse_body(&resp.body)?;
    log::debug!(
        "{} records across {} expiries",
        raw.records.data.len(),
        raw.records.expiry_dates.len()
    );

    Ok(Fetched {
        meta: ResponseMeta {
            url: resp.url,
            status: resp.status,
            received_at: Utc::now(),
        },
        json,
        raw,
    })
}
