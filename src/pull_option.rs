use chrono::NaiveDate;

use crate::{
    config::Configuration,
    http::client::Transport,
    model::{self, InstrumentType, OptionChain},
    nse::api_caller::{self, Fetched},
    shaper::{self, ShapeOptions},
};

/// What to fetch and how to shape it.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub symbol: String,
    pub expiry: NaiveDate,
    pub instrument: InstrumentType,
    pub options: ShapeOptions,
}

impl ChainRequest {
    pub fn new(symbol: &str, expiry: NaiveDate, instrument: InstrumentType) -> Self {
        ChainRequest {
            symbol: symbol.trim().to_uppercase(),
            expiry,
            instrument,
            options: ShapeOptions::default(),
        }
    }
}

/// Fetches and shapes one option chain over a fresh HTTP session.
pub async fn retrieve_option_chain(
    config: &Configuration,
    request: &ChainRequest,
) -> model::Result<OptionChain> {
    let fetched = api_caller::fetch(
        config,
        &request.symbol,
        request.expiry,
        request.instrument,
    )
    .await?;
    shape_fetched(request, fetched)
}

/// Same as [`retrieve_option_chain`] over a caller-supplied transport.
pub async fn retrieve_option_chain_with<T: Transport>(
    transport: &T,
    config: &Configuration,
    request: &ChainRequest,
) -> model::Result<OptionChain> {
    let fetched = api_caller::fetch_with(
        transport,
        config,
        &request.symbol,
        request.expiry,
        request.instrument,
    )
    .await?;
    shape_fetched(request, fetched)
}

/// Shapes an already fetched payload. Either every stage succeeds or an error is returned.
pub fn shape_fetched(request: &ChainRequest, fetched: Fetched) -> model::Result<OptionChain> {
    let (rows, metrics) =
        shaper::shape(&fetched.raw, &request.symbol, request.expiry, &request.options)?;

    log::info!(
        "{} rows for {}; call OI {}, put OI {}",
        rows.len(),
        request.symbol,
        metrics.total_call_oi,
        metrics.total_put_oi
    );

    Ok(OptionChain {
        symbol: request.symbol.clone(),
        expiry: request.expiry,
        meta: fetched.meta,
        json: fetched.json,
        raw: fetched.raw,
        rows,
        metrics,
    })
}
