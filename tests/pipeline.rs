//! End-to-end tests: canned HTTP responses through fetch, shape and export.

use std::{cell::RefCell, collections::VecDeque, fs};

use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use url::Url;

use nseoptions::{
    ChainRequest, Configuration, InstrumentType, OptionChainError,
    export::{self, Cell},
    http::client::{FailureClass, FetchError, HttpResponse, Transport},
    nse::response,
    retrieve_option_chain_with,
    shaper::{self, ShapeError, ShapeOptions, StrikeWindow},
};

const FIXTURE: &str = include_str!("fixtures/option_chain.json");

// Answers every request in order from a queue of (status, body) pairs.
struct CannedTransport {
    replies: RefCell<VecDeque<(u16, String)>>,
    requested: RefCell<Vec<Url>>,
}

impl CannedTransport {
    fn new(replies: Vec<(u16, &str)>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().map(|(s, b)| (s, b.to_string())).collect()),
            requested: RefCell::new(Vec::new()),
        }
    }

    fn serving_fixture() -> Self {
        Self::new(vec![(200, "<html></html>"), (200, FIXTURE)])
    }
}

impl Transport for CannedTransport {
    async fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        self.requested.borrow_mut().push(url.clone());
        let (status, body) = self
            .replies
            .borrow_mut()
            .pop_front()
            .expect("no canned reply left");
        Ok(HttpResponse {
            url: url.to_string(),
            status,
            body,
        })
    }
}

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2027, 2, 27).unwrap()
}

fn config() -> Configuration {
    Configuration::defaults().unwrap()
}

#[tokio::test]
async fn fixture_shapes_into_three_rows() {
    let transport = CannedTransport::serving_fixture();
    let request = ChainRequest::new("nifty", expiry(), InstrumentType::Index);

    let chain = retrieve_option_chain_with(&transport, &config(), &request)
        .await
        .unwrap();

    assert_eq!(chain.symbol, "NIFTY");
    assert_eq!(chain.rows.len(), 3);
    assert_eq!(
        chain.rows.iter().map(|r| r.strike).collect::<Vec<_>>(),
        vec![22400.0, 22500.0, 22600.0]
    );

    let call_oi: f64 = chain
        .rows
        .iter()
        .filter_map(|r| r.call.as_ref()?.open_interest)
        .sum();
    assert_abs_diff_eq!(chain.metrics.total_call_oi, call_oi);
    assert_abs_diff_eq!(chain.metrics.total_call_oi, 124045.0);
    assert_abs_diff_eq!(chain.metrics.total_put_oi, 94270.0);
    assert_abs_diff_eq!(chain.metrics.total_call_volume, 812478.0);
    assert_abs_diff_eq!(
        chain.metrics.put_call_ratio.unwrap(),
        94270.0 / 124045.0,
        epsilon = 1e-12
    );
    assert_eq!(chain.metrics.atm_strike, Some(22500.0));

    // 22600 has no put side but keeps its row.
    assert!(chain.rows[2].put.is_none());
    assert_eq!(
        chain.rows[2].call.as_ref().unwrap().implied_volatility,
        Some(11.6)
    );

    // The untouched body is kept alongside the typed payload.
    assert_eq!(chain.json["filtered"]["CE"]["totOI"], 123945);
    assert_eq!(chain.raw.records.data.len(), 4);
}

#[tokio::test]
async fn requests_go_to_landing_page_then_api() {
    let transport = CannedTransport::serving_fixture();
    let request = ChainRequest::new("NIFTY", expiry(), InstrumentType::Index);
    retrieve_option_chain_with(&transport, &config(), &request)
        .await
        .unwrap();

    let requested = transport.requested.borrow();
    assert_eq!(requested.len(), 2);
    assert_eq!(requested[0].path(), "/");
    assert_eq!(requested[1].path(), "/api/option-chain-indices");
    assert_eq!(requested[1].query(), Some("symbol=NIFTY"));
}

#[tokio::test]
async fn stock_symbols_use_the_equities_endpoint() {
    let transport = CannedTransport::new(vec![(200, ""), (404, "not found")]);
    let request = ChainRequest::new("reliance", expiry(), InstrumentType::Stock);
    let err = retrieve_option_chain_with(&transport, &config(), &request)
        .await
        .unwrap_err();

    assert_eq!(err.class(), FailureClass::Permanent);
    assert_eq!(
        transport.requested.borrow()[1].as_str(),
        "https://www.nseindia.com/api/option-chain-equities?symbol=RELIANCE"
    );
}

#[tokio::test]
async fn throttling_is_transient() {
    let transport = CannedTransport::new(vec![(200, ""), (429, "")]);
    let request = ChainRequest::new("NIFTY", expiry(), InstrumentType::Index);
    let err = retrieve_option_chain_with(&transport, &config(), &request)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, OptionChainError::Fetch(FetchError::Blocked { status: 429, .. })));
}

#[tokio::test]
async fn unknown_expiry_returns_no_partial_result() {
    let transport = CannedTransport::serving_fixture();
    let request = ChainRequest::new(
        "NIFTY",
        NaiveDate::from_ymd_opt(2027, 4, 29).unwrap(),
        InstrumentType::Index,
    );
    let err = retrieve_option_chain_with(&transport, &config(), &request)
        .await
        .unwrap_err();
    match err {
        OptionChainError::Shape(ShapeError::ExpiryNotFound { available, .. }) => {
            assert_eq!(
                available,
                vec![expiry(), NaiveDate::from_ymd_opt(2027, 3, 25).unwrap()]
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn raw_response_groups_by_expiry() {
    let (_, raw) = response::parse_body(FIXTURE).unwrap();
    let groups = raw.by_expiry();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[&expiry()].len(), 3);
    assert_eq!(raw.filtered.as_ref().unwrap().put.as_ref().unwrap().total_oi, Some(94270.0));
}

#[test]
fn strike_window_and_export() {
    let (_, raw) = response::parse_body(FIXTURE).unwrap();
    let options = ShapeOptions {
        sort_by_strike: true,
        strike_window: Some(StrikeWindow {
            strikes: 1,
            multiple: Some(50.0),
        }),
    };
    // ATM 22500, window 22450..=22550
    let (rows, metrics) = shaper::shape(&raw, "NIFTY", expiry(), &options).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].strike, 22500.0);
    assert_eq!(metrics.rows, 1);

    let table = export::to_table(&rows);
    let strike_col = table
        .columns
        .iter()
        .position(|c| c == "strikePrice")
        .unwrap();
    assert_eq!(table.rows[0][strike_col], Cell::Number(22500.0));

    let path = std::env::temp_dir().join(format!("nseoptions-{}-chain.csv", std::process::id()));
    export::save_csv(&table, &path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    fs::remove_file(&path).ok();
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("NIFTY,2027-02-27,60115,8890"));
}
