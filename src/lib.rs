//! Option chain data from NSE India.
//!
//! The pipeline is three stages: [`config::Configuration::load`] reads the
//! headers and URL templates, [`nse::api_caller::fetch`] retrieves and parses
//! the provider's JSON over a cookie-carrying session, and
//! [`shaper::shape`] flattens one expiry into rows with summary metrics.
//! [`pull_option::retrieve_option_chain`] runs all three.

// Settings loader with deep merge of user overrides.
pub mod config;
// Spreadsheet-ready tables, CSV and JSON snapshot writers.
pub mod export;
// HTTP client module.
pub mod http {
    // Session, transport seam and status policy.
    pub mod client;
}
// Data models and the crate error.
pub mod model;
// NSE India provider.
pub mod nse {
    // Warm-up and option chain requests.
    pub mod api_caller;
    // Response structures for the option chain payload.
    pub mod response;
}
// Fetch then shape, as one call.
pub mod pull_option;
// JSON to rows and metrics.
pub mod shaper;
// Snapshot storage module.
pub mod store {
    /// Option chain snapshot table.
    pub mod option_chain;
    /// SQLite connection setup.
    pub mod sqlite;
}

pub use config::Configuration;
pub use model::{
    InstrumentType, Metrics, OptionChain, OptionChainError, Result, ShapedRow, SideQuote,
};
pub use pull_option::{retrieve_option_chain, retrieve_option_chain_with, ChainRequest};
pub use shaper::{shape, ShapeOptions, StrikeWindow};
