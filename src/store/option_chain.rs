use rusqlite::{params, Connection, Result};

use crate::model::{OptionChain, OptionSide, ShapedRow, SideQuote};

pub fn create_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS option_chain (
            symbol TEXT NOT NULL,
            expiry TEXT NOT NULL,
            strike REAL NOT NULL,
            fetched_at TEXT NOT NULL,
            ce_open_interest REAL,
            ce_change_in_oi REAL,
            ce_volume REAL,
            ce_iv REAL,
            ce_last_price REAL,
            ce_bid REAL,
            ce_ask REAL,
            pe_open_interest REAL,
            pe_change_in_oi REAL,
            pe_volume REAL,
            pe_iv REAL,
            pe_last_price REAL,
            pe_bid REAL,
            pe_ask REAL
    );",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_symbol_expiry_strike_fetched ON option_chain (symbol, expiry, strike, fetched_at);",
        [],
    )?;
    Ok(())
}

/// Saves every row of a chain under the time the response was received.
pub fn save_option_chain(conn: &mut Connection, chain: &OptionChain) -> Result<usize> {
    let fetched_at = chain.meta.received_at.to_rfc3339();
    save_rows(conn, &chain.rows, &fetched_at)
}

pub fn save_rows(conn: &mut Connection, rows: &[ShapedRow], fetched_at: &str) -> Result<usize> {
    let transaction = conn.transaction()?;
    let mut saved = 0;
    {
        let mut stmt = transaction.prepare(
            "REPLACE INTO option_chain (
    symbol,
    expiry,
    strike,
    fetched_at,
    ce_open_interest,
    ce_change_in_oi,
    ce_volume,
    ce_iv,
    ce_last_price,
    ce_bid,
    ce_ask,
    pe_open_interest,
    pe_change_in_oi,
    pe_volume,
    pe_iv,
    pe_last_price,
    pe_bid,
    pe_ask
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18
);",
        )?;
        for row in rows {
            let field = |side: OptionSide, get: fn(&SideQuote) -> Option<f64>| {
                row.side(side).and_then(get)
            };
            saved += stmt.execute(params![
                row.symbol,
                row.expiry.to_string(),
                row.strike,
                fetched_at,
                field(OptionSide::Call, |q| q.open_interest),
                field(OptionSide::Call, |q| q.change_in_open_interest),
                field(OptionSide::Call, |q| q.total_traded_volume),
                field(OptionSide::Call, |q| q.implied_volatility),
                field(OptionSide::Call, |q| q.last_price),
                field(OptionSide::Call, |q| q.bid_price),
                field(OptionSide::Call, |q| q.ask_price),
                field(OptionSide::Put, |q| q.open_interest),
                field(OptionSide::Put, |q| q.change_in_open_interest),
                field(OptionSide::Put, |q| q.total_traded_volume),
                field(OptionSide::Put, |q| q.implied_volatility),
                field(OptionSide::Put, |q| q.last_price),
                field(OptionSide::Put, |q| q.bid_price),
                field(OptionSide::Put, |q| q.ask_price),
            ])?;
        }
    }
    transaction.commit()?;
    Ok(saved)
}

/// Number of stored rows for a symbol, across all snapshots.
pub fn count_rows(conn: &Connection, symbol: &str) -> Result<u64> {
    conn.query_row(
        "SELECT COUNT(*) FROM option_chain WHERE symbol = ?1",
        params![symbol],
        |row| row.get(0),
    )
}
