use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use csv::Writer;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Metrics, OptionSide, ShapedRow, SideQuote};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// A typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Integer(i64),
    Date(NaiveDate),
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => Cell::Number(v),
            None => Cell::Empty,
        }
    }
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Integer(n) => n.to_string(),
            Cell::Date(d) => d.to_string(),
        }
    }
}

/// Rows and columns ready for a spreadsheet writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

// Per-side fields in the order the provider's option chain page shows calls.
// Puts are shown mirrored, on the other side of the strike column.
const SIDE_FIELDS: [(&str, fn(&SideQuote) -> Option<f64>); 14] = [
    ("openInterest", |q| q.open_interest),
    ("changeinOpenInterest", |q| q.change_in_open_interest),
    ("pchangeinOpenInterest", |q| q.pchange_in_open_interest),
    ("totalTradedVolume", |q| q.total_traded_volume),
    ("impliedVolatility", |q| q.implied_volatility),
    ("lastPrice", |q| q.last_price),
    ("change", |q| q.change),
    ("pChange", |q| q.pchange),
    ("totalBuyQuantity", |q| q.total_buy_quantity),
    ("totalSellQuantity", |q| q.total_sell_quantity),
    ("bidQty", |q| q.bid_qty),
    ("bidprice", |q| q.bid_price),
    ("askQty", |q| q.ask_qty),
    ("askPrice", |q| q.ask_price),
];

fn side_columns(side: OptionSide) -> Vec<String> {
    let columns = SIDE_FIELDS
        .iter()
        .map(|(name, _)| format!("{}_{}", name, side.suffix()));
    match side {
        OptionSide::Call => columns.collect(),
        OptionSide::Put => columns.rev().collect(),
    }
}

fn side_cells(quote: Option<&SideQuote>, side: OptionSide) -> Vec<Cell> {
    let cells = SIDE_FIELDS
        .iter()
        .map(|(_, field)| Cell::from(quote.and_then(|q| field(q))));
    match side {
        OptionSide::Call => cells.collect(),
        OptionSide::Put => cells.rev().collect(),
    }
}

/// Lays out rows as: symbol, expiry, call fields, strike, put fields mirrored.
pub fn to_table(rows: &[ShapedRow]) -> Table {
    let mut columns = vec!["symbol".to_string(), "expiry".to_string()];
    columns.extend(side_columns(OptionSide::Call));
    columns.push("strikePrice".to_string());
    columns.extend(side_columns(OptionSide::Put));

    let rows = rows
        .iter()
        .map(|row| {
            let mut cells = Vec::with_capacity(columns.len());
            cells.push(Cell::Text(row.symbol.clone()));
            cells.push(Cell::Date(row.expiry));
            cells.extend(side_cells(row.call.as_ref(), OptionSide::Call));
            cells.push(Cell::Number(row.strike));
            cells.extend(side_cells(row.put.as_ref(), OptionSide::Put));
            cells
        })
        .collect();

    Table { columns, rows }
}

/// Metrics as two-column `metric,value` rows.
pub fn metrics_table(metrics: &Metrics) -> Table {
    let rows = vec![
        ("rows", Cell::Integer(metrics.rows as i64)),
        ("underlyingValue", Cell::from(metrics.underlying_value)),
        ("atmStrike", Cell::from(metrics.atm_strike)),
        ("totalCallOI", Cell::Number(metrics.total_call_oi)),
        ("totalPutOI", Cell::Number(metrics.total_put_oi)),
        ("totalCallVolume", Cell::Number(metrics.total_call_volume)),
        ("totalPutVolume", Cell::Number(metrics.total_put_volume)),
        ("totalCallOIChange", Cell::Number(metrics.total_call_oi_change)),
        ("totalPutOIChange", Cell::Number(metrics.total_put_oi_change)),
        ("putCallRatio", Cell::from(metrics.put_call_ratio)),
        ("volumePutCallRatio", Cell::from(metrics.volume_put_call_ratio)),
        (
            "timestamp",
            metrics
                .timestamp
                .map(|t| Cell::Text(t.to_rfc3339()))
                .unwrap_or(Cell::Empty),
        ),
    ];
    Table {
        columns: vec!["metric".to_string(), "value".to_string()],
        rows: rows
            .into_iter()
            .map(|(name, value)| vec![Cell::Text(name.to_string()), value])
            .collect(),
    }
}

pub fn write_csv<W: Write>(table: &Table, writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::render))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn table_to_csv_vec(table: &Table) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_csv(table, &mut buf)?;
    Ok(buf)
}

pub fn save_csv(table: &Table, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_csv(table, BufWriter::new(File::create(path)?))
}

/// Writes the response body as pretty JSON to `<dir>/<SYMBOL> at <label>.json`.
/// Colons are stripped from the label so the name is valid on every platform.
pub fn save_snapshot(json: &Value, symbol: &str, label: &str, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let filename = format!("{} at {}.json", symbol.to_uppercase(), label.replace(':', ""));
    let path = dir.join(filename);
    let file = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(file, json)?;
    log::debug!("saved response snapshot to {}", path.display());
    Ok(path)
}
