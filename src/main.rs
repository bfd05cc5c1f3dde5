use std::{env, path::PathBuf, time::Duration};

use chrono::{Local, NaiveDate};
use clap::{Args as ClapArgs, Parser, Subcommand};
use dotenv::dotenv;
use rusqlite::Connection;

use nseoptions::{
    config::Configuration,
    export,
    model::{InstrumentType, OptionChain, Result},
    nse::response,
    pull_option::{self, ChainRequest},
    shaper::{ShapeOptions, StrikeWindow},
    store,
};

const MAX_BACKOFF_SECS: u64 = 300;

// Command-line argument parser.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

// Subcommands for the application.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the option chain once.
    Fetch(FetchArgs),
    /// Refresh the option chain every `interval` seconds until interrupted.
    Watch {
        #[command(flatten)]
        fetch: FetchArgs,
        #[arg(long, default_value_t = 30)]
        interval: u64,
        /// Retries per refresh for transient failures.
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
}

#[derive(ClapArgs, Debug)]
struct FetchArgs {
    #[arg(long, default_value = "NIFTY")]
    symbol: String,
    /// Expiry as 27-Feb-2027 or 2027-02-27.
    #[arg(long, value_parser = parse_expiry_arg)]
    expiry: NaiveDate,
    #[arg(long, value_enum, default_value_t = InstrumentType::Index)]
    instrument: InstrumentType,
    /// YAML merged over the defaults. Falls back to NSEOPTIONS_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep only this many strikes either side of ATM.
    #[arg(long)]
    strikes: Option<u32>,
    /// Strike spacing used with --strikes.
    #[arg(long, requires = "strikes")]
    multiple: Option<f64>,
    #[arg(long)]
    sort: bool,
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Directory for raw JSON snapshots.
    #[arg(long)]
    json_dir: Option<PathBuf>,
    #[arg(long)]
    sqlite: Option<PathBuf>,
    /// Skip TLS certificate verification.
    #[arg(long)]
    no_verify: bool,
}

fn parse_expiry_arg(value: &str) -> std::result::Result<NaiveDate, String> {
    response::parse_expiry(value)
        .ok_or_else(|| format!("expected DD-MMM-YYYY or YYYY-MM-DD, got {:?}", value))
}

#[tokio::main]
// Main function entry point.
async fn main() {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Fetch(fetch) => run_once(&fetch).await,
        Commands::Watch {
            fetch,
            interval,
            retries,
        } => watch(&fetch, interval, retries).await,
    };

    if let Err(err) = result {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

// Everything a run needs, built once from the arguments.
struct Setup {
    config: Configuration,
    request: ChainRequest,
    conn: Option<Connection>,
}

fn prepare(args: &FetchArgs) -> Result<Setup> {
    let config_path = args
        .config
        .clone()
        .or_else(|| env::var("NSEOPTIONS_CONFIG").ok().map(PathBuf::from));
    let mut config = Configuration::load(config_path.as_deref())?;
    if args.no_verify {
        config.http.verify_tls = false;
    }

    let mut request = ChainRequest::new(&args.symbol, args.expiry, args.instrument);
    request.options = ShapeOptions {
        sort_by_strike: args.sort,
        strike_window: args.strikes.map(|strikes| StrikeWindow {
            strikes,
            multiple: args.multiple,
        }),
    };

    let conn = match &args.sqlite {
        Some(path) => {
            let conn = store::sqlite::init_connection(path)?;
            store::option_chain::create_table(&conn)?;
            Some(conn)
        }
        None => None,
    };

    Ok(Setup {
        config,
        request,
        conn,
    })
}

async fn run_once(args: &FetchArgs) -> Result<()> {
    let mut setup = prepare(args)?;
    let chain = pull_option::retrieve_option_chain(&setup.config, &setup.request).await?;
    publish(args, &chain, setup.conn.as_mut())
}

async fn watch(args: &FetchArgs, interval: u64, retries: u32) -> Result<()> {
    let mut setup = prepare(args)?;
    log::info!(
        "refreshing {} every {}s, press Ctrl+C to stop",
        setup.request.symbol,
        interval
    );

    loop {
        match fetch_with_retries(&setup, retries).await {
            Ok(chain) => publish(args, &chain, setup.conn.as_mut())?,
            Err(err) => log::error!("refresh failed: {}", err),
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, stopping");
                return Ok(());
            }
        }
    }
}

// Retries transient failures with exponential backoff; permanent ones return at once.
async fn fetch_with_retries(setup: &Setup, retries: u32) -> Result<OptionChain> {
    let mut attempt = 0;
    loop {
        match pull_option::retrieve_option_chain(&setup.config, &setup.request).await {
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                let delay = backoff(attempt);
                log::warn!("attempt {} failed: {}; retrying in {:?}", attempt, err, delay);
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

// Doubles from two seconds, capped at five minutes.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS))
}

fn publish(args: &FetchArgs, chain: &OptionChain, conn: Option<&mut Connection>) -> Result<()> {
    print_summary(chain);

    if let Some(path) = &args.csv {
        export::save_csv(&export::to_table(&chain.rows), path)?;
        log::info!("wrote {} rows to {}", chain.rows.len(), path.display());
    }

    if let Some(dir) = &args.json_dir {
        let label = match chain.metrics.timestamp {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let path = export::save_snapshot(&chain.json, &chain.symbol, &label, dir)?;
        log::info!("saved response to {}", path.display());
    }

    if let Some(conn) = conn {
        let saved = store::option_chain::save_option_chain(conn, chain)?;
        log::info!("stored {} rows", saved);
    }
    Ok(())
}

fn print_summary(chain: &OptionChain) {
    let m = &chain.metrics;
    let show = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());

    println!(
        "{} : {} expiring {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        chain.symbol,
        response::format_expiry(chain.expiry)
    );
    println!("  >> Response Timestamp : {}", chain.raw.records.timestamp.as_deref().unwrap_or("-"));
    println!("  >> Underlying Value   : {}", show(m.underlying_value));
    println!("  >> ATM Strike Price   : {}", show(m.atm_strike));
    println!("  >> Strikes            : {}", m.rows);
    println!("  >> Call OI / Volume   : {:.0} / {:.0}", m.total_call_oi, m.total_call_volume);
    println!("  >> Put OI / Volume    : {:.0} / {:.0}", m.total_put_oi, m.total_put_volume);
    println!("  >> Put-Call Ratio     : {}", show(m.put_call_ratio));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(9), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff(64), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(MAX_BACKOFF_SECS));
    }
}
