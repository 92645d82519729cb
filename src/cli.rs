//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::adapters::csv_exchange::CsvReplayExchange;
use crate::adapters::csv_trade_log::CsvTradeLog;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::config_validation::validate_config;
use crate::domain::engine::Engine;
use crate::domain::error::BotError;
use crate::domain::settings::Settings;
use crate::domain::strategy::registry;
use crate::ports::clock::Clock;
use crate::ports::config_port::ConfigPort;
use crate::ports::trade_log_port::TradeLogPort;

#[derive(Parser, Debug)]
#[command(name = "kumobot", about = "Candlestick trading decision engine")]
pub struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the decision loop against the replay exchange
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated strategy identifiers, overriding [strategies] enabled
        #[arg(long)]
        strategies: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
        /// Stop after this many cycles (default: until the replay is exhausted)
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.debug);
    match cli.command {
        Command::Run {
            config,
            strategies,
            symbol,
            cycles,
        } => run_engine(&config, strategies.as_deref(), symbol.as_deref(), cycles),
        Command::Validate { config } => run_validate(&config),
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn fail(err: BotError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(&err)
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

/// Validated settings with command-line overrides applied.
pub fn build_settings(
    adapter: &dyn ConfigPort,
    strategies: Option<&str>,
    symbol: Option<&str>,
) -> Result<Settings, BotError> {
    validate_config(adapter)?;
    let mut settings = Settings::from_config(adapter)?;

    if let Some(symbol) = symbol {
        settings.exchange.symbol = symbol.trim().to_uppercase();
    }
    if let Some(list) = strategies {
        let ids: Vec<String> = list
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if let Some(unknown) = ids.iter().find(|id| registry::lookup(id).is_none()) {
            return Err(BotError::UnknownStrategy {
                name: unknown.clone(),
            });
        }
        if ids.is_empty() {
            return Err(BotError::ConfigInvalid {
                section: "strategies".into(),
                key: "enabled".into(),
                reason: "--strategies lists no strategy".into(),
            });
        }
        settings.enabled_strategies = ids;
    }
    Ok(settings)
}

fn run_engine(
    config_path: &Path,
    strategies: Option<&str>,
    symbol: Option<&str>,
    cycles: Option<u64>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let settings = match build_settings(&adapter, strategies, symbol) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };

    let Some(data_dir) = settings.exchange.data_dir.as_deref() else {
        return fail(BotError::ConfigMissing {
            section: "exchange".into(),
            key: "data_dir".into(),
        });
    };
    let exchange = match CsvReplayExchange::open(
        data_dir,
        &settings.exchange.symbol,
        settings.exchange.timeframe,
        &settings.exchange.quote_asset,
        settings.exchange.starting_balance,
    ) {
        Ok(e) => Arc::new(e),
        Err(e) => return fail(e),
    };

    let trade_log: Option<Box<dyn TradeLogPort>> = match settings.trade_log.as_deref() {
        Some(path) => match CsvTradeLog::open(path) {
            Ok(log) => Some(Box::new(log)),
            Err(e) => return fail(e),
        },
        None => None,
    };

    let clock: Arc<dyn Clock> = exchange.clone();
    let max_cycles = cycles.unwrap_or(exchange.remaining() as u64);
    let mut engine = Engine::new(&settings, exchange.clone(), clock, trade_log);
    let shutdown = shutdown_on_ctrl_c();

    match engine.run(Some(max_cycles), &shutdown) {
        Ok(ran) => {
            let open = engine.risk().open_positions();
            println!(
                "{} {}: {} cycles, {} open positions",
                settings.exchange.symbol,
                settings.exchange.timeframe,
                ran,
                open.len()
            );
            for position in open {
                println!(
                    "  {} {} {} @ {:.8} stop {:?} target {:?}",
                    position.symbol,
                    position.side,
                    position.quantity,
                    position.entry_price,
                    position.stop_loss,
                    position.take_profit
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

/// Flag raised when the process receives Ctrl-C. The listener runs on its
/// own thread with a single-threaded runtime.
pub fn shutdown_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            warn!("no Ctrl-C handler: {}", e);
            return flag;
        }
    };

    let raised = Arc::clone(&flag);
    let spawned = thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl-C received, stopping after this cycle");
                        raised.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!("failed to listen for Ctrl-C: {}", e),
                }
            })
        });
    if let Err(e) = spawned {
        warn!("no Ctrl-C handler: {}", e);
    }
    flag
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    match build_settings(&adapter, None, None) {
        Ok(settings) => {
            println!(
                "config OK: {} {}, strategies: {}",
                settings.exchange.symbol,
                settings.exchange.timeframe,
                settings.enabled_strategies.join(",")
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
