//! Typed settings built from the INI configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::enriched::IndicatorSettings;
use crate::domain::error::BotError;
use crate::domain::gap::DEFAULT_GAP_THRESHOLD;
use crate::domain::indicator::pivot;
use crate::domain::risk::RiskSettings;
use crate::domain::strategy::ichimoku::IchimokuSettings;
use crate::domain::strategy::registry::StrategySettings;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_CANDLE_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSettings {
    pub symbol: String,
    pub quote_asset: String,
    pub timeframe: Timeframe,
    pub candle_limit: usize,
    /// Directory holding the candle files replayed by the paper exchange.
    pub data_dir: Option<PathBuf>,
    pub starting_balance: f64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        ExchangeSettings {
            symbol: "BTCUSDT".into(),
            quote_asset: "USDT".into(),
            timeframe: Timeframe::M5,
            candle_limit: DEFAULT_CANDLE_LIMIT,
            data_dir: None,
            starting_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub interval: Duration,
    pub risk: RiskSettings,
    pub enabled_strategies: Vec<String>,
    /// Collapse each cycle's signals through the majority vote.
    pub combine: bool,
    pub strategies: StrategySettings,
    pub indicators: IndicatorSettings,
    pub trade_log: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            exchange: ExchangeSettings::default(),
            interval: Duration::from_secs(60),
            risk: RiskSettings::default(),
            enabled_strategies: vec!["ichimoku".to_string()],
            combine: false,
            strategies: StrategySettings::default(),
            indicators: IndicatorSettings::default(),
            trade_log: None,
        }
    }
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Settings, BotError> {
        let defaults = Settings::default();

        let timeframe = match config.get_string("exchange", "timeframe") {
            Some(raw) => raw.trim().parse::<Timeframe>()?,
            None => defaults.exchange.timeframe,
        };

        let exchange = ExchangeSettings {
            symbol: config
                .get_string("exchange", "symbol")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.exchange.symbol),
            quote_asset: config
                .get_string("exchange", "quote_asset")
                .map(|s| s.trim().to_uppercase())
                .unwrap_or(defaults.exchange.quote_asset),
            timeframe,
            candle_limit: get_count(config, "exchange", "candle_limit", DEFAULT_CANDLE_LIMIT)?,
            data_dir: config.get_string("exchange", "data_dir").map(PathBuf::from),
            starting_balance: config.get_double(
                "exchange",
                "starting_balance",
                defaults.exchange.starting_balance,
            ),
        };

        let interval_secs = get_count(config, "loop", "interval_secs", 60)?;

        let risk_defaults = RiskSettings::default();
        let risk = RiskSettings {
            max_position_size: config.get_double(
                "risk",
                "max_position_size",
                risk_defaults.max_position_size,
            ),
            risk_per_trade: config.get_double("risk", "risk_per_trade", risk_defaults.risk_per_trade),
            max_open_trades: get_count(config, "risk", "max_open_trades", risk_defaults.max_open_trades)?,
            use_stop_loss: config.get_bool("risk", "use_stop_loss", risk_defaults.use_stop_loss),
            stop_loss_pct: config.get_double("risk", "stop_loss_pct", risk_defaults.stop_loss_pct),
            take_profit_pct: config.get_double(
                "risk",
                "take_profit_pct",
                risk_defaults.take_profit_pct,
            ),
            use_trailing_stop: config.get_bool(
                "risk",
                "use_trailing_stop",
                risk_defaults.use_trailing_stop,
            ),
            trailing_stop_pct: config.get_double(
                "risk",
                "trailing_stop_pct",
                risk_defaults.trailing_stop_pct,
            ),
            min_position_size: config.get_double(
                "risk",
                "min_position_size",
                risk_defaults.min_position_size,
            ),
            quantity_decimals: get_count(
                config,
                "risk",
                "quantity_decimals",
                risk_defaults.quantity_decimals as usize,
            )? as u32,
        };

        let ichimoku_defaults = IchimokuSettings::default();
        let ichimoku = IchimokuSettings {
            tenkan_period: get_count(config, "ichimoku", "tenkan_period", ichimoku_defaults.tenkan_period)?,
            kijun_period: get_count(config, "ichimoku", "kijun_period", ichimoku_defaults.kijun_period)?,
            senkou_span_b_period: get_count(
                config,
                "ichimoku",
                "senkou_span_b_period",
                ichimoku_defaults.senkou_span_b_period,
            )?,
            displacement: get_count(config, "ichimoku", "displacement", ichimoku_defaults.displacement)?,
        };

        let indicators = IndicatorSettings {
            pivot_lookback: get_count(config, "indicators", "pivot_lookback", pivot::DEFAULT_LOOKBACK)?,
            gap_threshold: config.get_double("indicators", "gap_threshold", DEFAULT_GAP_THRESHOLD),
        };

        Ok(Settings {
            exchange,
            interval: Duration::from_secs(interval_secs as u64),
            risk,
            enabled_strategies: config
                .get_list("strategies", "enabled")
                .unwrap_or(defaults.enabled_strategies),
            combine: config.get_bool("strategies", "combine", defaults.combine),
            strategies: StrategySettings { ichimoku },
            indicators,
            trade_log: config.get_string("trade_log", "path").map(PathBuf::from),
        })
    }
}

/// A non-negative integer setting.
fn get_count(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, BotError> {
    let value = config.get_int(section, key, default as i64);
    usize::try_from(value).map_err(|_| BotError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("{} must not be negative", key),
    })
}
