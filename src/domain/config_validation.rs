//! Configuration validation.
//!
//! Checks every field the engine depends on before anything runs.

use crate::domain::error::BotError;
use crate::domain::strategy::registry;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), BotError> {
    validate_exchange_config(config)?;
    validate_risk_config(config)?;
    validate_strategy_config(config)?;
    Ok(())
}

pub fn validate_exchange_config(config: &dyn ConfigPort) -> Result<(), BotError> {
    validate_symbol(config)?;
    validate_timeframe(config)?;
    validate_candle_limit(config)?;
    validate_data_dir(config)?;
    require_positive(config, "exchange", "starting_balance", 10_000.0)?;
    validate_interval(config)?;
    Ok(())
}

pub fn validate_risk_config(config: &dyn ConfigPort) -> Result<(), BotError> {
    require_positive(config, "risk", "max_position_size", 0.01)?;
    require_fraction(config, "risk", "risk_per_trade", 0.01)?;
    require_fraction(config, "risk", "stop_loss_pct", 0.02)?;
    require_fraction(config, "risk", "take_profit_pct", 0.04)?;
    require_fraction(config, "risk", "trailing_stop_pct", 0.01)?;
    validate_max_open_trades(config)?;
    validate_min_position_size(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), BotError> {
    validate_enabled_strategies(config)?;
    for key in [
        "tenkan_period",
        "kijun_period",
        "senkou_span_b_period",
        "displacement",
    ] {
        require_period(config, "ichimoku", key)?;
    }
    require_period(config, "indicators", "pivot_lookback")?;
    require_fraction(config, "indicators", "gap_threshold", 0.005)?;
    Ok(())
}

fn validate_symbol(config: &dyn ConfigPort) -> Result<(), BotError> {
    let symbol = config
        .get_string("exchange", "symbol")
        .unwrap_or_else(|| "BTCUSDT".to_string());
    let quote = config
        .get_string("exchange", "quote_asset")
        .unwrap_or_else(|| "USDT".to_string());

    if quote.trim().is_empty() {
        return Err(BotError::ConfigInvalid {
            section: "exchange".to_string(),
            key: "quote_asset".to_string(),
            reason: "quote_asset must not be empty".to_string(),
        });
    }
    let symbol = symbol.trim().to_uppercase();
    let quote = quote.trim().to_uppercase();
    if symbol.len() <= quote.len() || !symbol.ends_with(&quote) {
        return Err(BotError::ConfigInvalid {
            section: "exchange".to_string(),
            key: "symbol".to_string(),
            reason: format!("symbol must be a base asset quoted in {}", quote),
        });
    }
    Ok(())
}

fn validate_timeframe(config: &dyn ConfigPort) -> Result<(), BotError> {
    if let Some(raw) = config.get_string("exchange", "timeframe") {
        raw.trim().parse::<Timeframe>()?;
    }
    Ok(())
}

fn validate_candle_limit(config: &dyn ConfigPort) -> Result<(), BotError> {
    let value = config.get_int("exchange", "candle_limit", 500);
    if value < 1 {
        return Err(BotError::ConfigInvalid {
            section: "exchange".to_string(),
            key: "candle_limit".to_string(),
            reason: "candle_limit must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_data_dir(config: &dyn ConfigPort) -> Result<(), BotError> {
    match config.get_string("exchange", "data_dir") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(BotError::ConfigMissing {
            section: "exchange".to_string(),
            key: "data_dir".to_string(),
        }),
    }
}

fn validate_interval(config: &dyn ConfigPort) -> Result<(), BotError> {
    let value = config.get_int("loop", "interval_secs", 60);
    if value < 0 {
        return Err(BotError::ConfigInvalid {
            section: "loop".to_string(),
            key: "interval_secs".to_string(),
            reason: "interval_secs must be non-negative".to_string(),
        });
    }
    Ok(())
}

fn validate_max_open_trades(config: &dyn ConfigPort) -> Result<(), BotError> {
    let value = config.get_int("risk", "max_open_trades", 3);
    if value < 1 {
        return Err(BotError::ConfigInvalid {
            section: "risk".to_string(),
            key: "max_open_trades".to_string(),
            reason: "max_open_trades must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_min_position_size(config: &dyn ConfigPort) -> Result<(), BotError> {
    let min = config.get_double("risk", "min_position_size", 0.00001);
    let max = config.get_double("risk", "max_position_size", 0.01);
    if min < 0.0 {
        return Err(BotError::ConfigInvalid {
            section: "risk".to_string(),
            key: "min_position_size".to_string(),
            reason: "min_position_size must be non-negative".to_string(),
        });
    }
    if min > max {
        return Err(BotError::ConfigInvalid {
            section: "risk".to_string(),
            key: "min_position_size".to_string(),
            reason: "min_position_size must not exceed max_position_size".to_string(),
        });
    }
    Ok(())
}

fn validate_enabled_strategies(config: &dyn ConfigPort) -> Result<(), BotError> {
    let enabled = config
        .get_list("strategies", "enabled")
        .unwrap_or_else(|| vec!["ichimoku".to_string()]);
    if enabled.is_empty() {
        return Err(BotError::ConfigInvalid {
            section: "strategies".to_string(),
            key: "enabled".to_string(),
            reason: "at least one strategy must be enabled".to_string(),
        });
    }
    if let Some(unknown) = enabled.iter().find(|id| registry::lookup(id).is_none()) {
        return Err(BotError::UnknownStrategy {
            name: unknown.clone(),
        });
    }
    Ok(())
}

fn require_positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<(), BotError> {
    let value = config.get_double(section, key, default);
    if !(value > 0.0) || !value.is_finite() {
        return Err(BotError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{} must be positive", key),
        });
    }
    Ok(())
}

/// Strictly between 0 and 1.
fn require_fraction(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<(), BotError> {
    let value = config.get_double(section, key, default);
    if !(value > 0.0 && value < 1.0) {
        return Err(BotError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{} must be between 0 and 1", key),
        });
    }
    Ok(())
}

fn require_period(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), BotError> {
    // Absent keys fall back to valid defaults.
    let value = config.get_int(section, key, 1);
    if value < 1 {
        return Err(BotError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("{} must be at least 1", key),
        });
    }
    Ok(())
}
