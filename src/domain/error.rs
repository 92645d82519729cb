//! Domain error types.

/// Top-level error type for kumobot.
///
/// Risk rejections and insufficient history are deliberately absent: the
/// former is [`crate::domain::risk::TradeDecision::Rejected`], the latter an
/// empty signal list.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("candles unavailable for {symbol} {timeframe}: {reason}")]
    DataUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    #[error("strategy {strategy} failed: {reason}")]
    StrategyFailure { strategy: String, reason: String },

    #[error("order for {symbol} failed: {reason}")]
    Execution { symbol: String, reason: String },

    #[error("exchange error: {reason}")]
    Exchange { reason: String },

    #[error("malformed account state: {reason}")]
    MalformedAccount { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("unknown timeframe '{value}'")]
    UnknownTimeframe { value: String },

    #[error("trade log error: {reason}")]
    TradeLog { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&BotError> for std::process::ExitCode {
    fn from(err: &BotError) -> Self {
        let code: u8 = match err {
            BotError::Io(_) | BotError::TradeLog { .. } => 1,
            BotError::ConfigParse { .. }
            | BotError::ConfigMissing { .. }
            | BotError::ConfigInvalid { .. }
            | BotError::UnknownStrategy { .. }
            | BotError::UnknownTimeframe { .. } => 2,
            BotError::DataUnavailable { .. }
            | BotError::Exchange { .. }
            | BotError::MalformedAccount { .. } => 3,
            BotError::StrategyFailure { .. } => 4,
            BotError::Execution { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
