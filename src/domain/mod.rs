//! Core domain types and logic.

pub mod account;
pub mod candle;
pub mod config_validation;
pub mod engine;
pub mod enriched;
pub mod error;
pub mod gap;
pub mod indicator;
pub mod pipeline;
pub mod position;
pub mod risk;
pub mod settings;
pub mod signal;
pub mod strategy;
pub mod strategy_manager;
pub mod timeframe;
pub mod trade_record;
