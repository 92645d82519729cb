//! Concrete adapter implementations for ports.

pub mod csv_exchange;
pub mod csv_trade_log;
pub mod file_config_adapter;
pub mod system_clock;
