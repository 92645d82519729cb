//! Port traits at the collaborator seams.

pub mod clock;
pub mod config_port;
pub mod exchange_port;
pub mod trade_log_port;
