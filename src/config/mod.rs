/// Database configuration and connection management
pub mod database;

/// Settlement policy configuration loaded from settlement.toml
pub mod settlement;

pub use settlement::{SettlementConfig, load_settlement_config};
