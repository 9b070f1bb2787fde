//! Settlement policy configuration loaded from `settlement.toml`.
//!
//! Every money-affecting constant lives here: the commission rate table, the
//! payout floor, the refund tiers and the gateway retry budget. Every field
//! has a default, so a missing file yields a working configuration.

use crate::entities::SourceType;
use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_CONFIG_PATH: &str = "settlement.toml";

/// Full settlement configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Canonical commission rate table
    pub commission: CommissionRates,
    /// Payout batching settings
    pub payout: PayoutSettings,
    /// Refund tiers and cancellation policy
    pub refund: RefundSettings,
    /// Wallet settings
    pub wallet: WalletSettings,
    /// Gateway retry budget
    pub gateway: GatewaySettings,
    /// Reconciliation sweep settings
    pub reconciliation: ReconciliationSettings,
}

/// The single place commission rates are defined.
///
/// One rate per source type, plus optional per-resource overrides for tiered
/// pricing. Rates are fractions in `[0, 1]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommissionRates {
    /// Rate applied to course sales
    pub course: Decimal,
    /// Rate applied to live-session sales
    pub live_session: Decimal,
    /// Per-resource overrides keyed by resource id
    pub overrides: BTreeMap<String, Decimal>,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            course: dec!(0.20),
            live_session: dec!(0.20),
            overrides: BTreeMap::new(),
        }
    }
}

impl CommissionRates {
    /// Rate for a sale of `resource_id` under `source_type`.
    #[must_use]
    pub fn rate_for(&self, source_type: SourceType, resource_id: i64) -> Decimal {
        if let Some(rate) = self.overrides.get(&resource_id.to_string()) {
            return *rate;
        }
        match source_type {
            SourceType::Course => self.course,
            SourceType::LiveSession => self.live_session,
        }
    }

    fn validate(&self) -> Result<()> {
        let all = [("course", &self.course), ("live_session", &self.live_session)]
            .into_iter()
            .chain(self.overrides.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, rate) in all {
            if *rate < Decimal::ZERO || *rate > Decimal::ONE {
                return Err(Error::Config {
                    message: format!("commission rate '{name}' must be within [0, 1], got {rate}"),
                });
            }
        }
        Ok(())
    }
}

/// Payout batching settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayoutSettings {
    /// Smallest pending net balance an instructor may withdraw (minor units)
    pub minimum_amount: i64,
}

impl Default for PayoutSettings {
    fn default() -> Self {
        Self {
            minimum_amount: 5000,
        }
    }
}

/// Refund percentage applied when the instructor cancels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructorCancellationPolicy {
    /// Same time-based tiers as a student cancellation
    #[default]
    Tiered,
    /// Always refund the full amount
    FullRefund,
}

/// Refund tiers and cancellation policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefundSettings {
    /// Hours before start from which a full refund applies (inclusive)
    pub full_refund_hours: i64,
    /// Hours before start from which a partial refund applies (inclusive)
    pub partial_refund_hours: i64,
    /// Fraction refunded in the partial tier
    pub partial_percentage: Decimal,
    /// Policy for instructor-initiated cancellations
    pub instructor_policy: InstructorCancellationPolicy,
}

impl Default for RefundSettings {
    fn default() -> Self {
        Self {
            full_refund_hours: 48,
            partial_refund_hours: 24,
            partial_percentage: dec!(0.5),
            instructor_policy: InstructorCancellationPolicy::Tiered,
        }
    }
}

/// Wallet settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    /// Currency of newly created wallets
    pub currency: String,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
        }
    }
}

/// Which payment gateway adapter the worker talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayProvider {
    /// No adapter; gateway calls fail and the refund sweep does not run
    #[default]
    Disabled,
    /// In-process sandbox; refunds are simulated and no money moves
    Sandbox,
}

/// Gateway adapter and retry budget for gateway calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Adapter used by the worker
    pub provider: GatewayProvider,
    /// First backoff delay in milliseconds
    pub retry_min_delay_ms: u64,
    /// Largest backoff delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// Retries after the first attempt
    pub retry_max_times: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::Disabled,
            retry_min_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            retry_max_times: 3,
        }
    }
}

/// Reconciliation sweep settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Sweep attempts after which a refund intent is marked failed
    pub max_refund_attempts: i32,
    /// Seconds after which an in-flight refund claim may be taken over
    pub refund_lease_secs: i64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_refund_attempts: 5,
            refund_lease_secs: 300,
        }
    }
}

impl SettlementConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config {
            message: format!("Failed to parse settlement config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.commission.validate()?;
        if self.payout.minimum_amount < 0 {
            return Err(Error::Config {
                message: "payout.minimum_amount must not be negative".to_string(),
            });
        }
        if self.refund.partial_refund_hours > self.refund.full_refund_hours {
            return Err(Error::Config {
                message: format!(
                    "refund.partial_refund_hours ({}) must not exceed refund.full_refund_hours ({})",
                    self.refund.partial_refund_hours, self.refund.full_refund_hours
                ),
            });
        }
        if self.refund.partial_percentage < Decimal::ZERO
            || self.refund.partial_percentage > Decimal::ONE
        {
            return Err(Error::Config {
                message: "refund.partial_percentage must be within [0, 1]".to_string(),
            });
        }
        if self.reconciliation.max_refund_attempts < 1 {
            return Err(Error::Config {
                message: "reconciliation.max_refund_attempts must be at least 1".to_string(),
            });
        }
        if self.reconciliation.refund_lease_secs < 1 {
            return Err(Error::Config {
                message: "reconciliation.refund_lease_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads the settlement configuration from a TOML file.
///
/// A missing file is not an error: the defaults are used instead.
///
/// # Errors
/// Returns an error if the file exists but cannot be read, parsed or validated.
pub fn load_settlement_config<P: AsRef<Path>>(path: P) -> Result<SettlementConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load settlement configuration from: {:?}", path_ref);
    if !path_ref.exists() {
        info!(
            "No settlement configuration at {:?}, using defaults",
            path_ref
        );
        return Ok(SettlementConfig::default());
    }
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    SettlementConfig::from_toml_str(&contents)
}

/// Loads the configuration named by `SETTLEMENT_CONFIG` (default `./settlement.toml`).
pub fn load_from_env() -> Result<SettlementConfig> {
    let path =
        std::env::var("SETTLEMENT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_settlement_config(path)
}
