//! Reconciliation sweeps.
//!
//! Two periodic checks keep the ledger honest: every stored wallet balance is
//! compared with the sum of its transaction log, and refund intents that never
//! reached the gateway successfully are retried until they succeed or run out
//! of attempts. The refund sweep only runs when a gateway adapter is
//! configured; without one it would have nothing to send the refunds to.

use crate::{
    core::{
        cancellation::{RefundAttempt, claimable, settle_refund_intent},
        context::SettlementContext,
        wallet::recompute_balance,
    },
    entities::{RefundIntent, RefundIntentStatus, Wallet, refund_intent},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{QueryOrder, prelude::*};
use std::time::Duration;
use tracing::{error, info, warn};

/// A wallet whose stored balance disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDrift {
    /// Wallet id
    pub wallet_id: i64,
    /// Wallet owner
    pub user_id: String,
    /// Balance column
    pub stored_balance: i64,
    /// Sum of the wallet's ledger entries
    pub ledger_balance: i64,
}

/// Counts from one refund sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefundSweepReport {
    /// Pending intents found
    pub examined: usize,
    /// Refunds the gateway accepted this time
    pub refunded: usize,
    /// Intents left pending for the next sweep
    pub still_pending: usize,
    /// Intents given up on
    pub failed: usize,
    /// Intents claimed by another worker in the meantime
    pub in_progress: usize,
}

/// Compares every wallet's stored balance with its ledger.
pub async fn reconcile_wallets(db: &DatabaseConnection) -> Result<Vec<WalletDrift>> {
    let wallets = Wallet::find().all(db).await?;
    let mut drifts = Vec::new();

    for wallet in wallets {
        let ledger_balance = recompute_balance(db, wallet.id).await?;
        if ledger_balance != wallet.balance {
            warn!(
                wallet_id = wallet.id,
                user_id = %wallet.user_id,
                stored = wallet.balance,
                ledger = ledger_balance,
                "Wallet balance drifted from its ledger"
            );
            drifts.push(WalletDrift {
                wallet_id: wallet.id,
                user_id: wallet.user_id,
                stored_balance: wallet.balance,
                ledger_balance,
            });
        }
    }
    Ok(drifts)
}

/// Retries every pending refund intent once, oldest first.
///
/// In-flight intents are left alone until their claim outlives
/// `reconciliation.refund_lease_secs`.
pub async fn retry_pending_refunds(ctx: &SettlementContext) -> Result<RefundSweepReport> {
    let intents = RefundIntent::find()
        .filter(claimable(
            ctx.config.reconciliation.refund_lease_secs,
            Utc::now(),
        ))
        .order_by_asc(refund_intent::Column::Id)
        .all(&ctx.database)
        .await?;

    let mut report = RefundSweepReport {
        examined: intents.len(),
        ..RefundSweepReport::default()
    };
    for intent in &intents {
        match settle_refund_intent(ctx, intent).await? {
            RefundAttempt::Refunded => report.refunded += 1,
            RefundAttempt::Retrying => report.still_pending += 1,
            RefundAttempt::GaveUp => report.failed += 1,
            RefundAttempt::InProgress => report.in_progress += 1,
        }
    }
    if report.examined > 0 {
        info!(?report, "Refund sweep finished");
    }
    Ok(report)
}

/// Runs the sweeps once, logging instead of failing.
///
/// The refund sweep runs only when `sweep_refunds` is set.
pub async fn run_sweeps(ctx: &SettlementContext, sweep_refunds: bool) {
    match reconcile_wallets(&ctx.database).await {
        Ok(drifts) if !drifts.is_empty() => {
            error!(wallets = drifts.len(), "Wallet drift detected");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Wallet reconciliation failed"),
    }
    if !sweep_refunds {
        return;
    }
    if let Err(e) = retry_pending_refunds(ctx).await {
        error!(error = %e, "Refund sweep failed");
    }
}

/// Runs the sweeps on the configured interval until the future is dropped.
pub async fn run_periodically(ctx: SettlementContext, sweep_refunds: bool) {
    let period = Duration::from_secs(ctx.config.reconciliation.interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_sweeps(&ctx, sweep_refunds).await;
    }
}
