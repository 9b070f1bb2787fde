//! Wallet ledger store - per-user balances backed by an append-only log.
//!
//! Every balance change appends exactly one `wallet_transactions` row carrying
//! before/after snapshots, inside the same database transaction as the balance
//! update. The balance update is guarded by the wallet's `version` and, for
//! debits, by `balance >= amount`, so two concurrent debits can never both
//! spend the same funds; a writer that loses the race re-reads and retries.
//!
//! `apply_debit`/`apply_credit` work on any connection or open transaction so
//! booking and refund flows can fold a wallet movement into their own atomic
//! unit; `debit`/`credit` wrap them in a transaction of their own.

use crate::{
    core::context::Actor,
    entities::{
        Wallet, WalletTransaction, WalletTransactionType, wallet, wallet_transaction,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{PaginatorTrait, QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

const MAX_OPTIMISTIC_ATTEMPTS: usize = 5;
const MAX_HISTORY_PAGE_SIZE: u64 = 100;

/// A balance movement to apply to a user's wallet.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    /// Wallet owner
    pub user_id: String,
    /// Positive amount in minor units
    pub amount: i64,
    /// Kind of movement
    pub transaction_type: WalletTransactionType,
    /// Human-readable description
    pub description: String,
    /// Optional structured context
    pub metadata: Option<serde_json::Value>,
    /// Currency used if the wallet has to be created
    pub currency: String,
}

impl EntryRequest {
    /// Creates a request without metadata.
    #[must_use]
    pub fn new(
        user_id: &str,
        amount: i64,
        transaction_type: WalletTransactionType,
        description: impl Into<String>,
        currency: &str,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            amount,
            transaction_type,
            description: description.into(),
            metadata: None,
            currency: currency.to_string(),
        }
    }

    /// Attaches structured metadata to the ledger entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The wallet after a movement together with the entry that recorded it.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Wallet state after the movement
    pub wallet: wallet::Model,
    /// Appended ledger row
    pub transaction: wallet_transaction::Model,
}

/// Returns the user's wallet, creating an empty one on first use.
///
/// Creation is race-free: the insert is a no-op when another writer created
/// the wallet first, and the row is read back either way.
pub async fn get_or_create_wallet<C>(db: &C, user_id: &str, currency: &str) -> Result<wallet::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_wallet(db, user_id).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let new_wallet = wallet::ActiveModel {
        user_id: Set(user_id.to_string()),
        balance: Set(0),
        currency: Set(currency.to_string()),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Wallet::insert(new_wallet)
        .on_conflict(
            OnConflict::column(wallet::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(user_id, "Wallet ensured");

    find_wallet(db, user_id)
        .await?
        .ok_or_else(|| Error::not_found("wallet", user_id))
}

/// Finds a user's wallet without creating it.
pub async fn find_wallet<C>(db: &C, user_id: &str) -> Result<Option<wallet::Model>>
where
    C: ConnectionTrait,
{
    Wallet::find()
        .filter(wallet::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Debits a wallet on the given connection or open transaction.
///
/// Fails with `InvalidAmount` for non-positive amounts and with
/// `InsufficientBalance` (stating the shortfall) if the wallet cannot cover it.
pub async fn apply_debit<C>(db: &C, request: &EntryRequest) -> Result<LedgerEntry>
where
    C: ConnectionTrait,
{
    if request.amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: request.amount,
        });
    }
    apply_movement(db, request, -request.amount).await
}

/// Credits a wallet on the given connection or open transaction.
pub async fn apply_credit<C>(db: &C, request: &EntryRequest) -> Result<LedgerEntry>
where
    C: ConnectionTrait,
{
    if request.amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: request.amount,
        });
    }
    apply_movement(db, request, request.amount).await
}

async fn apply_movement<C>(db: &C, request: &EntryRequest, delta: i64) -> Result<LedgerEntry>
where
    C: ConnectionTrait,
{
    for attempt in 1..=MAX_OPTIMISTIC_ATTEMPTS {
        let current = get_or_create_wallet(db, &request.user_id, &request.currency).await?;

        if delta < 0 && current.balance < -delta {
            return Err(Error::InsufficientBalance {
                balance: current.balance,
                required: -delta,
                shortfall: -delta - current.balance,
            });
        }

        let now = Utc::now();
        let mut update = Wallet::update_many()
            .col_expr(
                wallet::Column::Balance,
                Expr::col(wallet::Column::Balance).add(delta),
            )
            .col_expr(
                wallet::Column::Version,
                Expr::col(wallet::Column::Version).add(1),
            )
            .col_expr(wallet::Column::UpdatedAt, Expr::value(now))
            .filter(wallet::Column::Id.eq(current.id))
            .filter(wallet::Column::Version.eq(current.version));
        if delta < 0 {
            update = update.filter(wallet::Column::Balance.gte(-delta));
        }
        let result = update.exec(db).await?;

        if result.rows_affected == 1 {
            let balance_after = current.balance + delta;
            let entry = wallet_transaction::ActiveModel {
                wallet_id: Set(current.id),
                transaction_type: Set(request.transaction_type),
                amount: Set(delta),
                balance_before: Set(current.balance),
                balance_after: Set(balance_after),
                description: Set(request.description.clone()),
                metadata: Set(request.metadata.as_ref().map(ToString::to_string)),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await?;

            let wallet = wallet::Model {
                balance: balance_after,
                version: current.version + 1,
                updated_at: now,
                ..current
            };
            return Ok(LedgerEntry {
                wallet,
                transaction: entry,
            });
        }

        debug!(
            user_id = %request.user_id,
            attempt,
            "Wallet changed under us, retrying"
        );
    }

    Err(Error::conflict(format!(
        "wallet of {} is being modified concurrently, please retry",
        request.user_id
    )))
}

/// Debits a wallet in its own transaction.
///
/// Returns the updated wallet and the appended ledger entry.
#[instrument(skip(db, request), fields(user_id = %request.user_id, amount = request.amount))]
pub async fn debit(db: &DatabaseConnection, request: EntryRequest) -> Result<LedgerEntry> {
    let txn = db.begin().await?;
    let entry = apply_debit(&txn, &request).await?;
    txn.commit().await?;
    info!(balance = entry.wallet.balance, "Wallet debited");
    Ok(entry)
}

/// Credits a wallet in its own transaction. No balance check applies.
#[instrument(skip(db, request), fields(user_id = %request.user_id, amount = request.amount))]
pub async fn credit(db: &DatabaseConnection, request: EntryRequest) -> Result<LedgerEntry> {
    let txn = db.begin().await?;
    let entry = apply_credit(&txn, &request).await?;
    txn.commit().await?;
    info!(balance = entry.wallet.balance, "Wallet credited");
    Ok(entry)
}

/// Manual credit by a platform admin, recorded as `admin_credit`.
pub async fn admin_credit(
    db: &DatabaseConnection,
    admin: &Actor,
    user_id: &str,
    amount: i64,
    description: &str,
    currency: &str,
) -> Result<LedgerEntry> {
    if !admin.is_admin() {
        return Err(Error::forbidden("only admins can credit wallets"));
    }
    let request = EntryRequest::new(
        user_id,
        amount,
        WalletTransactionType::AdminCredit,
        description,
        currency,
    )
    .with_metadata(serde_json::json!({ "admin_id": admin.user_id }));
    credit(db, request).await
}

/// Current balance of a user's wallet; zero if the user has none yet.
pub async fn get_balance(db: &DatabaseConnection, user_id: &str) -> Result<i64> {
    Ok(find_wallet(db, user_id)
        .await?
        .map_or(0, |wallet| wallet.balance))
}

/// One page of a user's ledger, newest entry first.
///
/// `page` is 1-based; `limit` must be between 1 and 100.
pub async fn get_history(
    db: &DatabaseConnection,
    user_id: &str,
    page: u64,
    limit: u64,
) -> Result<Vec<wallet_transaction::Model>> {
    if page == 0 {
        return Err(Error::Validation {
            field: "page",
            message: "pages start at 1".to_string(),
        });
    }
    if limit == 0 || limit > MAX_HISTORY_PAGE_SIZE {
        return Err(Error::Validation {
            field: "limit",
            message: format!("must be between 1 and {MAX_HISTORY_PAGE_SIZE}"),
        });
    }

    let Some(wallet) = find_wallet(db, user_id).await? else {
        return Ok(Vec::new());
    };

    WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
        .order_by_desc(wallet_transaction::Column::CreatedAt)
        .order_by_desc(wallet_transaction::Column::Id)
        .paginate(db, limit)
        .fetch_page(page - 1)
        .await
        .map_err(Into::into)
}

/// Sum of every ledger entry of a wallet: what the balance should be.
pub async fn recompute_balance<C>(db: &C, wallet_id: i64) -> Result<i64>
where
    C: ConnectionTrait,
{
    let entries = WalletTransaction::find()
        .filter(wallet_transaction::Column::WalletId.eq(wallet_id))
        .all(db)
        .await?;
    Ok(entries.iter().map(|entry| entry.amount).sum())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn booking_debit(user: &str, amount: i64) -> EntryRequest {
        EntryRequest::new(user, amount, WalletTransactionType::Booking, "Session", "USD")
    }

    #[tokio::test]
    async fn test_debit_rejects_non_positive_amounts() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        for amount in [0, -50] {
            let result = apply_debit(&db, &booking_debit("s1", amount)).await;
            assert!(matches!(result, Err(Error::InvalidAmount { amount: a }) if a == amount));
        }
        let result = apply_credit(&db, &booking_debit("s1", 0)).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: 0 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_debit_insufficient_balance_states_shortfall() -> Result<()> {
        let db = setup_test_db().await?;
        fund_wallet(&db, "s1", 1200).await?;

        let err = debit(&db, booking_debit("s1", 5000)).await.unwrap_err();

        assert!(matches!(
            err,
            Error::InsufficientBalance {
                balance: 1200,
                required: 5000,
                shortfall: 3800
            }
        ));
        assert_eq!(get_balance(&db, "s1").await?, 1200);
        Ok(())
    }

    #[tokio::test]
    async fn test_debit_on_missing_wallet_fails_without_side_effects() -> Result<()> {
        let db = setup_test_db().await?;

        let err = debit(&db, booking_debit("new_user", 100)).await.unwrap_err();

        assert!(matches!(err, Error::InsufficientBalance { balance: 0, .. }));
        // the wallet created inside the failed transaction was rolled back
        assert!(find_wallet(&db, "new_user").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_credit_then_debit_records_snapshots() -> Result<()> {
        let db = setup_test_db().await?;

        let credited = credit(
            &db,
            EntryRequest::new("s1", 10_000, WalletTransactionType::AdminCredit, "Top-up", "USD"),
        )
        .await?;
        assert_eq!(credited.wallet.balance, 10_000);
        assert_eq!(credited.transaction.balance_before, 0);
        assert_eq!(credited.transaction.balance_after, 10_000);

        let debited = debit(
            &db,
            booking_debit("s1", 3_500).with_metadata(serde_json::json!({ "booking_id": 9 })),
        )
        .await?;
        assert_eq!(debited.wallet.balance, 6_500);
        assert_eq!(debited.transaction.amount, -3_500);
        assert_eq!(debited.transaction.balance_before, 10_000);
        assert_eq!(debited.transaction.balance_after, 6_500);
        assert_eq!(
            debited.transaction.metadata.as_deref(),
            Some(r#"{"booking_id":9}"#)
        );
        assert_eq!(debited.wallet.version, 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_balance_equals_sum_of_transactions() -> Result<()> {
        let db = setup_test_db().await?;
        fund_wallet(&db, "s1", 20_000).await?;

        debit(&db, booking_debit("s1", 4_000)).await?;
        credit(
            &db,
            EntryRequest::new("s1", 2_000, WalletTransactionType::Refund, "Refund", "USD"),
        )
        .await?;
        debit(&db, booking_debit("s1", 7_500)).await?;
        let _ = debit(&db, booking_debit("s1", 1_000_000)).await;

        let wallet = find_wallet(&db, "s1").await?.unwrap();
        assert_eq!(wallet.balance, 10_500);
        assert_eq!(recompute_balance(&db, wallet.id).await?, wallet.balance);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_debits_cannot_overdraw() -> Result<()> {
        let db = setup_test_db().await?;
        fund_wallet(&db, "s1", 1_000).await?;

        let (first, second) = tokio::join!(
            debit(&db, booking_debit("s1", 700)),
            debit(&db, booking_debit("s1", 700)),
        );

        let successes = [first.is_ok(), second.is_ok()]
            .iter()
            .filter(|ok| **ok)
            .count();
        assert_eq!(successes, 1);
        let balance = get_balance(&db, "s1").await?;
        assert_eq!(balance, 300);
        assert!(balance >= 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paginated() -> Result<()> {
        let db = setup_test_db().await?;
        fund_wallet(&db, "s1", 10_000).await?;
        for amount in [100, 200, 300] {
            debit(&db, booking_debit("s1", amount)).await?;
        }

        let first_page = get_history(&db, "s1", 1, 2).await?;
        assert_eq!(
            first_page.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![-300, -200]
        );
        let second_page = get_history(&db, "s1", 2, 2).await?;
        assert_eq!(
            second_page.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![-100, 10_000]
        );
        assert!(get_history(&db, "nobody", 1, 10).await?.is_empty());
        assert!(matches!(
            get_history(&db, "s1", 0, 10).await,
            Err(Error::Validation { field: "page", .. })
        ));
        assert!(matches!(
            get_history(&db, "s1", 1, 500).await,
            Err(Error::Validation { field: "limit", .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_credit_requires_admin() -> Result<()> {
        let db = setup_test_db().await?;

        let denied =
            admin_credit(&db, &Actor::student("s1"), "s1", 500, "Gift", "USD").await;
        assert!(matches!(denied, Err(Error::Forbidden { .. })));

        let entry = admin_credit(&db, &Actor::admin("a1"), "s1", 500, "Goodwill", "USD").await?;
        assert_eq!(entry.transaction.transaction_type, WalletTransactionType::AdminCredit);
        assert_eq!(get_balance(&db, "s1").await?, 500);
        Ok(())
    }
}
