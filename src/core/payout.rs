//! Payout batching and admin payout transitions.
//!
//! A payout request claims every `pending` commission row of the instructor,
//! sales and reversals alike, and flips them to `processing` in the same
//! transaction that creates the request. A concurrent second request therefore
//! sees a pending balance without the claimed rows. Rejected, failed and
//! cancelled requests hand their rows back to `pending`.

use crate::{
    core::{
        commission::pending_commissions,
        context::{Actor, SettlementContext},
    },
    entities::{
        BankAccount, Commission, CommissionStatus, PayoutCommission, PayoutRequest, PayoutStatus,
        bank_account, commission, payout_commission, payout_request,
    },
    errors::{Error, Result},
    integrations::notifier::{Notification, notify_best_effort},
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument, warn};

/// Bank details supplied by an instructor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankDetails {
    /// Name on the account
    pub account_name: String,
    /// Account number or IBAN
    pub account_number: String,
    /// Routing / sort code
    pub routing_number: Option<String>,
    /// Bank name
    pub bank_name: String,
    /// SWIFT / BIC code
    pub swift_code: Option<String>,
}

impl BankDetails {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("account_name", &self.account_name),
            ("account_number", &self.account_number),
            ("bank_name", &self.bank_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Creates or replaces an instructor's bank details.
pub async fn set_bank_details(
    db: &DatabaseConnection,
    teacher_id: &str,
    details: BankDetails,
) -> Result<bank_account::Model> {
    details.validate()?;

    let row = bank_account::ActiveModel {
        teacher_id: Set(teacher_id.to_string()),
        account_name: Set(details.account_name),
        account_number: Set(details.account_number),
        routing_number: Set(details.routing_number),
        bank_name: Set(details.bank_name),
        swift_code: Set(details.swift_code),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    BankAccount::insert(row)
        .on_conflict(
            OnConflict::column(bank_account::Column::TeacherId)
                .update_columns([
                    bank_account::Column::AccountName,
                    bank_account::Column::AccountNumber,
                    bank_account::Column::RoutingNumber,
                    bank_account::Column::BankName,
                    bank_account::Column::SwiftCode,
                    bank_account::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    info!(teacher_id, "Bank details saved");

    get_bank_details(db, teacher_id)
        .await?
        .ok_or_else(|| Error::not_found("bank account", teacher_id))
}

/// Bank details of an instructor, if any were saved.
pub async fn get_bank_details<C>(db: &C, teacher_id: &str) -> Result<Option<bank_account::Model>>
where
    C: ConnectionTrait,
{
    BankAccount::find()
        .filter(bank_account::Column::TeacherId.eq(teacher_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Requests a payout of the instructor's whole pending net balance.
///
/// Fails with `BelowMinimum` if the balance is under the configured floor and
/// with `MissingBankDetails` if there is nowhere to send the money.
#[instrument(skip(ctx))]
pub async fn request_payout(
    ctx: &SettlementContext,
    teacher_id: &str,
) -> Result<payout_request::Model> {
    let txn = ctx.database.begin().await?;

    let rows = pending_commissions(&txn, teacher_id).await?;
    let available: i64 = rows.iter().map(|row| row.net_amount).sum();
    let minimum = ctx.config.payout.minimum_amount;
    // nothing to pay out is below any floor, including a zero one
    if available < minimum || available <= 0 {
        return Err(Error::BelowMinimum {
            available,
            minimum,
            shortfall: (minimum - available).max(1),
        });
    }
    let bank = get_bank_details(&txn, teacher_id)
        .await?
        .ok_or_else(|| Error::MissingBankDetails {
            teacher_id: teacher_id.to_string(),
        })?;

    let now = Utc::now();
    let payout = payout_request::ActiveModel {
        teacher_id: Set(teacher_id.to_string()),
        requested_amount: Set(available),
        account_name: Set(bank.account_name),
        account_number: Set(bank.account_number),
        routing_number: Set(bank.routing_number),
        bank_name: Set(bank.bank_name),
        swift_code: Set(bank.swift_code),
        status: Set(PayoutStatus::Pending),
        admin_note: Set(None),
        processed_by: Set(None),
        processed_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let links = rows.iter().map(|row| payout_commission::ActiveModel {
        payout_request_id: Set(payout.id),
        commission_id: Set(row.id),
        amount: Set(row.net_amount),
        ..Default::default()
    });
    PayoutCommission::insert_many(links)
        .exec_without_returning(&txn)
        .await?;

    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let locked = Commission::update_many()
        .col_expr(
            commission::Column::Status,
            Expr::value(CommissionStatus::Processing),
        )
        .col_expr(commission::Column::UpdatedAt, Expr::value(now))
        .filter(commission::Column::Id.is_in(ids))
        .filter(commission::Column::Status.eq(CommissionStatus::Pending))
        .exec(&txn)
        .await?;
    if locked.rows_affected != rows.len() as u64 {
        return Err(Error::conflict(
            "commissions were claimed by another payout request, please retry",
        ));
    }
    txn.commit().await?;

    info!(
        payout_id = payout.id,
        amount = available,
        commissions = rows.len(),
        "Payout requested"
    );
    Ok(payout)
}

/// Gets a payout request by id.
pub async fn get_payout_request<C>(db: &C, payout_id: i64) -> Result<payout_request::Model>
where
    C: ConnectionTrait,
{
    PayoutRequest::find_by_id(payout_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("payout request", payout_id))
}

/// Payout requests of an instructor, newest first.
pub async fn list_payout_requests(
    db: &DatabaseConnection,
    teacher_id: &str,
) -> Result<Vec<payout_request::Model>> {
    PayoutRequest::find()
        .filter(payout_request::Column::TeacherId.eq(teacher_id))
        .order_by_desc(payout_request::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Commission rows funding a payout, with the amount each contributed.
pub async fn get_payout_commissions(
    db: &DatabaseConnection,
    payout_id: i64,
) -> Result<Vec<(payout_commission::Model, commission::Model)>> {
    let rows = PayoutCommission::find()
        .filter(payout_commission::Column::PayoutRequestId.eq(payout_id))
        .order_by_asc(payout_commission::Column::Id)
        .find_also_related(Commission)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(link, row)| row.map(|row| (link, row)))
        .collect())
}

/// Whether an admin may move a payout from `from` to `to`.
const fn admin_may_transition(from: PayoutStatus, to: PayoutStatus) -> bool {
    use PayoutStatus::{Approved, Completed, Failed, Pending, Processing, Rejected, UnderReview};
    match (from, to) {
        (Pending, UnderReview)
        | (Pending | UnderReview, Approved)
        | (Approved, Processing)
        | (Processing, Completed) => true,
        (_, Rejected | Failed) => !from.is_terminal(),
        _ => false,
    }
}

/// Moves a payout to `new_status` on behalf of an admin.
///
/// `completed` marks the funding commissions `paid`; `rejected` and `failed`
/// return them to `pending` so the next request can claim them.
#[instrument(skip(db, admin, note), fields(admin = %admin.user_id))]
pub async fn set_payout_status(
    db: &DatabaseConnection,
    payout_id: i64,
    new_status: PayoutStatus,
    admin: &Actor,
    note: Option<&str>,
) -> Result<payout_request::Model> {
    if !admin.is_admin() {
        return Err(Error::forbidden("only admins can change payout status"));
    }
    let payout = get_payout_request(db, payout_id).await?;
    if !admin_may_transition(payout.status, new_status) {
        return Err(Error::conflict(format!(
            "payout {payout_id} cannot move from {:?} to {new_status:?}",
            payout.status
        )));
    }
    transition(db, &payout, new_status, admin, note).await
}

/// Withdraws a payout request that no admin has picked up yet.
pub async fn cancel_payout_request(
    db: &DatabaseConnection,
    payout_id: i64,
    teacher: &Actor,
) -> Result<payout_request::Model> {
    let payout = get_payout_request(db, payout_id).await?;
    if !teacher.acts_for(&payout.teacher_id) {
        return Err(Error::forbidden("only the requesting instructor can cancel a payout"));
    }
    if payout.status != PayoutStatus::Pending {
        return Err(Error::conflict(format!(
            "payout {payout_id} is {:?}, only pending requests can be cancelled",
            payout.status
        )));
    }
    transition(db, &payout, PayoutStatus::Cancelled, teacher, None).await
}

async fn transition(
    db: &DatabaseConnection,
    payout: &payout_request::Model,
    new_status: PayoutStatus,
    actor: &Actor,
    note: Option<&str>,
) -> Result<payout_request::Model> {
    let now = Utc::now();
    let txn = db.begin().await?;

    let mut update = PayoutRequest::update_many()
        .col_expr(payout_request::Column::Status, Expr::value(new_status))
        .col_expr(
            payout_request::Column::ProcessedBy,
            Expr::value(actor.user_id.clone()),
        )
        .col_expr(payout_request::Column::UpdatedAt, Expr::value(now))
        .filter(payout_request::Column::Id.eq(payout.id))
        .filter(payout_request::Column::Status.eq(payout.status));
    if let Some(note) = note {
        update = update.col_expr(payout_request::Column::AdminNote, Expr::value(note));
    }
    if new_status.is_terminal() {
        update = update.col_expr(payout_request::Column::ProcessedAt, Expr::value(now));
    }
    let result = update.exec(&txn).await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "payout {} was changed concurrently",
            payout.id
        )));
    }

    let settled_status = if new_status == PayoutStatus::Completed {
        Some(CommissionStatus::Paid)
    } else if new_status.releases_commissions() {
        Some(CommissionStatus::Pending)
    } else {
        None
    };
    if let Some(settled_status) = settled_status {
        let ids: Vec<i64> = PayoutCommission::find()
            .filter(payout_commission::Column::PayoutRequestId.eq(payout.id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|link| link.commission_id)
            .collect();
        let moved = Commission::update_many()
            .col_expr(commission::Column::Status, Expr::value(settled_status))
            .col_expr(commission::Column::UpdatedAt, Expr::value(now))
            .filter(commission::Column::Id.is_in(ids.clone()))
            .filter(commission::Column::Status.eq(CommissionStatus::Processing))
            .exec(&txn)
            .await?;
        if moved.rows_affected != ids.len() as u64 {
            warn!(
                payout_id = payout.id,
                expected = ids.len(),
                moved = moved.rows_affected,
                "Some payout commissions were not processing"
            );
        }
    }

    let updated = get_payout_request(&txn, payout.id).await?;
    txn.commit().await?;
    info!(payout_id = payout.id, status = ?new_status, "Payout status changed");

    Ok(updated)
}

/// Changes a payout's status and tells the instructor about it.
pub async fn set_payout_status_and_notify(
    ctx: &SettlementContext,
    payout_id: i64,
    new_status: PayoutStatus,
    admin: &Actor,
    note: Option<&str>,
) -> Result<payout_request::Model> {
    let payout = set_payout_status(&ctx.database, payout_id, new_status, admin, note).await?;
    let notification = Notification::new(
        &payout.teacher_id,
        "Payout update",
        format!(
            "Your payout of {} is now {new_status:?}",
            payout.requested_amount
        ),
    )
    .with("payout_id", payout.id);
    notify_best_effort(ctx.notifier.as_ref(), notification).await;
    Ok(payout)
}
