//! Cancellation flow: refund, commission reversal and the refund outbox.
//!
//! The local side of a cancellation commits in one transaction: the guarded
//! `confirmed -> ...` status change, the reversal commission row and either a
//! wallet credit or a [`refund_intent`] row. Card refunds are sent to the
//! gateway only after that commit; until the gateway confirms, the booking stays
//! `refund_pending` and the intent is retried by the reconciliation sweep.
//!
//! Each gateway call is preceded by a guarded `pending -> in_flight` claim, so
//! a cancellation and a concurrent sweep never both call the gateway for the
//! same intent. The intent id travels as the gateway idempotency key, which
//! covers a claim taken over after its lease expired.

use crate::{
    core::{
        booking::{get_booking, get_resource, list_resource_bookings},
        commission::{self, bps_to_rate},
        context::{Actor, Role, SettlementContext},
        refund::{self, RefundQuote},
        wallet::{self, EntryRequest},
    },
    entities::{
        Booking, BookingStatus, PaymentMethod, RefundIntent, RefundIntentStatus, Resource,
        WalletTransactionType, booking, refund_intent, resource,
    },
    errors::{Error, Result},
    integrations::{
        gateway::refund_with_retry,
        notifier::{Notification, notify_best_effort},
    },
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{Condition, Set, TransactionTrait, prelude::*};
use tracing::{debug, error, info, instrument, warn};

/// What a cancellation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationOutcome {
    /// Cancelled booking
    pub booking_id: i64,
    /// Amount refunded or being refunded
    pub refund_amount: i64,
    /// Fraction of the paid amount refunded
    pub refund_percentage: Decimal,
    /// Booking status after the cancellation
    pub status: BookingStatus,
}

/// Result of one attempt to settle a refund intent with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundAttempt {
    /// The gateway accepted the refund; the booking is `refunded`
    Refunded,
    /// The call failed; the intent stays pending for the next sweep
    Retrying,
    /// The intent ran out of attempts or was rejected; needs manual follow-up
    GaveUp,
    /// Another worker holds the intent, or it is already settled; no call was made
    InProgress,
}

/// Role under which the cancellation is priced, or `Forbidden`.
fn cancelling_role(booking: &booking::Model, actor: &Actor) -> Result<Role> {
    if actor.is_admin() {
        Ok(Role::Admin)
    } else if actor.user_id == booking.teacher_id {
        Ok(Role::Instructor)
    } else if actor.user_id == booking.payer_id {
        Ok(Role::Student)
    } else {
        Err(Error::forbidden(format!(
            "{} may not cancel booking {}",
            actor.user_id, booking.id
        )))
    }
}

/// Cancels a booking and refunds it according to the refund policy.
///
/// Only the payer, the owning instructor or an admin may cancel. Card refunds
/// that the gateway does not accept leave the booking `refund_pending`, which is
/// reported in the outcome rather than as an error.
#[instrument(skip(ctx, actor, reason), fields(actor = %actor.user_id))]
pub async fn cancel_booking(
    ctx: &SettlementContext,
    booking_id: i64,
    actor: &Actor,
    reason: Option<&str>,
) -> Result<CancellationOutcome> {
    let booking = get_booking(&ctx.database, booking_id).await?;
    let role = cancelling_role(&booking, actor)?;

    let (mut outcome, intent) = cancel_locally(ctx, booking_id, actor, role, reason, Utc::now()).await?;
    if let Some(intent) = intent {
        outcome.status = match settle_refund_intent(ctx, &intent).await? {
            RefundAttempt::Refunded => BookingStatus::Refunded,
            RefundAttempt::Retrying | RefundAttempt::GaveUp | RefundAttempt::InProgress => {
                BookingStatus::RefundPending
            }
        };
    }

    info!(
        booking_id,
        refund_amount = outcome.refund_amount,
        status = ?outcome.status,
        "Booking cancelled"
    );
    notify_cancellation(ctx, &booking, actor, &outcome).await;
    Ok(outcome)
}

/// The transactional half of a cancellation.
async fn cancel_locally(
    ctx: &SettlementContext,
    booking_id: i64,
    actor: &Actor,
    role: Role,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(CancellationOutcome, Option<refund_intent::Model>)> {
    let txn = ctx.database.begin().await?;
    let booking = get_booking(&txn, booking_id).await?;

    let quote = match booking.status {
        // nothing was captured yet
        BookingStatus::Pending => RefundQuote {
            percentage: Decimal::ZERO,
            amount: 0,
        },
        BookingStatus::Confirmed => refund::quote(
            &ctx.config.refund,
            role,
            booking.amount,
            booking.scheduled_at,
            now,
        )?,
        other => {
            return Err(Error::conflict(format!(
                "booking {booking_id} is already {other:?}"
            )));
        }
    };
    let status = if quote.amount == 0 {
        BookingStatus::Cancelled
    } else if booking.payment_method == PaymentMethod::Card {
        BookingStatus::RefundPending
    } else {
        BookingStatus::Refunded
    };

    let updated = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(status))
        .col_expr(booking::Column::CancelledAt, Expr::value(now))
        .col_expr(
            booking::Column::CancellationReason,
            Expr::value(reason.map(str::to_string)),
        )
        .col_expr(booking::Column::CancelledBy, Expr::value(actor.user_id.clone()))
        .col_expr(booking::Column::RefundAmount, Expr::value(quote.amount))
        .col_expr(booking::Column::SlotKey, Expr::value(Option::<String>::None))
        .col_expr(booking::Column::UpdatedAt, Expr::value(now))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(booking.status))
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "booking {booking_id} was changed concurrently"
        )));
    }

    let mut intent = None;
    if booking.status == BookingStatus::Confirmed && booking.payment_method != PaymentMethod::Free {
        let source_ref = booking_id.to_string();
        let rate = commission::find_sale(&txn, booking.source_type, &source_ref)
            .await?
            .map_or_else(
                || {
                    ctx.config
                        .commission
                        .rate_for(booking.source_type, booking.resource_id)
                },
                |sale| bps_to_rate(sale.rate_bps),
            );
        commission::reverse_sale(
            &txn,
            &booking.teacher_id,
            quote.amount,
            rate,
            booking.source_type,
            &source_ref,
        )
        .await?;

        if quote.amount > 0 {
            match booking.payment_method {
                PaymentMethod::Wallet => {
                    let request = EntryRequest::new(
                        &booking.payer_id,
                        quote.amount,
                        WalletTransactionType::Refund,
                        format!("Refund for booking {booking_id}"),
                        &ctx.config.wallet.currency,
                    )
                    .with_metadata(serde_json::json!({
                        "booking_id": booking_id,
                        "refund_percentage": quote.percentage.to_string(),
                    }));
                    wallet::apply_credit(&txn, &request).await?;
                }
                PaymentMethod::Card => {
                    let payment_reference = booking.payment_reference.as_deref().ok_or_else(|| {
                        Error::conflict(format!("booking {booking_id} has no payment reference"))
                    })?;
                    intent = Some(
                        record_refund_intent(&txn, booking_id, payment_reference, quote.amount, now)
                            .await?,
                    );
                }
                PaymentMethod::Free => {}
            }
        }
    }
    txn.commit().await?;

    Ok((
        CancellationOutcome {
            booking_id,
            refund_amount: quote.amount,
            refund_percentage: quote.percentage,
            status,
        },
        intent,
    ))
}

/// Writes the outbox row for a gateway refund. One intent per booking.
pub(crate) async fn record_refund_intent<C>(
    db: &C,
    booking_id: i64,
    payment_reference: &str,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<refund_intent::Model>
where
    C: ConnectionTrait,
{
    refund_intent::ActiveModel {
        booking_id: Set(booking_id),
        payment_reference: Set(payment_reference.to_string()),
        amount: Set(amount),
        status: Set(RefundIntentStatus::Pending),
        attempts: Set(0),
        gateway_refund_id: Set(None),
        claimed_at: Set(None),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        Error::from_insert(e, || {
            format!("refund for booking {booking_id} already recorded")
        })
    })
}

/// Idempotency key sent with every gateway call made for `intent`.
fn refund_idempotency_key(intent: &refund_intent::Model) -> String {
    format!("refund-intent-{}", intent.id)
}

/// Filter matching intents a worker may claim: pending ones, and in-flight
/// ones whose claim is older than the lease.
pub(crate) fn claimable(lease_secs: i64, now: DateTime<Utc>) -> Condition {
    let lease_expired = now - Duration::seconds(lease_secs);
    Condition::any()
        .add(refund_intent::Column::Status.eq(RefundIntentStatus::Pending))
        .add(
            Condition::all()
                .add(refund_intent::Column::Status.eq(RefundIntentStatus::InFlight))
                .add(refund_intent::Column::ClaimedAt.lt(lease_expired)),
        )
}

/// Claims `intent` for one gateway call and returns the attempt number.
///
/// `None` when another worker claimed it first or it is no longer claimable.
async fn claim_refund_intent(
    ctx: &SettlementContext,
    intent: &refund_intent::Model,
    now: DateTime<Utc>,
) -> Result<Option<i32>> {
    let attempts = intent.attempts + 1;
    let claimed = RefundIntent::update_many()
        .col_expr(
            refund_intent::Column::Status,
            Expr::value(RefundIntentStatus::InFlight),
        )
        .col_expr(refund_intent::Column::Attempts, Expr::value(attempts))
        .col_expr(refund_intent::Column::ClaimedAt, Expr::value(Some(now)))
        .col_expr(refund_intent::Column::UpdatedAt, Expr::value(now))
        .filter(refund_intent::Column::Id.eq(intent.id))
        .filter(refund_intent::Column::Attempts.eq(intent.attempts))
        .filter(claimable(ctx.config.reconciliation.refund_lease_secs, now))
        .exec(&ctx.database)
        .await?;
    Ok((claimed.rows_affected == 1).then_some(attempts))
}

/// Sends one refund intent to the gateway and records the result.
///
/// The intent is claimed first; if someone else holds it, no call is made and
/// `InProgress` is returned. Transient failures are retried with backoff inside
/// this call; what is still failing afterwards counts as one attempt. The
/// intent becomes `failed` once `reconciliation.max_refund_attempts` is reached
/// or the gateway rejects it.
#[instrument(skip(ctx, intent), fields(booking_id = intent.booking_id, amount = intent.amount))]
pub async fn settle_refund_intent(
    ctx: &SettlementContext,
    intent: &refund_intent::Model,
) -> Result<RefundAttempt> {
    let Some(attempts) = claim_refund_intent(ctx, intent, Utc::now()).await? else {
        debug!(intent_id = intent.id, "Refund intent is held elsewhere");
        return Ok(RefundAttempt::InProgress);
    };

    let result = refund_with_retry(
        ctx.gateway.as_ref(),
        &ctx.config.gateway,
        &intent.payment_reference,
        intent.amount,
        &refund_idempotency_key(intent),
    )
    .await;
    let now = Utc::now();

    match result {
        Ok(refund_id) => {
            let txn = ctx.database.begin().await?;
            let finalized = RefundIntent::update_many()
                .col_expr(
                    refund_intent::Column::Status,
                    Expr::value(RefundIntentStatus::Completed),
                )
                .col_expr(
                    refund_intent::Column::GatewayRefundId,
                    Expr::value(refund_id.clone()),
                )
                .col_expr(
                    refund_intent::Column::ClaimedAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                )
                .col_expr(refund_intent::Column::UpdatedAt, Expr::value(now))
                .filter(refund_intent::Column::Id.eq(intent.id))
                .filter(refund_intent::Column::Status.eq(RefundIntentStatus::InFlight))
                .filter(refund_intent::Column::Attempts.eq(attempts))
                .exec(&txn)
                .await?;
            if finalized.rows_affected == 0 {
                warn!(refund_id, "Refund claim was taken over before it finished");
                return Ok(RefundAttempt::InProgress);
            }
            Booking::update_many()
                .col_expr(booking::Column::Status, Expr::value(BookingStatus::Refunded))
                .col_expr(booking::Column::UpdatedAt, Expr::value(now))
                .filter(booking::Column::Id.eq(intent.booking_id))
                .filter(booking::Column::Status.eq(BookingStatus::RefundPending))
                .exec(&txn)
                .await?;
            txn.commit().await?;
            info!(refund_id, "Gateway refund completed");
            Ok(RefundAttempt::Refunded)
        }
        Err(e) => {
            let give_up =
                !e.is_retryable() || attempts >= ctx.config.reconciliation.max_refund_attempts;
            error!(
                payment_reference = %intent.payment_reference,
                attempts,
                give_up,
                error = ?e,
                "Gateway refund failed"
            );
            let status = if give_up {
                RefundIntentStatus::Failed
            } else {
                RefundIntentStatus::Pending
            };
            RefundIntent::update_many()
                .col_expr(refund_intent::Column::Status, Expr::value(status))
                .col_expr(
                    refund_intent::Column::ClaimedAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                )
                .col_expr(refund_intent::Column::LastError, Expr::value(e.to_string()))
                .col_expr(refund_intent::Column::UpdatedAt, Expr::value(now))
                .filter(refund_intent::Column::Id.eq(intent.id))
                .filter(refund_intent::Column::Status.eq(RefundIntentStatus::InFlight))
                .filter(refund_intent::Column::Attempts.eq(attempts))
                .exec(&ctx.database)
                .await?;
            Ok(if give_up {
                RefundAttempt::GaveUp
            } else {
                RefundAttempt::Retrying
            })
        }
    }
}

/// Refund intent of a booking, if its cancellation went through the gateway.
pub async fn find_refund_intent<C>(db: &C, booking_id: i64) -> Result<Option<refund_intent::Model>>
where
    C: ConnectionTrait,
{
    RefundIntent::find()
        .filter(refund_intent::Column::BookingId.eq(booking_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Cancels a scheduled resource and every active booking on it.
///
/// Instructor of the resource or admin only. Bookings are priced under the
/// caller's role, so the instructor cancellation policy applies.
#[instrument(skip(ctx, actor, reason), fields(actor = %actor.user_id))]
pub async fn cancel_session(
    ctx: &SettlementContext,
    resource_id: i64,
    actor: &Actor,
    reason: Option<&str>,
) -> Result<Vec<CancellationOutcome>> {
    let session = get_resource(&ctx.database, resource_id).await?;
    if !actor.acts_for(&session.teacher_id) {
        return Err(Error::forbidden("only the instructor can cancel this session"));
    }

    let flagged = Resource::update_many()
        .col_expr(resource::Column::IsCancelled, Expr::value(true))
        .filter(resource::Column::Id.eq(resource_id))
        .filter(resource::Column::IsCancelled.eq(false))
        .exec(&ctx.database)
        .await?;
    if flagged.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "resource {resource_id} is already cancelled"
        )));
    }

    let mut outcomes = Vec::new();
    for booking in list_resource_bookings(&ctx.database, resource_id).await? {
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            continue;
        }
        match cancel_booking(ctx, booking.id, actor, reason).await {
            Ok(outcome) => outcomes.push(outcome),
            // cancelled by the student in the meantime
            Err(Error::Conflict { message }) => {
                warn!(booking_id = booking.id, %message, "Skipping booking");
            }
            Err(e) => return Err(e),
        }
    }
    info!(resource_id, cancelled = outcomes.len(), "Session cancelled");
    Ok(outcomes)
}

async fn notify_cancellation(
    ctx: &SettlementContext,
    booking: &booking::Model,
    actor: &Actor,
    outcome: &CancellationOutcome,
) {
    let refund_line = match outcome.status {
        BookingStatus::Refunded => format!("{} has been refunded.", outcome.refund_amount),
        BookingStatus::RefundPending => {
            format!("A refund of {} is being processed.", outcome.refund_amount)
        }
        _ => "No refund applies.".to_string(),
    };
    for recipient in [&booking.payer_id, &booking.teacher_id] {
        if *recipient == actor.user_id {
            continue;
        }
        let notification = Notification::new(
            recipient,
            "Booking cancelled",
            format!("Booking {} was cancelled. {refund_line}", booking.id),
        )
        .with("booking_id", booking.id)
        .with("refund_amount", outcome.refund_amount);
        notify_best_effort(ctx.notifier.as_ref(), notification).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::commission::{list_commissions, pending_net_balance};
    use crate::core::booking::{BookingResult, PaymentRequest, book_paid};
    use crate::entities::{CommissionKind, ResourceKind};
    use crate::test_utils::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_instructor_late_cancellation_refunds_nothing() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(10)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::instructor("t1"), Some("sick")).await?;

        assert_eq!(outcome.refund_amount, 0);
        assert_eq!(outcome.refund_percentage, Decimal::ZERO);
        assert_eq!(outcome.status, BookingStatus::Cancelled);
        let booking = get_booking(db, booking_id).await?;
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.cancelled_by.as_deref(), Some("t1"));
        assert_eq!(booking.cancellation_reason.as_deref(), Some("sick"));

        let rows = list_commissions(db, "t1").await?;
        let reversal = rows
            .iter()
            .find(|row| row.kind == CommissionKind::Reversal)
            .unwrap();
        assert_eq!(reversal.gross_amount, 0);
        assert_eq!(reversal.net_amount, 0);
        assert_eq!(wallet::get_balance(db, "s1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_student_partial_refund_to_wallet() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(30)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        assert_eq!(outcome.refund_percentage, dec!(0.5));
        assert_eq!(outcome.refund_amount, 2_500);
        assert_eq!(outcome.status, BookingStatus::Refunded);
        assert_eq!(wallet::get_balance(db, "s1").await?, 2_500);
        // sale net 4000, reversal net -2000
        assert_eq!(pending_net_balance(db, "t1").await?, 2_000);

        let history = wallet::get_history(db, "s1", 1, 10).await?;
        assert_eq!(history[0].transaction_type, WalletTransactionType::Refund);
        // the instructor was told, the canceller was not
        let sent = h.notifier.sent().await;
        assert!(sent.iter().any(|n| n.title == "Booking cancelled" && n.recipient == "t1"));
        assert!(!sent.iter().any(|n| n.title == "Booking cancelled" && n.recipient == "s1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_refund_releases_slot() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(50)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;
        assert_eq!(outcome.refund_amount, 5_000);
        assert_eq!(pending_net_balance(db, "t1").await?, 0);

        // someone else can take the slot now
        book_via_wallet(&h.ctx, session.id, "s2").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_double_cancellation_conflicts() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;
        let again = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await;

        assert!(matches!(again, Err(Error::Conflict { .. })));
        assert_eq!(wallet::get_balance(db, "s1").await?, 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_only_parties_may_cancel() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        let stranger = cancel_booking(&h.ctx, booking_id, &Actor::student("s2"), None).await;
        assert!(matches!(stranger, Err(Error::Forbidden { .. })));

        let missing = cancel_booking(&h.ctx, 999, &Actor::admin("a1"), None).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        let admin = cancel_booking(&h.ctx, booking_id, &Actor::admin("a1"), None).await?;
        assert_eq!(admin.refund_amount, 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_card_refund_goes_through_gateway() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;
        h.gateway.fail_next_refunds(1);

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        assert_eq!(outcome.status, BookingStatus::Refunded);
        let refunds = h.gateway.refunds().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].payment_reference, "pi_1");
        assert_eq!(refunds[0].amount, 5_000);
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        assert_eq!(intent.status, RefundIntentStatus::Completed);
        assert_eq!(intent.gateway_refund_id, Some(refunds[0].refund_id.clone()));
        assert_eq!(get_booking(db, booking_id).await?.status, BookingStatus::Refunded);
        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_refund_pending() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;
        h.gateway.fail_next_refunds(100);

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        assert_eq!(outcome.status, BookingStatus::RefundPending);
        assert_eq!(outcome.refund_amount, 5_000);
        let booking = get_booking(db, booking_id).await?;
        assert_eq!(booking.status, BookingStatus::RefundPending);
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        assert_eq!(intent.status, RefundIntentStatus::Pending);
        assert_eq!(intent.attempts, 1);
        assert!(intent.last_error.is_some());
        // the reversal is recorded even though the money has not moved yet
        assert_eq!(pending_net_balance(db, "t1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_refund_gives_up() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;
        h.gateway.reject_refunds(true);

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        assert_eq!(outcome.status, BookingStatus::RefundPending);
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        assert_eq!(intent.status, RefundIntentStatus::Failed);
        assert_eq!(h.gateway.refund_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_settlement_calls_gateway_once() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;
        h.gateway.fail_next_refunds(100);
        cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;
        let calls_before = h.gateway.refund_calls();

        h.gateway.fail_next_refunds(0);
        h.gateway.set_refund_delay(std::time::Duration::from_millis(50));
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        let (a, b) = tokio::join!(
            settle_refund_intent(&h.ctx, &intent),
            settle_refund_intent(&h.ctx, &intent)
        );

        let mut attempts = [a?, b?];
        attempts.sort_by_key(|attempt| *attempt == RefundAttempt::Refunded);
        assert_eq!(attempts, [RefundAttempt::InProgress, RefundAttempt::Refunded]);
        assert_eq!(h.gateway.refund_calls() - calls_before, 1);
        assert_eq!(h.gateway.refunds().await.len(), 1);
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        assert_eq!(intent.status, RefundIntentStatus::Completed);
        assert_eq!(intent.attempts, 2);
        assert_eq!(intent.claimed_at, None);
        assert_eq!(get_booking(db, booking_id).await?.status, BookingStatus::Refunded);
        Ok(())
    }

    #[tokio::test]
    async fn test_settled_intent_is_not_sent_again() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;
        let stale = {
            h.gateway.fail_next_refunds(100);
            cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;
            find_refund_intent(db, booking_id).await?.unwrap()
        };
        h.gateway.fail_next_refunds(0);
        assert_eq!(settle_refund_intent(&h.ctx, &stale).await?, RefundAttempt::Refunded);
        let calls = h.gateway.refund_calls();

        // the caller still holds the pre-settlement row
        assert_eq!(settle_refund_intent(&h.ctx, &stale).await?, RefundAttempt::InProgress);
        assert_eq!(h.gateway.refund_calls(), calls);
        assert_eq!(h.gateway.refunds().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_notifier_keeps_cancellation() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;
        h.notifier.set_failing(true);

        let outcome = cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        assert_eq!(outcome.status, BookingStatus::Refunded);
        assert_eq!(get_booking(db, booking_id).await?.status, BookingStatus::Refunded);
        assert_eq!(wallet::get_balance(db, "s1").await?, 5_000);
        assert_eq!(pending_net_balance(db, "t1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_pending_card_booking_cancels_without_refund() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        let result = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment()).await?;
        assert!(matches!(result, BookingResult::Checkout { .. }));

        let outcome =
            cancel_booking(&h.ctx, result.booking_id(), &Actor::student("s1"), None).await?;

        assert_eq!(outcome.status, BookingStatus::Cancelled);
        assert_eq!(outcome.refund_amount, 0);
        assert!(list_commissions(db, "t1").await?.is_empty());
        assert_eq!(h.gateway.refund_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_session_cancels_every_booking() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 1_000, Some(72)).await?;
        let first = book_via_wallet(&h.ctx, session.id, "s1").await?;
        let second = book_via_wallet(&h.ctx, session.id, "s2").await?;
        cancel_booking(&h.ctx, second, &Actor::student("s2"), None).await?;
        let third = book_via_wallet(&h.ctx, session.id, "s3").await?;

        let denied = cancel_session(&h.ctx, session.id, &Actor::instructor("t2"), None).await;
        assert!(matches!(denied, Err(Error::Forbidden { .. })));

        let outcomes = cancel_session(&h.ctx, session.id, &Actor::instructor("t1"), None).await?;

        let ids: Vec<i64> = outcomes.iter().map(|o| o.booking_id).collect();
        assert_eq!(ids, vec![first, third]);
        assert!(outcomes.iter().all(|o| o.refund_amount == 1_000));
        assert!(get_resource(db, session.id).await?.is_cancelled);
        let late = book_paid(&h.ctx, session.id, "s4", 1_000, PaymentRequest::Wallet).await;
        assert!(matches!(late, Err(Error::Conflict { .. })));
        Ok(())
    }
}
