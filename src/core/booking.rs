//! Booking flows - paid and free bookings, card payment confirmation and completion.
//!
//! Wallet bookings settle immediately: the wallet debit, the confirmed booking
//! and the sale commission commit in one transaction. Card bookings start
//! `pending` and are confirmed by the gateway webhook. One-on-one resources
//! carry a `slot_key` whose unique index stops two students holding the slot.

use crate::{
    core::{
        cancellation::{RefundAttempt, record_refund_intent, settle_refund_intent},
        commission,
        context::{Actor, SettlementContext},
        free_trial::{self, FreeCategory},
        wallet::{self, EntryRequest},
    },
    entities::{
        Booking, BookingStatus, PaymentMethod, Resource, ResourceKind, SourceType,
        WalletTransactionType, booking, refund_intent, resource,
    },
    errors::{Error, Result},
    integrations::{
        gateway::{CheckoutRequest, LineItem},
        notifier::{Notification, notify_best_effort},
    },
};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveEnum, QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

/// A bookable resource to register.
#[derive(Debug, Clone)]
pub struct NewResource {
    /// Owning instructor
    pub teacher_id: String,
    /// Course, one-on-one or group class
    pub kind: ResourceKind,
    /// Display title
    pub title: String,
    /// Price in minor units, 0 for free-trial sessions
    pub price: i64,
    /// Start time, required for live sessions
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// How a paid booking is paid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRequest {
    /// Debit the payer's wallet
    Wallet,
    /// Redirect the payer to a hosted card checkout
    Card {
        /// Redirect target after payment
        success_url: String,
        /// Redirect target on abandonment
        cancel_url: String,
    },
}

/// Result of a paid booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingResult {
    /// Paid and confirmed
    Confirmed {
        /// New booking
        booking_id: i64,
    },
    /// Awaiting card payment on the returned checkout page
    Checkout {
        /// Pending booking
        booking_id: i64,
        /// Checkout page URL
        url: String,
        /// Gateway checkout session id
        session_id: String,
    },
}

impl BookingResult {
    /// Id of the booking, confirmed or pending.
    #[must_use]
    pub const fn booking_id(&self) -> i64 {
        match self {
            Self::Confirmed { booking_id } | Self::Checkout { booking_id, .. } => *booking_id,
        }
    }
}

/// Result of applying a card payment to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentConfirmation {
    /// The booking was pending and is now confirmed with its sale recorded
    Confirmed {
        /// Confirmed booking
        booking_id: i64,
        /// Sale commission row
        commission_id: i64,
    },
    /// Replay of the payment already applied; nothing was written
    Duplicate {
        /// Booking named by the payment
        booking_id: i64,
    },
    /// The payment landed after the booking was cancelled and is refunded in full
    LateCaptureRefunded {
        /// Cancelled booking
        booking_id: i64,
        /// `refunded` once the gateway accepted, else `refund_pending`
        status: BookingStatus,
    },
}

/// Registers a bookable resource.
pub async fn create_resource<C>(db: &C, new: NewResource) -> Result<resource::Model>
where
    C: ConnectionTrait,
{
    if new.title.trim().is_empty() {
        return Err(Error::Validation {
            field: "title",
            message: "must not be empty".to_string(),
        });
    }
    if new.price < 0 {
        return Err(Error::InvalidAmount { amount: new.price });
    }
    if new.kind != ResourceKind::Course && new.scheduled_at.is_none() {
        return Err(Error::Validation {
            field: "scheduled_at",
            message: "live sessions need a start time".to_string(),
        });
    }

    let model = resource::ActiveModel {
        teacher_id: Set(new.teacher_id),
        kind: Set(new.kind),
        title: Set(new.title),
        price: Set(new.price),
        scheduled_at: Set(new.scheduled_at),
        is_cancelled: Set(false),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(resource_id = model.id, teacher_id = %model.teacher_id, "Resource registered");
    Ok(model)
}

/// Gets a resource by id.
pub async fn get_resource<C>(db: &C, resource_id: i64) -> Result<resource::Model>
where
    C: ConnectionTrait,
{
    Resource::find_by_id(resource_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("resource", resource_id))
}

/// Gets a booking by id.
pub async fn get_booking<C>(db: &C, booking_id: i64) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    Booking::find_by_id(booking_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("booking", booking_id))
}

/// Bookings of a resource, oldest first.
pub async fn list_resource_bookings<C>(db: &C, resource_id: i64) -> Result<Vec<booking::Model>>
where
    C: ConnectionTrait,
{
    Booking::find()
        .filter(booking::Column::ResourceId.eq(resource_id))
        .order_by_asc(booking::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Exclusive slot claimed by a booking of this resource, if any.
fn slot_key(resource: &resource::Model) -> Option<String> {
    if resource.kind != ResourceKind::OneOnOne {
        return None;
    }
    Some(resource.scheduled_at.map_or_else(
        || resource.id.to_string(),
        |start| format!("{}@{}", resource.id, start.timestamp()),
    ))
}

fn ensure_bookable(resource: &resource::Model, payer_id: &str) -> Result<()> {
    if resource.is_cancelled {
        return Err(Error::conflict(format!(
            "resource {} has been cancelled",
            resource.id
        )));
    }
    if resource.teacher_id == payer_id {
        return Err(Error::forbidden("instructors cannot book their own sessions"));
    }
    Ok(())
}

async fn ensure_no_active_booking<C>(db: &C, resource_id: i64, payer_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let active = Booking::find()
        .filter(booking::Column::ResourceId.eq(resource_id))
        .filter(booking::Column::PayerId.eq(payer_id))
        .filter(booking::Column::Status.is_in([BookingStatus::Pending, BookingStatus::Confirmed]))
        .one(db)
        .await?;
    if let Some(existing) = active {
        return Err(Error::conflict(format!(
            "already booked as booking {}",
            existing.id
        )));
    }
    Ok(())
}

async fn insert_booking<C>(
    db: &C,
    resource: &resource::Model,
    payer_id: &str,
    amount: i64,
    payment_method: PaymentMethod,
    status: BookingStatus,
) -> Result<booking::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    booking::ActiveModel {
        payer_id: Set(payer_id.to_string()),
        resource_id: Set(resource.id),
        teacher_id: Set(resource.teacher_id.clone()),
        source_type: Set(resource.kind.source_type()),
        amount: Set(amount),
        payment_method: Set(payment_method),
        payment_reference: Set(None),
        checkout_session_id: Set(None),
        slot_key: Set(slot_key(resource)),
        status: Set(status),
        scheduled_at: Set(resource.scheduled_at),
        cancelled_at: Set(None),
        cancellation_reason: Set(None),
        cancelled_by: Set(None),
        refund_amount: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        Error::from_insert(e, || {
            format!("the slot of resource {} is already taken", resource.id)
        })
    })
}

/// Books a paid resource, from the wallet or through a card checkout.
///
/// `amount` must equal the resource price.
#[instrument(skip(ctx, payment), fields(method = ?payment))]
pub async fn book_paid(
    ctx: &SettlementContext,
    resource_id: i64,
    payer_id: &str,
    amount: i64,
    payment: PaymentRequest,
) -> Result<BookingResult> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    let resource = get_resource(&ctx.database, resource_id).await?;
    ensure_bookable(&resource, payer_id)?;
    if amount != resource.price {
        return Err(Error::Validation {
            field: "amount",
            message: format!("expected the resource price {}, got {amount}", resource.price),
        });
    }

    match payment {
        PaymentRequest::Wallet => book_with_wallet(ctx, &resource, payer_id, amount).await,
        PaymentRequest::Card {
            success_url,
            cancel_url,
        } => book_with_card(ctx, &resource, payer_id, amount, success_url, cancel_url).await,
    }
}

async fn book_with_wallet(
    ctx: &SettlementContext,
    resource: &resource::Model,
    payer_id: &str,
    amount: i64,
) -> Result<BookingResult> {
    let source_type = resource.kind.source_type();
    let transaction_type = match source_type {
        SourceType::Course => WalletTransactionType::Purchase,
        SourceType::LiveSession => WalletTransactionType::Booking,
    };
    let rate = ctx.config.commission.rate_for(source_type, resource.id);

    let txn = ctx.database.begin().await?;
    ensure_no_active_booking(&txn, resource.id, payer_id).await?;
    let booking = insert_booking(
        &txn,
        resource,
        payer_id,
        amount,
        PaymentMethod::Wallet,
        BookingStatus::Confirmed,
    )
    .await?;
    let request = EntryRequest::new(
        payer_id,
        amount,
        transaction_type,
        resource.title.clone(),
        &ctx.config.wallet.currency,
    )
    .with_metadata(serde_json::json!({
        "booking_id": booking.id,
        "resource_id": resource.id,
    }));
    let entry = wallet::apply_debit(&txn, &request).await?;
    commission::record_sale(
        &txn,
        &resource.teacher_id,
        amount,
        rate,
        source_type,
        &booking.id.to_string(),
    )
    .await?;
    txn.commit().await?;

    info!(
        booking_id = booking.id,
        balance = entry.wallet.balance,
        "Wallet booking confirmed"
    );
    notify_new_booking(ctx, resource, &booking).await;
    Ok(BookingResult::Confirmed {
        booking_id: booking.id,
    })
}

async fn book_with_card(
    ctx: &SettlementContext,
    resource: &resource::Model,
    payer_id: &str,
    amount: i64,
    success_url: String,
    cancel_url: String,
) -> Result<BookingResult> {
    let db = &ctx.database;
    let txn = db.begin().await?;
    ensure_no_active_booking(&txn, resource.id, payer_id).await?;
    let booking = insert_booking(
        &txn,
        resource,
        payer_id,
        amount,
        PaymentMethod::Card,
        BookingStatus::Pending,
    )
    .await?;
    txn.commit().await?;

    let metadata = BTreeMap::from([
        ("type".to_string(), booking.source_type.to_value()),
        ("teacher_id".to_string(), resource.teacher_id.clone()),
        ("student_id".to_string(), payer_id.to_string()),
        ("source_ref".to_string(), booking.id.to_string()),
    ]);
    let request = CheckoutRequest {
        line_items: vec![LineItem {
            name: resource.title.clone(),
            amount,
            quantity: 1,
        }],
        success_url,
        cancel_url,
        metadata,
    };

    let session = match ctx.gateway.create_checkout_session(request).await {
        Ok(session) => session,
        Err(e) => {
            error!(
                booking_id = booking.id,
                resource_id = resource.id,
                payer_id,
                amount,
                error = ?e,
                "Checkout session creation failed"
            );
            release_pending(db, booking.id).await?;
            return Err(e.into());
        }
    };

    Booking::update_many()
        .col_expr(
            booking::Column::CheckoutSessionId,
            Expr::value(session.session_id.clone()),
        )
        .col_expr(booking::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(booking::Column::Id.eq(booking.id))
        .exec(db)
        .await?;
    info!(booking_id = booking.id, session_id = %session.session_id, "Checkout opened");

    Ok(BookingResult::Checkout {
        booking_id: booking.id,
        url: session.url,
        session_id: session.session_id,
    })
}

/// Cancels a still-pending booking and frees its slot. Returns false if the
/// booking had already left `pending`.
async fn release_pending<C>(db: &C, booking_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let result = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Cancelled))
        .col_expr(booking::Column::SlotKey, Expr::value(Option::<String>::None))
        .col_expr(booking::Column::CancelledAt, Expr::value(now))
        .col_expr(booking::Column::RefundAmount, Expr::value(0_i64))
        .col_expr(booking::Column::UpdatedAt, Expr::value(now))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Books a free-trial session and consumes the matching quota atomically.
///
/// One-on-one resources use the demo quota, group classes the group quota.
#[instrument(skip(ctx))]
pub async fn book_free(ctx: &SettlementContext, resource_id: i64, payer_id: &str) -> Result<i64> {
    let resource = get_resource(&ctx.database, resource_id).await?;
    ensure_bookable(&resource, payer_id)?;
    if resource.price != 0 {
        return Err(Error::Validation {
            field: "resource_id",
            message: format!("resource {resource_id} is not a free session"),
        });
    }
    let category = match resource.kind {
        ResourceKind::OneOnOne => FreeCategory::Demo,
        ResourceKind::GroupClass => FreeCategory::Group,
        ResourceKind::Course => {
            return Err(Error::Validation {
                field: "resource_id",
                message: "courses have no free trial".to_string(),
            });
        }
    };

    let txn = ctx.database.begin().await?;
    ensure_no_active_booking(&txn, resource.id, payer_id).await?;
    let booking = insert_booking(
        &txn,
        &resource,
        payer_id,
        0,
        PaymentMethod::Free,
        BookingStatus::Confirmed,
    )
    .await?;
    free_trial::consume(&txn, payer_id, category, &booking.id.to_string()).await?;
    txn.commit().await?;

    info!(booking_id = booking.id, category = category.label(), "Free booking confirmed");
    notify_new_booking(ctx, &resource, &booking).await;
    Ok(booking.id)
}

/// Applies a captured card payment to its pending booking.
///
/// Idempotent: a replay of the payment already stored on the booking yields
/// `Duplicate` without any write. The confirmation and the sale commission
/// commit together. A payment for a booking that was cancelled while still
/// pending is refunded in full through the refund outbox; any other second
/// payment on a booking is a `Conflict`.
#[instrument(skip(ctx))]
pub async fn confirm_card_payment(
    ctx: &SettlementContext,
    booking_id: i64,
    payment_reference: &str,
    amount: i64,
) -> Result<PaymentConfirmation> {
    let txn = ctx.database.begin().await?;
    let booking = get_booking(&txn, booking_id).await?;
    if booking.payment_method != PaymentMethod::Card {
        return Err(Error::Validation {
            field: "source_ref",
            message: format!("booking {booking_id} is not paid by card"),
        });
    }
    if amount != booking.amount {
        return Err(Error::Validation {
            field: "amount",
            message: format!("payment of {amount} does not match booking amount {}", booking.amount),
        });
    }
    if booking.status != BookingStatus::Pending {
        if booking.payment_reference.as_deref() == Some(payment_reference) {
            return Ok(PaymentConfirmation::Duplicate { booking_id });
        }
        if booking.status == BookingStatus::Cancelled && booking.payment_reference.is_none() {
            let intent = refund_late_capture(&txn, &booking, payment_reference).await?;
            txn.commit().await?;
            warn!(
                booking_id,
                payment_reference,
                amount = booking.amount,
                "Payment captured for a cancelled booking, refunding it"
            );
            let status = match settle_refund_intent(ctx, &intent).await? {
                RefundAttempt::Refunded => BookingStatus::Refunded,
                RefundAttempt::Retrying | RefundAttempt::GaveUp | RefundAttempt::InProgress => {
                    BookingStatus::RefundPending
                }
            };
            return Ok(PaymentConfirmation::LateCaptureRefunded { booking_id, status });
        }
        error!(
            booking_id,
            payment_reference,
            stored = ?booking.payment_reference,
            status = ?booking.status,
            "Second payment captured for a booking"
        );
        return Err(Error::conflict(format!(
            "booking {booking_id} is already {:?} with another payment",
            booking.status
        )));
    }

    let confirmed = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Confirmed))
        .col_expr(
            booking::Column::PaymentReference,
            Expr::value(payment_reference),
        )
        .col_expr(booking::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(BookingStatus::Pending))
        .exec(&txn)
        .await?;
    if confirmed.rows_affected == 0 {
        return Ok(PaymentConfirmation::Duplicate { booking_id });
    }

    let rate = ctx
        .config
        .commission
        .rate_for(booking.source_type, booking.resource_id);
    let sale = commission::record_sale(
        &txn,
        &booking.teacher_id,
        booking.amount,
        rate,
        booking.source_type,
        &booking_id.to_string(),
    )
    .await?;
    txn.commit().await?;
    info!(booking_id, commission_id = sale.id, "Card payment confirmed");

    if let Ok(resource) = get_resource(&ctx.database, booking.resource_id).await {
        notify_new_booking(ctx, &resource, &booking).await;
    }
    Ok(PaymentConfirmation::Confirmed {
        booking_id,
        commission_id: sale.id,
    })
}

/// Records a payment captured after its booking was cancelled and queues a
/// full refund of it.
async fn refund_late_capture<C>(
    db: &C,
    booking: &booking::Model,
    payment_reference: &str,
) -> Result<refund_intent::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let updated = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::RefundPending))
        .col_expr(
            booking::Column::PaymentReference,
            Expr::value(payment_reference),
        )
        .col_expr(booking::Column::RefundAmount, Expr::value(booking.amount))
        .col_expr(booking::Column::UpdatedAt, Expr::value(now))
        .filter(booking::Column::Id.eq(booking.id))
        .filter(booking::Column::Status.eq(BookingStatus::Cancelled))
        .filter(booking::Column::PaymentReference.is_null())
        .exec(db)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "booking {} was changed concurrently",
            booking.id
        )));
    }
    record_refund_intent(db, booking.id, payment_reference, booking.amount, now).await
}

/// Cancels a card booking whose payment failed or whose checkout expired.
///
/// Returns false if the booking was no longer pending.
pub async fn expire_card_checkout(ctx: &SettlementContext, booking_id: i64) -> Result<bool> {
    let booking = get_booking(&ctx.database, booking_id).await?;
    if booking.payment_method != PaymentMethod::Card {
        return Err(Error::Validation {
            field: "source_ref",
            message: format!("booking {booking_id} is not paid by card"),
        });
    }
    let released = release_pending(&ctx.database, booking_id).await?;
    if released {
        info!(booking_id, "Unpaid card booking cancelled");
    }
    Ok(released)
}

/// Marks a confirmed booking as delivered. Instructor of the booking or admin only.
pub async fn complete_booking(
    db: &DatabaseConnection,
    booking_id: i64,
    actor: &Actor,
) -> Result<booking::Model> {
    let booking = get_booking(db, booking_id).await?;
    if !actor.acts_for(&booking.teacher_id) {
        return Err(Error::forbidden("only the instructor can complete a booking"));
    }

    let result = Booking::update_many()
        .col_expr(booking::Column::Status, Expr::value(BookingStatus::Completed))
        .col_expr(booking::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(booking::Column::Id.eq(booking_id))
        .filter(booking::Column::Status.eq(BookingStatus::Confirmed))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::conflict(format!(
            "booking {booking_id} is {:?}, only confirmed bookings can be completed",
            booking.status
        )));
    }
    get_booking(db, booking_id).await
}

async fn notify_new_booking(
    ctx: &SettlementContext,
    resource: &resource::Model,
    booking: &booking::Model,
) {
    let notification = Notification::new(
        &resource.teacher_id,
        "New booking",
        format!("{} booked \"{}\"", booking.payer_id, resource.title),
    )
    .with("booking_id", booking.id)
    .with("amount", booking.amount);
    notify_best_effort(ctx.notifier.as_ref(), notification).await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::cancellation::{cancel_booking, find_refund_intent};
    use crate::core::commission::{find_sale, pending_net_balance};
    use crate::entities::RefundIntentStatus;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_wallet_booking_settles_atomically() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        fund_wallet(db, "s1", 8_000).await?;

        let result = book_paid(&h.ctx, session.id, "s1", 5_000, PaymentRequest::Wallet).await?;
        let booking = get_booking(db, result.booking_id()).await?;

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.slot_key, None);
        assert_eq!(wallet::get_balance(db, "s1").await?, 3_000);
        let sale = find_sale(db, SourceType::LiveSession, &booking.id.to_string())
            .await?
            .unwrap();
        assert_eq!(sale.commission_amount, 1_000);
        assert_eq!(pending_net_balance(db, "t1").await?, 4_000);
        assert_eq!(h.notifier.sent().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_course_purchase_is_recorded_as_purchase() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let course = create_test_resource(db, "t1", ResourceKind::Course, 2_000, None).await?;
        fund_wallet(db, "s1", 2_000).await?;

        book_paid(&h.ctx, course.id, "s1", 2_000, PaymentRequest::Wallet).await?;

        let history = wallet::get_history(db, "s1", 1, 10).await?;
        assert_eq!(history[0].transaction_type, WalletTransactionType::Purchase);
        assert_eq!(history[0].amount, -2_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_no_booking() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        fund_wallet(db, "s1", 1_200).await?;

        let result = book_paid(&h.ctx, session.id, "s1", 5_000, PaymentRequest::Wallet).await;

        assert!(matches!(
            result,
            Err(Error::InsufficientBalance {
                shortfall: 3_800,
                ..
            })
        ));
        assert!(list_resource_bookings(db, session.id).await?.is_empty());
        assert!(commission::list_commissions(db, "t1").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_book_paid_validation() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;

        let zero = book_paid(&h.ctx, session.id, "s1", 0, PaymentRequest::Wallet).await;
        assert!(matches!(zero, Err(Error::InvalidAmount { amount: 0 })));

        let wrong = book_paid(&h.ctx, session.id, "s1", 4_000, PaymentRequest::Wallet).await;
        assert!(matches!(wrong, Err(Error::Validation { field: "amount", .. })));

        let own = book_paid(&h.ctx, session.id, "t1", 5_000, PaymentRequest::Wallet).await;
        assert!(matches!(own, Err(Error::Forbidden { .. })));

        let missing = book_paid(&h.ctx, 999, "s1", 5_000, PaymentRequest::Wallet).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_one_on_one_slot_is_exclusive() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        fund_wallet(db, "s1", 5_000).await?;
        fund_wallet(db, "s2", 5_000).await?;

        book_paid(&h.ctx, session.id, "s1", 5_000, PaymentRequest::Wallet).await?;
        let second = book_paid(&h.ctx, session.id, "s2", 5_000, PaymentRequest::Wallet).await;

        assert!(matches!(second, Err(Error::Conflict { .. })));
        // the losing debit was rolled back
        assert_eq!(wallet::get_balance(db, "s2").await?, 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_double_booking_same_resource_conflicts() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 1_000, Some(72)).await?;
        fund_wallet(db, "s1", 5_000).await?;

        book_paid(&h.ctx, session.id, "s1", 1_000, PaymentRequest::Wallet).await?;
        let again = book_paid(&h.ctx, session.id, "s1", 1_000, PaymentRequest::Wallet).await;

        assert!(matches!(again, Err(Error::Conflict { .. })));
        assert_eq!(wallet::get_balance(db, "s1").await?, 4_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_card_booking_opens_checkout_then_confirms_once() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;

        let result = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment()).await?;
        let BookingResult::Checkout {
            booking_id,
            url,
            session_id,
        } = result
        else {
            panic!("expected a checkout");
        };
        assert!(url.ends_with(&session_id));
        let pending = get_booking(db, booking_id).await?;
        assert_eq!(pending.status, BookingStatus::Pending);
        assert_eq!(pending.checkout_session_id.as_deref(), Some(session_id.as_str()));

        let first = confirm_card_payment(&h.ctx, booking_id, "pi_1", 5_000).await?;
        assert!(matches!(first, PaymentConfirmation::Confirmed { .. }));
        let replay = confirm_card_payment(&h.ctx, booking_id, "pi_1", 5_000).await?;
        assert_eq!(replay, PaymentConfirmation::Duplicate { booking_id });

        let confirmed = get_booking(db, booking_id).await?;
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(commission::list_commissions(db, "t1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_payment_for_cancelled_booking_is_refunded() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        let booking_id = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment())
            .await?
            .booking_id();
        cancel_booking(&h.ctx, booking_id, &Actor::student("s1"), None).await?;

        let late = confirm_card_payment(&h.ctx, booking_id, "pi_9", 5_000).await?;

        assert_eq!(
            late,
            PaymentConfirmation::LateCaptureRefunded {
                booking_id,
                status: BookingStatus::Refunded
            }
        );
        let booking = get_booking(db, booking_id).await?;
        assert_eq!(booking.status, BookingStatus::Refunded);
        assert_eq!(booking.payment_reference.as_deref(), Some("pi_9"));
        assert_eq!(booking.refund_amount, Some(5_000));
        let intent = find_refund_intent(db, booking_id).await?.unwrap();
        assert_eq!(intent.status, RefundIntentStatus::Completed);
        let refunds = h.gateway.refunds().await;
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].payment_reference, "pi_9");
        assert_eq!(refunds[0].amount, 5_000);
        // no sale was ever recorded
        assert!(commission::list_commissions(db, "t1").await?.is_empty());

        let replay = confirm_card_payment(&h.ctx, booking_id, "pi_9", 5_000).await?;
        assert_eq!(replay, PaymentConfirmation::Duplicate { booking_id });
        assert_eq!(h.gateway.refunds().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_payment_on_confirmed_booking_conflicts() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_via_card(&h.ctx, session.id, "s1", "pi_1").await?;

        let second = confirm_card_payment(&h.ctx, booking_id, "pi_2", 5_000).await;

        assert!(matches!(second, Err(Error::Conflict { .. })));
        let booking = get_booking(db, booking_id).await?;
        assert_eq!(booking.payment_reference.as_deref(), Some("pi_1"));
        assert_eq!(commission::list_commissions(db, "t1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_card_bookings_by_one_payer() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;

        let (a, b) = tokio::join!(
            book_paid(&h.ctx, session.id, "s1", 5_000, card_payment()),
            book_paid(&h.ctx, session.id, "s1", 5_000, card_payment())
        );

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
        assert!(matches!(a.err().or(b.err()), Some(Error::Conflict { .. })));
        assert_eq!(list_resource_bookings(db, session.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_notifier_keeps_booking() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        fund_wallet(db, "s1", 5_000).await?;
        h.notifier.set_failing(true);

        let result = book_paid(&h.ctx, session.id, "s1", 5_000, PaymentRequest::Wallet).await?;

        let booking = get_booking(db, result.booking_id()).await?;
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(wallet::get_balance(db, "s1").await?, 0);
        assert_eq!(pending_net_balance(db, "t1").await?, 4_000);
        assert!(h.notifier.sent().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_card_payment_amount_mismatch_is_rejected() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 5_000, Some(72)).await?;
        let booking_id = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment())
            .await?
            .booking_id();

        let result = confirm_card_payment(&h.ctx, booking_id, "pi_1", 4_999).await;

        assert!(matches!(result, Err(Error::Validation { field: "amount", .. })));
        assert_eq!(get_booking(db, booking_id).await?.status, BookingStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_failure_releases_the_slot() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        h.gateway.fail_checkout(true);

        let failed = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment()).await;
        assert!(matches!(failed, Err(Error::Gateway(_))));
        let bookings = list_resource_bookings(db, session.id).await?;
        assert_eq!(bookings[0].status, BookingStatus::Cancelled);
        assert_eq!(bookings[0].slot_key, None);

        h.gateway.fail_checkout(false);
        let retry = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment()).await?;
        assert!(matches!(retry, BookingResult::Checkout { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_checkout_cancels_pending_booking() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;
        let booking_id = book_paid(&h.ctx, session.id, "s1", 5_000, card_payment())
            .await?
            .booking_id();

        assert!(expire_card_checkout(&h.ctx, booking_id).await?);
        assert!(!expire_card_checkout(&h.ctx, booking_id).await?);
        assert_eq!(get_booking(db, booking_id).await?.status, BookingStatus::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn test_free_booking_uses_quota_once() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let demo = create_test_resource(db, "t1", ResourceKind::OneOnOne, 0, Some(72)).await?;
        let other_demo = create_test_resource(db, "t2", ResourceKind::OneOnOne, 0, Some(96)).await?;
        let group = create_test_resource(db, "t1", ResourceKind::GroupClass, 0, Some(72)).await?;

        let booking_id = book_free(&h.ctx, demo.id, "s1").await?;
        let usage = free_trial::get_usage(db, "s1").await?.unwrap();
        assert_eq!(usage.demo_session_ref, Some(booking_id.to_string()));

        let second = book_free(&h.ctx, other_demo.id, "s1").await;
        assert!(matches!(second, Err(Error::QuotaExceeded { .. })));
        // the rejected claim left no booking behind
        assert!(list_resource_bookings(db, other_demo.id).await?.is_empty());

        book_free(&h.ctx, group.id, "s1").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_free_bookings_only_one_succeeds() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let first = create_test_resource(db, "t1", ResourceKind::GroupClass, 0, Some(72)).await?;
        let second = create_test_resource(db, "t2", ResourceKind::GroupClass, 0, Some(72)).await?;

        let (a, b) = tokio::join!(
            book_free(&h.ctx, first.id, "s1"),
            book_free(&h.ctx, second.id, "s1")
        );

        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(Error::QuotaExceeded { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_book_free_rejects_paid_resources() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let paid = create_test_resource(db, "t1", ResourceKind::OneOnOne, 5_000, Some(72)).await?;

        let result = book_free(&h.ctx, paid.id, "s1").await;

        assert!(matches!(result, Err(Error::Validation { .. })));
        assert!(free_trial::can_use_free_demo(db, "s1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_booking() -> Result<()> {
        let h = setup_harness().await?;
        let db = &h.ctx.database;
        let session = create_test_resource(db, "t1", ResourceKind::GroupClass, 1_000, Some(72)).await?;
        let booking_id = book_via_wallet(&h.ctx, session.id, "s1").await?;

        let denied = complete_booking(db, booking_id, &Actor::student("s1")).await;
        assert!(matches!(denied, Err(Error::Forbidden { .. })));

        let done = complete_booking(db, booking_id, &Actor::instructor("t1")).await?;
        assert_eq!(done.status, BookingStatus::Completed);

        let again = complete_booking(db, booking_id, &Actor::admin("a1")).await;
        assert!(matches!(again, Err(Error::Conflict { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_resource_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let unscheduled = NewResource {
            teacher_id: "t1".to_string(),
            kind: ResourceKind::OneOnOne,
            title: "Demo".to_string(),
            price: 0,
            scheduled_at: None,
        };

        let result = create_resource(&db, unscheduled.clone()).await;
        assert!(matches!(
            result,
            Err(Error::Validation {
                field: "scheduled_at",
                ..
            })
        ));

        let course = NewResource {
            kind: ResourceKind::Course,
            ..unscheduled
        };
        assert!(create_resource(&db, course).await?.scheduled_at.is_none());
        Ok(())
    }
}
