//! Inbound gateway webhook events.
//!
//! The gateway delivers at least once, so every handler must be safe to run
//! twice for the same event. `payment.completed` relies on the guarded
//! `pending -> confirmed` update in [`booking::confirm_card_payment`]; a replay
//! finds the booking already confirmed and writes nothing. Every event must
//! name the booking's own payer, instructor, source type and checkout session.

use crate::{
    core::{
        booking::{self, PaymentConfirmation},
        context::SettlementContext,
    },
    entities::{BookingStatus, SourceType, booking as booking_entity},
    errors::{Error, Result},
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

const PAYMENT_COMPLETED: &str = "payment.completed";
const PAYMENT_FAILED: &str = "payment.failed";
const CHECKOUT_EXPIRED: &str = "checkout.expired";

/// Envelope shared by every gateway event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Gateway event id
    pub id: String,
    /// Event type, e.g. `payment.completed`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of payment and checkout events.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    /// Captured payment, absent on checkout expiry
    #[serde(default)]
    pub payment_reference: Option<String>,
    /// Amount in minor units
    #[serde(default)]
    pub amount: i64,
    /// Checkout session the payment belongs to
    #[serde(default)]
    pub checkout_session_id: Option<String>,
    /// Metadata attached when the checkout was created
    pub metadata: PaymentMetadata,
}

/// Metadata echoed back from the checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMetadata {
    /// What was sold
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Instructor receiving the sale
    pub teacher_id: String,
    /// Paying student
    pub student_id: String,
    /// Booking id the payment settles
    pub source_ref: String,
    /// Coupon applied at checkout, informational only
    #[serde(default)]
    pub coupon_id: Option<String>,
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A pending booking was confirmed and its sale recorded
    Confirmed {
        /// Confirmed booking
        booking_id: i64,
        /// Sale commission row
        commission_id: i64,
    },
    /// A pending booking was cancelled because payment did not happen
    Cancelled {
        /// Cancelled booking
        booking_id: i64,
    },
    /// Payment for a booking cancelled before it landed; refunded in full
    LateCaptureRefunded {
        /// Cancelled booking
        booking_id: i64,
        /// `refunded` once the gateway accepted, else `refund_pending`
        status: BookingStatus,
    },
    /// Replay of an event already applied; nothing was written
    Duplicate {
        /// Booking named by the event
        booking_id: i64,
    },
    /// Event type the core does not handle
    Ignored {
        /// The unhandled type
        event_type: String,
    },
}

fn malformed(message: String) -> Error {
    Error::Validation {
        field: "payload",
        message,
    }
}

/// Parses and applies one webhook payload.
///
/// Malformed payloads, unknown bookings in metadata and amount mismatches are
/// `Validation` errors; unknown event types are ignored.
#[instrument(skip(ctx, payload))]
pub async fn handle_webhook(ctx: &SettlementContext, payload: &str) -> Result<WebhookOutcome> {
    let event: WebhookEvent = serde_json::from_str(payload)
        .map_err(|e| malformed(format!("not a gateway event: {e}")))?;
    debug!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

    match event.event_type.as_str() {
        PAYMENT_COMPLETED => payment_completed(ctx, &event).await,
        PAYMENT_FAILED | CHECKOUT_EXPIRED => payment_abandoned(ctx, &event).await,
        _ => {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook");
            Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            })
        }
    }
}

fn parse_data(event: &WebhookEvent) -> Result<(PaymentEventData, i64)> {
    let data: PaymentEventData = serde_json::from_value(event.data.clone())
        .map_err(|e| malformed(format!("bad {} payload: {e}", event.event_type)))?;
    let booking_id = data.metadata.source_ref.parse::<i64>().map_err(|_| Error::Validation {
        field: "source_ref",
        message: format!("'{}' is not a booking id", data.metadata.source_ref),
    })?;
    Ok((data, booking_id))
}

/// Loads the booking an event names and checks the event belongs to it.
async fn booking_for_event(
    ctx: &SettlementContext,
    data: &PaymentEventData,
    booking_id: i64,
) -> Result<booking_entity::Model> {
    let booking = booking::get_booking(&ctx.database, booking_id)
        .await
        .map_err(|e| match e {
            Error::NotFound { .. } => Error::Validation {
                field: "source_ref",
                message: format!("no booking {booking_id}"),
            },
            other => other,
        })?;
    if booking.payer_id != data.metadata.student_id
        || booking.teacher_id != data.metadata.teacher_id
        || booking.source_type != data.metadata.source_type
    {
        warn!(booking_id, "Webhook metadata does not match the booking");
        return Err(Error::Validation {
            field: "metadata",
            message: format!("metadata does not match booking {booking_id}"),
        });
    }
    if let (Some(expected), Some(received)) = (
        booking.checkout_session_id.as_deref(),
        data.checkout_session_id.as_deref(),
    ) && expected != received
    {
        warn!(booking_id, expected, received, "Checkout session mismatch");
        return Err(Error::Validation {
            field: "checkout_session_id",
            message: format!("session {received} does not belong to booking {booking_id}"),
        });
    }
    Ok(booking)
}

async fn payment_completed(ctx: &SettlementContext, event: &WebhookEvent) -> Result<WebhookOutcome> {
    let (data, booking_id) = parse_data(event)?;
    let payment_reference = data
        .payment_reference
        .as_deref()
        .ok_or_else(|| malformed("payment.completed without payment_reference".to_string()))?;
    booking_for_event(ctx, &data, booking_id).await?;

    let outcome =
        match booking::confirm_card_payment(ctx, booking_id, payment_reference, data.amount).await? {
            PaymentConfirmation::Confirmed {
                booking_id,
                commission_id,
            } => WebhookOutcome::Confirmed {
                booking_id,
                commission_id,
            },
            PaymentConfirmation::LateCaptureRefunded { booking_id, status } => {
                WebhookOutcome::LateCaptureRefunded { booking_id, status }
            }
            PaymentConfirmation::Duplicate { booking_id } => {
                info!(event_id = %event.id, booking_id, "Replayed payment event");
                WebhookOutcome::Duplicate { booking_id }
            }
        };
    Ok(outcome)
}

async fn payment_abandoned(ctx: &SettlementContext, event: &WebhookEvent) -> Result<WebhookOutcome> {
    let (data, booking_id) = parse_data(event)?;
    booking_for_event(ctx, &data, booking_id).await?;
    if booking::expire_card_checkout(ctx, booking_id).await? {
        Ok(WebhookOutcome::Cancelled { booking_id })
    } else {
        Ok(WebhookOutcome::Duplicate { booking_id })
    }
}
