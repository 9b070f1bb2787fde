//! Refund tier policy.
//!
//! Pure functions: given who cancels, how much was paid and how long until the
//! session starts, decide the refund percentage and amount. The tier bounds are
//! inclusive lower bounds and are measured in exact seconds, so 47h59m before
//! start falls in the partial tier.

use crate::config::settlement::{InstructorCancellationPolicy, RefundSettings};
use crate::core::commission::round_share;
use crate::core::context::Role;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const SECONDS_PER_HOUR: i64 = 3_600;

/// Refund decided for one cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundQuote {
    /// Fraction of the paid amount refunded, in `[0, 1]`
    pub percentage: Decimal,
    /// `round(amount × percentage)`
    pub amount: i64,
}

/// Tier percentage for a booking starting `seconds_until_start` from now.
///
/// `None` means the booking has no scheduled start (self-paced course) and
/// gets the top tier.
#[must_use]
pub fn tier_percentage(settings: &RefundSettings, seconds_until_start: Option<i64>) -> Decimal {
    let Some(seconds) = seconds_until_start else {
        return Decimal::ONE;
    };
    if seconds >= settings.full_refund_hours * SECONDS_PER_HOUR {
        Decimal::ONE
    } else if seconds >= settings.partial_refund_hours * SECONDS_PER_HOUR {
        settings.partial_percentage
    } else {
        Decimal::ZERO
    }
}

/// Tier percentage for a whole number of hours before start.
#[must_use]
pub fn refund_percentage(settings: &RefundSettings, hours_until_start: i64) -> Decimal {
    tier_percentage(settings, Some(hours_until_start * SECONDS_PER_HOUR))
}

/// Quotes the refund for a cancellation by `cancelled_by`.
///
/// Students and admins get the tier table. Instructors get the tier table or a
/// full refund depending on `settings.instructor_policy`.
pub fn quote(
    settings: &RefundSettings,
    cancelled_by: Role,
    amount: i64,
    scheduled_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<RefundQuote> {
    let percentage = match (cancelled_by, settings.instructor_policy) {
        (Role::Instructor, InstructorCancellationPolicy::FullRefund) => Decimal::ONE,
        _ => tier_percentage(
            settings,
            scheduled_at.map(|start| (start - now).num_seconds()),
        ),
    };
    Ok(RefundQuote {
        percentage,
        amount: round_share(amount, percentage)?,
    })
}
