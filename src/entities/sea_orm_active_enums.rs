//! Status and type enums shared by the settlement entities.
//!
//! All enums are stored as lowercase TEXT so the database stays readable
//! without the Rust code at hand.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of balance movement recorded in a wallet transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum WalletTransactionType {
    /// Course purchase paid from the wallet
    #[sea_orm(string_value = "purchase")]
    Purchase,
    /// Live-session booking paid from the wallet
    #[sea_orm(string_value = "booking")]
    Booking,
    /// Refund credited back to the wallet
    #[sea_orm(string_value = "refund")]
    Refund,
    /// Manual credit issued by an administrator
    #[sea_orm(string_value = "admin_credit")]
    AdminCredit,
}

/// What was sold: a course enrollment or a live session seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Course enrollment
    #[sea_orm(string_value = "course")]
    Course,
    /// Live session (one-on-one or group)
    #[sea_orm(string_value = "live_session")]
    LiveSession,
}

/// Whether a commission row records a sale or offsets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    /// Positive row written when a sale settles
    #[sea_orm(string_value = "sale")]
    Sale,
    /// Negative row written when a sale is refunded
    #[sea_orm(string_value = "reversal")]
    Reversal,
}

/// Payout lifecycle of a commission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    /// Claimable by the next payout request
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Locked into an open payout request
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Settled by a completed payout
    #[sea_orm(string_value = "paid")]
    Paid,
    /// Voided without payout
    #[sea_orm(string_value = "reversed")]
    Reversed,
}

/// Kind of bookable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Self-paced course, no scheduled start
    #[sea_orm(string_value = "course")]
    Course,
    /// Exclusive 1:1 live session
    #[sea_orm(string_value = "one_on_one")]
    OneOnOne,
    /// Live session shared by many students
    #[sea_orm(string_value = "group_class")]
    GroupClass,
}

impl ResourceKind {
    /// Commission source type a sale of this resource is booked under.
    #[must_use]
    pub const fn source_type(self) -> SourceType {
        match self {
            Self::Course => SourceType::Course,
            Self::OneOnOne | Self::GroupClass => SourceType::LiveSession,
        }
    }
}

/// How a booking was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Debited from the payer's wallet
    #[sea_orm(string_value = "wallet")]
    Wallet,
    /// Charged through the payment gateway checkout
    #[sea_orm(string_value = "card")]
    Card,
    /// Zero-price free-trial booking
    #[sea_orm(string_value = "free")]
    Free,
}

/// Booking or enrollment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Awaiting gateway payment confirmation
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Paid and active
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    /// Cancelled without refund
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    /// Cancelled, gateway refund not yet confirmed
    #[sea_orm(string_value = "refund_pending")]
    RefundPending,
    /// Cancelled and refunded
    #[sea_orm(string_value = "refunded")]
    Refunded,
    /// Session delivered
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Payout request status, driven by admin action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Newly requested
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Being checked by an admin
    #[sea_orm(string_value = "under_review")]
    UnderReview,
    /// Approved for transfer
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Transfer in progress
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Transfer confirmed by an admin
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Refused by an admin
    #[sea_orm(string_value = "rejected")]
    Rejected,
    /// Transfer failed
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Withdrawn by the instructor
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PayoutStatus {
    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Failed | Self::Cancelled
        )
    }

    /// Terminal states that return the locked commissions to the pending pool.
    #[must_use]
    pub const fn releases_commissions(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Cancelled)
    }
}

/// Outbox state of a gateway refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum RefundIntentStatus {
    /// Refund waiting for a gateway call
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Claimed by a worker whose gateway call has not answered yet
    #[sea_orm(string_value = "in_flight")]
    InFlight,
    /// Gateway confirmed the refund
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Gave up after the configured number of attempts
    #[sea_orm(string_value = "failed")]
    Failed,
}
