//! Refund intent entity - Outbox record for a gateway refund.
//!
//! Written in the same transaction that cancels the booking, before the
//! gateway is called, and claimed (`in_flight`) by exactly one worker before
//! each gateway call. Pending intents, and claims older than the lease, are
//! picked up again by the reconciliation sweep.

use super::sea_orm_active_enums::RefundIntentStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Refund intent database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "refund_intents")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Refunded booking, one intent per booking
    #[sea_orm(unique)]
    pub booking_id: i64,
    /// Gateway payment to refund
    pub payment_reference: String,
    /// Amount to refund in minor units
    pub amount: i64,
    /// Outbox state
    pub status: RefundIntentStatus,
    /// Gateway calls made so far
    pub attempts: i32,
    /// Refund id returned by the gateway
    #[sea_orm(nullable)]
    pub gateway_refund_id: Option<String>,
    /// When the current gateway call was claimed, while `in_flight`
    #[sea_orm(nullable)]
    pub claimed_at: Option<DateTimeUtc>,
    /// Diagnostic detail of the last failure
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    /// When the intent was recorded
    pub created_at: DateTimeUtc,
    /// When the intent was last attempted
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `RefundIntent` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each intent belongs to one booking
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::BookingId",
        to = "super::booking::Column::Id"
    )]
    Booking,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
