//! Booking entity - A student's paid or free claim on a resource.
//!
//! Covers both live-session bookings and course enrollments. `slot_key` is
//! only set for exclusive (one-on-one) resources while the booking is active;
//! its unique index is what prevents two students from holding the same slot.

use super::sea_orm_active_enums::{BookingStatus, PaymentMethod, SourceType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Booking database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    /// Unique identifier for the booking
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Student who pays
    pub payer_id: String,
    /// Booked resource
    pub resource_id: i64,
    /// Instructor owning the resource at booking time
    pub teacher_id: String,
    /// Commission source type of the sale
    pub source_type: SourceType,
    /// Amount paid in minor units
    pub amount: i64,
    /// Wallet, card or free
    pub payment_method: PaymentMethod,
    /// Gateway payment reference, needed to issue refunds
    #[sea_orm(nullable)]
    pub payment_reference: Option<String>,
    /// Gateway checkout session id for card bookings
    #[sea_orm(nullable)]
    pub checkout_session_id: Option<String>,
    /// Exclusive slot claim, cleared on cancellation
    #[sea_orm(unique, nullable)]
    pub slot_key: Option<String>,
    /// Current status
    pub status: BookingStatus,
    /// Session start copied from the resource
    pub scheduled_at: Option<DateTimeUtc>,
    /// When the booking was cancelled
    pub cancelled_at: Option<DateTimeUtc>,
    /// Free-text reason supplied by the canceller
    #[sea_orm(column_type = "Text", nullable)]
    pub cancellation_reason: Option<String>,
    /// User id of whoever cancelled
    #[sea_orm(nullable)]
    pub cancelled_by: Option<String>,
    /// Amount refunded (or being refunded)
    pub refund_amount: Option<i64>,
    /// When the booking was created
    pub created_at: DateTimeUtc,
    /// When the status last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Booking and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each booking belongs to one resource
    #[sea_orm(
        belongs_to = "super::resource::Entity",
        from = "Column::ResourceId",
        to = "super::resource::Column::Id"
    )]
    Resource,
}

impl Related<super::resource::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Resource.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
