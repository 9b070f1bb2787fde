//! Payout request entity - An instructor's claim on pending net earnings.
//!
//! `requested_amount` is fixed at creation. The bank fields are a snapshot
//! of the instructor's bank account at request time.

use super::sea_orm_active_enums::PayoutStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payout request database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payout_requests")]
pub struct Model {
    /// Unique identifier for the payout request
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Requesting instructor
    pub teacher_id: String,
    /// Sum of the linked commissions' net amounts
    pub requested_amount: i64,
    /// Account holder name
    pub account_name: String,
    /// Bank account number
    pub account_number: String,
    /// Routing number, if the bank uses one
    #[sea_orm(nullable)]
    pub routing_number: Option<String>,
    /// Bank name
    pub bank_name: String,
    /// SWIFT/BIC code for international transfers
    #[sea_orm(nullable)]
    pub swift_code: Option<String>,
    /// Admin-driven status
    pub status: PayoutStatus,
    /// Note left by the admin on the last transition
    #[sea_orm(column_type = "Text", nullable)]
    pub admin_note: Option<String>,
    /// Admin who moved the request to a terminal state
    #[sea_orm(nullable)]
    pub processed_by: Option<String>,
    /// When the request reached a terminal state
    pub processed_at: Option<DateTimeUtc>,
    /// When the request was created
    pub created_at: DateTimeUtc,
    /// When the status last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `PayoutRequest` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One payout is funded by many commission rows
    #[sea_orm(has_many = "super::payout_commission::Entity")]
    PayoutCommissions,
}

impl Related<super::payout_commission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PayoutCommissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
