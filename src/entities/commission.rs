//! Commission entity - Platform fee split for a single sale or refund.
//!
//! Sales write a positive row; refunds write an additional negative
//! `reversal` row instead of touching the original. `rate_bps` keeps the
//! rate the row was computed with (basis points, 2000 = 20%).

use super::sea_orm_active_enums::{CommissionKind, CommissionStatus, SourceType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Commission database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commissions")]
pub struct Model {
    /// Unique identifier for the commission row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Instructor the net amount is owed to
    pub teacher_id: String,
    /// Course enrollment or live session
    pub source_type: SourceType,
    /// Reference to the sold item (booking id)
    pub source_ref: String,
    /// Sale or reversal
    pub kind: CommissionKind,
    /// Gross sale amount (negative for reversals)
    pub gross_amount: i64,
    /// Platform fee (negative for reversals)
    pub commission_amount: i64,
    /// Amount owed to the instructor (negative for reversals)
    pub net_amount: i64,
    /// Rate in basis points used for the split
    pub rate_bps: i64,
    /// Payout lifecycle state
    pub status: CommissionStatus,
    /// When the row was written
    pub created_at: DateTimeUtc,
    /// When the status last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Commission and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A commission is linked into at most one open payout at a time
    #[sea_orm(has_many = "super::payout_commission::Entity")]
    PayoutCommissions,
}

impl Related<super::payout_commission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PayoutCommissions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
