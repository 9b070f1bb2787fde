//! Payout commission entity - Join rows recording which commissions funded a payout.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payout commission link database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payout_commissions")]
pub struct Model {
    /// Unique identifier for the link
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Funded payout request
    pub payout_request_id: i64,
    /// Contributing commission row
    pub commission_id: i64,
    /// Net amount the commission contributed
    pub amount: i64,
}

/// Defines relationships between `PayoutCommission` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each link belongs to one payout request
    #[sea_orm(
        belongs_to = "super::payout_request::Entity",
        from = "Column::PayoutRequestId",
        to = "super::payout_request::Column::Id"
    )]
    PayoutRequest,
    /// Each link points at one commission row
    #[sea_orm(
        belongs_to = "super::commission::Entity",
        from = "Column::CommissionId",
        to = "super::commission::Column::Id"
    )]
    Commission,
}

impl Related<super::payout_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PayoutRequest.def()
    }
}

impl Related<super::commission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commission.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
