//! Bank account entity - Where an instructor wants payouts sent.
//!
//! Stored as plain structured fields; one row per instructor.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Bank account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bank_accounts")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning instructor
    #[sea_orm(unique)]
    pub teacher_id: String,
    /// Account holder name
    pub account_name: String,
    /// Bank account number
    pub account_number: String,
    /// Routing number
    #[sea_orm(nullable)]
    pub routing_number: Option<String>,
    /// Bank name
    pub bank_name: String,
    /// SWIFT/BIC code
    #[sea_orm(nullable)]
    pub swift_code: Option<String>,
    /// When the details were last changed
    pub updated_at: DateTimeUtc,
}

/// `BankAccount` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
