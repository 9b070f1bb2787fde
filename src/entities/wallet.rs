//! Wallet entity - One stored-value balance per user.
//!
//! The balance is a projection of the wallet's transaction log and is only
//! changed together with an appended `wallet_transactions` row. `version`
//! increments on every change and guards concurrent writers.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallets")]
pub struct Model {
    /// Unique identifier for the wallet
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user, at most one wallet per user
    #[sea_orm(unique)]
    pub user_id: String,
    /// Current balance in minor currency units
    pub balance: i64,
    /// ISO currency code
    pub currency: String,
    /// Optimistic concurrency token
    pub version: i64,
    /// When the wallet was first created
    pub created_at: DateTimeUtc,
    /// When the balance last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Wallet and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One wallet has many ledger entries
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    Transactions,
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
