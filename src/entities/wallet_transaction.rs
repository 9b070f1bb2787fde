//! Wallet transaction entity - The append-only ledger behind every wallet.
//!
//! Rows are inserted together with the balance change they describe and are
//! never updated or deleted. `balance_before`/`balance_after` snapshot the
//! wallet around the movement so the log can be audited on its own.
use super::sea_orm_active_enums::WalletTransactionType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
pub struct Model {
    /// Unique identifier for the ledger entry
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Wallet this entry belongs to
    pub wallet_id: i64,
    /// Kind of movement
    pub transaction_type: WalletTransactionType,
    /// Signed amount in minor units (negative for debits)
    pub amount: i64,
    /// Wallet balance before this entry
    pub balance_before: i64,
    /// Wallet balance after this entry
    pub balance_after: i64,
    /// Human-readable description
    pub description: String,
    /// Optional JSON metadata (booking id, admin id, ...)
    #[sea_orm(column_type = "Text", nullable)]
    pub metadata: Option<String>,
    /// When the entry was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `WalletTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one wallet
    #[sea_orm(
        belongs_to = "super::wallet::Entity",
        from = "Column::WalletId",
        to = "super::wallet::Column::Id"
    )]
    Wallet,
}

impl Related<super::wallet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallet.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
