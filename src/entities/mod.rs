//! Entity module - Contains all SeaORM entity definitions for the settlement database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod bank_account;
pub mod booking;
pub mod commission;
pub mod free_class_usage;
pub mod payout_commission;
pub mod payout_request;
pub mod refund_intent;
pub mod resource;
pub mod sea_orm_active_enums;
pub mod wallet;
pub mod wallet_transaction;

// Re-export specific types to avoid conflicts
pub use bank_account::{Column as BankAccountColumn, Entity as BankAccount, Model as BankAccountModel};
pub use booking::{Column as BookingColumn, Entity as Booking, Model as BookingModel};
pub use commission::{Column as CommissionColumn, Entity as Commission, Model as CommissionModel};
pub use free_class_usage::{
    Column as FreeClassUsageColumn, Entity as FreeClassUsage, Model as FreeClassUsageModel,
};
pub use payout_commission::{
    Column as PayoutCommissionColumn, Entity as PayoutCommission, Model as PayoutCommissionModel,
};
pub use payout_request::{
    Column as PayoutRequestColumn, Entity as PayoutRequest, Model as PayoutRequestModel,
};
pub use refund_intent::{
    Column as RefundIntentColumn, Entity as RefundIntent, Model as RefundIntentModel,
};
pub use resource::{Column as ResourceColumn, Entity as Resource, Model as ResourceModel};
pub use sea_orm_active_enums::{
    BookingStatus, CommissionKind, CommissionStatus, PaymentMethod, PayoutStatus, RefundIntentStatus,
    ResourceKind, SourceType, WalletTransactionType,
};
pub use wallet::{Column as WalletColumn, Entity as Wallet, Model as WalletModel};
pub use wallet_transaction::{
    Column as WalletTransactionColumn, Entity as WalletTransaction,
    Model as WalletTransactionModel,
};
