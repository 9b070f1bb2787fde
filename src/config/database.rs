//! Database configuration module for the settlement core.
//!
//! This module handles the `SQLite` connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite unique indexes that the
//! entity derive cannot express are created explicitly; several of them are what
//! makes replays and concurrent claims fail instead of double-applying.

use crate::entities::{
    BankAccount, Booking, BookingColumn, Commission, CommissionColumn, FreeClassUsage,
    PayoutCommission, PayoutCommissionColumn, PayoutRequest, RefundIntent, Resource, Wallet,
    WalletTransaction, WalletTransactionColumn,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/settlement.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all settlement tables and indexes if they do not exist yet.
///
/// Parent tables are created before the tables that reference them.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, Wallet).await?;
    create_table(db, &schema, WalletTransaction).await?;
    create_table(db, &schema, Resource).await?;
    create_table(db, &schema, Booking).await?;
    create_table(db, &schema, Commission).await?;
    create_table(db, &schema, PayoutRequest).await?;
    create_table(db, &schema, PayoutCommission).await?;
    create_table(db, &schema, BankAccount).await?;
    create_table(db, &schema, FreeClassUsage).await?;
    create_table(db, &schema, RefundIntent).await?;

    // One sale row and at most one reversal row per sold item
    let commission_source = Index::create()
        .name("idx_commissions_source_kind")
        .table(Commission)
        .col(CommissionColumn::SourceType)
        .col(CommissionColumn::SourceRef)
        .col(CommissionColumn::Kind)
        .unique()
        .if_not_exists()
        .to_owned();
    let commission_teacher = Index::create()
        .name("idx_commissions_teacher_status")
        .table(Commission)
        .col(CommissionColumn::TeacherId)
        .col(CommissionColumn::Status)
        .if_not_exists()
        .to_owned();
    let booking_resource = Index::create()
        .name("idx_bookings_resource")
        .table(Booking)
        .col(BookingColumn::ResourceId)
        .col(BookingColumn::PayerId)
        .if_not_exists()
        .to_owned();
    let ledger_wallet = Index::create()
        .name("idx_wallet_transactions_wallet")
        .table(WalletTransaction)
        .col(WalletTransactionColumn::WalletId)
        .if_not_exists()
        .to_owned();
    let payout_links = Index::create()
        .name("idx_payout_commissions_payout")
        .table(PayoutCommission)
        .col(PayoutCommissionColumn::PayoutRequestId)
        .if_not_exists()
        .to_owned();

    for index in [
        commission_source,
        commission_teacher,
        booking_resource,
        ledger_wallet,
        payout_links,
    ] {
        db.execute(builder.build(&index)).await?;
    }

    info!("Settlement tables ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        BookingModel, CommissionModel, FreeClassUsageModel, PayoutRequestModel, WalletModel,
    };
    use sea_orm::QuerySelect;

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<WalletModel> = Wallet::find().limit(1).all(&db).await?;
        let _: Vec<CommissionModel> = Commission::find().limit(1).all(&db).await?;
        let _: Vec<BookingModel> = Booking::find().limit(1).all(&db).await?;
        let _: Vec<PayoutRequestModel> = PayoutRequest::find().limit(1).all(&db).await?;
        let _: Vec<FreeClassUsageModel> = FreeClassUsage::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
