//! Shared test utilities for the settlement core.
//!
//! This module provides common helper functions for setting up test databases,
//! a settlement context wired to the sandbox gateway, and test entities with
//! sensible defaults.

use crate::{
    config::SettlementConfig,
    core::{
        booking::{self, BookingResult, NewResource, PaymentRequest},
        context::SettlementContext,
        payout::BankDetails,
        wallet::{self, EntryRequest},
    },
    entities::{ResourceKind, WalletTransactionType, resource},
    errors::{Error, Result},
    integrations::{
        gateway::{PaymentGateway, SandboxGateway},
        notifier::{Notifier, RecordingNotifier},
    },
};
use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Settlement context plus handles on its test doubles.
pub struct TestHarness {
    /// Context passed to the flows under test
    pub ctx: SettlementContext,
    /// The gateway behind `ctx.gateway`, for scripting failures
    pub gateway: Arc<SandboxGateway>,
    /// The notifier behind `ctx.notifier`, for inspecting messages
    pub notifier: Arc<RecordingNotifier>,
}

/// Default configuration with millisecond gateway backoff.
pub fn test_config() -> SettlementConfig {
    let mut config = SettlementConfig::default();
    config.gateway.retry_min_delay_ms = 1;
    config.gateway.retry_max_delay_ms = 2;
    config.gateway.retry_max_times = 2;
    config
}

/// Sets up an in-memory database and a context using [`test_config`].
pub async fn setup_harness() -> Result<TestHarness> {
    setup_harness_with(test_config()).await
}

/// Sets up an in-memory database and a context using `config`.
pub async fn setup_harness_with(config: SettlementConfig) -> Result<TestHarness> {
    init_test_tracing();
    let db = setup_test_db().await?;
    let gateway = Arc::new(SandboxGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let ctx = SettlementContext::new(
        db,
        config,
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    Ok(TestHarness {
        ctx,
        gateway,
        notifier,
    })
}

/// Routes `tracing` output to the test harness; repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Credits `amount` to a user's wallet as an admin credit.
pub async fn fund_wallet(
    db: &DatabaseConnection,
    user_id: &str,
    amount: i64,
) -> Result<wallet::LedgerEntry> {
    wallet::credit(
        db,
        EntryRequest::new(
            user_id,
            amount,
            WalletTransactionType::AdminCredit,
            "Test top-up",
            "USD",
        ),
    )
    .await
}

/// Creates a test resource.
///
/// # Arguments
/// * `teacher_id` - Owning instructor
/// * `kind` - Course, one-on-one or group class
/// * `price` - Price in minor units
/// * `hours_from_now` - Start time; `None` for unscheduled courses
pub async fn create_test_resource(
    db: &DatabaseConnection,
    teacher_id: &str,
    kind: ResourceKind,
    price: i64,
    hours_from_now: Option<i64>,
) -> Result<resource::Model> {
    booking::create_resource(
        db,
        NewResource {
            teacher_id: teacher_id.to_string(),
            kind,
            title: format!("{kind:?} by {teacher_id}"),
            price,
            scheduled_at: hours_from_now.map(|hours| Utc::now() + Duration::hours(hours)),
        },
    )
    .await
}

/// Card payment request with placeholder redirect URLs.
pub fn card_payment() -> PaymentRequest {
    PaymentRequest::Card {
        success_url: "https://app.test/booking/success".to_string(),
        cancel_url: "https://app.test/booking/cancel".to_string(),
    }
}

/// Tops up the payer with exactly the resource price and books it from the wallet.
pub async fn book_via_wallet(
    ctx: &SettlementContext,
    resource_id: i64,
    payer_id: &str,
) -> Result<i64> {
    let resource = booking::get_resource(&ctx.database, resource_id).await?;
    fund_wallet(&ctx.database, payer_id, resource.price).await?;
    let result = booking::book_paid(
        ctx,
        resource_id,
        payer_id,
        resource.price,
        PaymentRequest::Wallet,
    )
    .await?;
    Ok(result.booking_id())
}

/// Books a resource by card and confirms the payment as the webhook would.
pub async fn book_via_card(
    ctx: &SettlementContext,
    resource_id: i64,
    payer_id: &str,
    payment_reference: &str,
) -> Result<i64> {
    let resource = booking::get_resource(&ctx.database, resource_id).await?;
    let result =
        booking::book_paid(ctx, resource_id, payer_id, resource.price, card_payment()).await?;
    let BookingResult::Checkout { booking_id, .. } = result else {
        return Err(Error::conflict("card booking did not open a checkout"));
    };
    booking::confirm_card_payment(ctx, booking_id, payment_reference, resource.price).await?;
    Ok(booking_id)
}

/// Complete bank details.
pub fn test_bank_details() -> BankDetails {
    BankDetails {
        account_name: "Ada Teacher".to_string(),
        account_number: "12345678".to_string(),
        routing_number: Some("021000021".to_string()),
        bank_name: "First Bank".to_string(),
        swift_code: None,
    }
}
