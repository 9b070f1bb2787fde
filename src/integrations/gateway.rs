//! Payment gateway port.
//!
//! The core only needs two outbound calls: create a hosted checkout session
//! for card payments and refund a captured payment. Both may fail or time out
//! independently of local bookkeeping, so callers never hold a database
//! transaction open across them.

use crate::config::settlement::{GatewayProvider, GatewaySettings};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Failure reported by the payment gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Transient failure (network, 5xx); safe to retry
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// The call did not answer in time; safe to retry
    #[error("gateway timed out after {0:?}")]
    Timeout(Duration),
    /// The gateway refused the request; retrying will not help
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether the call may succeed if repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// One line of a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Display name
    pub name: String,
    /// Unit price in minor units
    pub amount: i64,
    /// Quantity
    pub quantity: u32,
}

/// Everything needed to open a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Items being paid for
    pub line_items: Vec<LineItem>,
    /// Where the gateway redirects after payment
    pub success_url: String,
    /// Where the gateway redirects on abandonment
    pub cancel_url: String,
    /// Echoed back in the `payment.completed` webhook
    pub metadata: BTreeMap<String, String>,
}

/// Hosted checkout page created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// URL to redirect the payer to
    pub url: String,
    /// Gateway session identifier
    pub session_id: String,
}

/// Outbound payment gateway calls used by the settlement flows.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Refunds `amount` of a captured payment and returns the refund id.
    ///
    /// Calls repeating an `idempotency_key` must return the first refund
    /// instead of issuing another.
    async fn create_refund(
        &self,
        payment_reference: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<String, GatewayError>;
}

/// Builds the adapter named by `settings.provider`.
#[must_use]
pub fn gateway_for(settings: &GatewaySettings) -> Arc<dyn PaymentGateway> {
    match settings.provider {
        GatewayProvider::Disabled => {
            info!("No payment gateway configured");
            Arc::new(DisabledGateway)
        }
        GatewayProvider::Sandbox => {
            warn!("Using the sandbox payment gateway, refunds are simulated and no money moves");
            Arc::new(SandboxGateway::new())
        }
    }
}

/// Backoff used around gateway refund calls.
#[must_use]
pub fn refund_backoff(settings: &GatewaySettings) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(settings.retry_min_delay_ms))
        .with_max_delay(Duration::from_millis(settings.retry_max_delay_ms))
        .with_max_times(settings.retry_max_times)
        .with_jitter()
}

/// Issues a refund, retrying transient gateway failures with exponential backoff.
///
/// Every retry reuses `idempotency_key`.
pub async fn refund_with_retry(
    gateway: &dyn PaymentGateway,
    settings: &GatewaySettings,
    payment_reference: &str,
    amount: i64,
    idempotency_key: &str,
) -> Result<String, GatewayError> {
    (|| async {
        gateway
            .create_refund(payment_reference, amount, idempotency_key)
            .await
    })
        .retry(refund_backoff(settings))
        .when(GatewayError::is_retryable)
        .notify(|err, delay| {
            warn!(payment_reference, amount, %err, ?delay, "Retrying gateway refund");
        })
        .await
}

/// Gateway used when no adapter is configured. Every call fails as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_checkout_session(
        &self,
        _request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        Err(GatewayError::Unavailable(
            "no payment gateway configured".to_string(),
        ))
    }

    async fn create_refund(
        &self,
        _payment_reference: &str,
        _amount: i64,
        _idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        Err(GatewayError::Unavailable(
            "no payment gateway configured".to_string(),
        ))
    }
}

/// Refund accepted by the sandbox gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRefund {
    /// Refund id handed back to the caller
    pub refund_id: String,
    /// Key the refund was requested under
    pub idempotency_key: String,
    /// Refunded payment
    pub payment_reference: String,
    /// Refunded amount
    pub amount: i64,
}

/// In-process gateway for local runs and tests.
///
/// Checkout sessions point at a local URL and refunds always succeed unless
/// failures have been scripted with [`SandboxGateway::fail_next_refunds`] or
/// [`SandboxGateway::reject_refunds`].
#[derive(Debug, Default)]
pub struct SandboxGateway {
    sequence: AtomicU64,
    transient_refund_failures: AtomicU32,
    reject_refunds: AtomicBool,
    fail_checkout: AtomicBool,
    refund_delay_ms: AtomicU64,
    refunds: Mutex<Vec<SandboxRefund>>,
    refund_calls: AtomicU32,
}

impl SandboxGateway {
    /// Creates a sandbox gateway with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` refund calls fail with a retryable error.
    pub fn fail_next_refunds(&self, count: u32) {
        self.transient_refund_failures.store(count, Ordering::SeqCst);
    }

    /// Makes every refund call fail permanently until switched off.
    pub fn reject_refunds(&self, reject: bool) {
        self.reject_refunds.store(reject, Ordering::SeqCst);
    }

    /// Makes checkout session creation fail until switched off.
    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    /// Makes every refund call take `delay` before answering.
    pub fn set_refund_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.refund_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Refunds the sandbox has accepted so far.
    pub async fn refunds(&self) -> Vec<SandboxRefund> {
        self.refunds.lock().await.clone()
    }

    /// Number of refund calls received, successful or not.
    #[must_use]
    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}_{n:06}")
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(
                "sandbox checkout disabled".to_string(),
            ));
        }
        if request.line_items.is_empty() {
            return Err(GatewayError::Rejected("no line items".to_string()));
        }
        let session_id = self.next_id("cs");
        Ok(CheckoutSession {
            url: format!("http://localhost/sandbox/checkout/{session_id}"),
            session_id,
        })
    }

    async fn create_refund(
        &self,
        payment_reference: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.refund_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.reject_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected(format!(
                "refund of {payment_reference} refused"
            )));
        }
        let remaining = self.transient_refund_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_refund_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Unavailable(
                "sandbox refund outage".to_string(),
            ));
        }
        if amount <= 0 {
            return Err(GatewayError::Rejected(format!(
                "refund amount must be positive, got {amount}"
            )));
        }
        let mut refunds = self.refunds.lock().await;
        if let Some(existing) = refunds
            .iter()
            .find(|refund| refund.idempotency_key == idempotency_key)
        {
            return Ok(existing.refund_id.clone());
        }
        let refund_id = self.next_id("re");
        refunds.push(SandboxRefund {
            refund_id: refund_id.clone(),
            idempotency_key: idempotency_key.to_string(),
            payment_reference: payment_reference.to_string(),
            amount,
        });
        Ok(refund_id)
    }
}
