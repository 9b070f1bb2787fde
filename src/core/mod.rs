//! Settlement business logic - framework-agnostic money flows.
//!
//! Functions that only touch storage take a connection (or an open transaction,
//! so they compose into larger atomic flows). Flows that also call the gateway
//! or send notifications take a [`context::SettlementContext`].

/// Booking flows: paid and free bookings, payment confirmation, completion
pub mod booking;
/// Cancellation flow: refunds, reversals and the refund outbox
pub mod cancellation;
/// Commission engine: fee split, sale and reversal rows, pending balances
pub mod commission;
/// Shared services handle and caller identity
pub mod context;
/// Free-trial quota enforcement
pub mod free_trial;
/// Payout batching and admin payout transitions
pub mod payout;
/// Reconciliation sweeps for wallet drift and stuck refunds
pub mod reconcile;
/// Refund tier policy
pub mod refund;
/// Wallet ledger store
pub mod wallet;
