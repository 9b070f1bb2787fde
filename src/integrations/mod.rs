//! External collaborators the settlement core talks to: the payment gateway
//! (outbound checkout and refund calls, inbound webhooks) and the
//! notification dispatcher.

/// Payment gateway port and the in-process sandbox gateway
pub mod gateway;
/// Best-effort notification dispatch
pub mod notifier;
/// Inbound gateway webhook events
pub mod webhook;
