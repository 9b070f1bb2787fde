//! Shared services handle and caller identity.

use crate::config::SettlementConfig;
use crate::integrations::{gateway::PaymentGateway, notifier::Notifier};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Everything a settlement flow needs besides its arguments.
///
/// Cheap to clone: the connection is a pool handle and the collaborators are
/// reference counted.
#[derive(Clone)]
pub struct SettlementContext {
    /// Database connection for all settlement storage
    pub database: DatabaseConnection,
    /// Settlement policy configuration
    pub config: Arc<SettlementConfig>,
    /// Outbound payment gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Best-effort notification channel
    pub notifier: Arc<dyn Notifier>,
}

impl SettlementContext {
    /// Creates a new context from its parts.
    #[must_use]
    pub fn new(
        database: DatabaseConnection,
        config: SettlementConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            database,
            config: Arc::new(config),
            gateway,
            notifier,
        }
    }
}

/// Role of the caller, as established by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Buys courses and books sessions
    Student,
    /// Sells courses and sessions, receives payouts
    Instructor,
    /// Platform operator
    Admin,
}

/// Authenticated caller of a settlement operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// User id
    pub user_id: String,
    /// Role the user acts in
    pub role: Role,
}

impl Actor {
    /// A student caller.
    #[must_use]
    pub fn student(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::Student,
        }
    }

    /// An instructor caller.
    #[must_use]
    pub fn instructor(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::Instructor,
        }
    }

    /// An admin caller.
    #[must_use]
    pub fn admin(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role: Role::Admin,
        }
    }

    /// True for platform admins.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True if the caller is `user_id` or an admin.
    #[must_use]
    pub fn acts_for(&self, user_id: &str) -> bool {
        self.is_admin() || self.user_id == user_id
    }
}
