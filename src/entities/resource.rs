//! Resource entity - The bookable course or live session as seen by settlement.
//!
//! Only the fields the money flows need live here: owner, price, start time
//! and kind. Catalog content is managed elsewhere.

use super::sea_orm_active_enums::ResourceKind;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Resource database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resources")]
pub struct Model {
    /// Unique identifier for the resource
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Instructor who owns the resource
    pub teacher_id: String,
    /// Course, one-on-one session or group class
    pub kind: ResourceKind,
    /// Display title, used in notifications
    pub title: String,
    /// Price in minor units (0 for free-trial sessions)
    pub price: i64,
    /// Scheduled start, absent for self-paced courses
    pub scheduled_at: Option<DateTimeUtc>,
    /// Set once the instructor cancels the session
    pub is_cancelled: bool,
    /// When the resource was registered
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Resource and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One resource has many bookings
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
