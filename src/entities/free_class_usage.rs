//! Free class usage entity - Lifetime free-trial flags per student.
//!
//! Both flags only ever go from false to true.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Free class usage database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "free_class_usage")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Student the flags belong to
    #[sea_orm(unique)]
    pub student_id: String,
    /// Free 1:1 demo already taken
    pub demo_used: bool,
    /// Free group class already taken
    pub group_used: bool,
    /// Booking that consumed the demo
    #[sea_orm(nullable)]
    pub demo_session_ref: Option<String>,
    /// Booking that consumed the group class
    #[sea_orm(nullable)]
    pub group_session_ref: Option<String>,
    /// When the row was created
    pub created_at: DateTimeUtc,
    /// When a flag last flipped
    pub updated_at: DateTimeUtc,
}

/// `FreeClassUsage` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
