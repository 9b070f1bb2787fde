//! Free-trial quota enforcement.
//!
//! Each student gets one free 1:1 demo and one free group class for life. The
//! flags live in a single row per student (unique `student_id`) and are flipped
//! with a guarded `UPDATE ... WHERE <flag> = false`: of two concurrent claims
//! only one can change the row, the other sees zero rows and fails with
//! `QuotaExceeded`. Consumption runs on the caller's transaction so it commits
//! or rolls back together with the free booking.

use crate::{
    entities::{FreeClassUsage, free_class_usage},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{Set, prelude::*};
use tracing::info;

/// The two free-trial categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeCategory {
    /// Free 1:1 demo session
    Demo,
    /// Free group class
    Group,
}

impl FreeCategory {
    /// Human-readable name used in errors and notifications.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Demo => "demo session",
            Self::Group => "group class",
        }
    }

    const fn flag(self) -> free_class_usage::Column {
        match self {
            Self::Demo => free_class_usage::Column::DemoUsed,
            Self::Group => free_class_usage::Column::GroupUsed,
        }
    }

    const fn session_ref(self) -> free_class_usage::Column {
        match self {
            Self::Demo => free_class_usage::Column::DemoSessionRef,
            Self::Group => free_class_usage::Column::GroupSessionRef,
        }
    }
}

/// Usage row of a student, if any free class was ever claimed.
pub async fn get_usage<C>(db: &C, student_id: &str) -> Result<Option<free_class_usage::Model>>
where
    C: ConnectionTrait,
{
    FreeClassUsage::find()
        .filter(free_class_usage::Column::StudentId.eq(student_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// True if the student has not used the given free category yet.
pub async fn can_use<C>(db: &C, student_id: &str, category: FreeCategory) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(get_usage(db, student_id)
        .await?
        .is_none_or(|usage| match category {
            FreeCategory::Demo => !usage.demo_used,
            FreeCategory::Group => !usage.group_used,
        }))
}

/// True if the student may still book a free 1:1 demo.
pub async fn can_use_free_demo<C>(db: &C, student_id: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    can_use(db, student_id, FreeCategory::Demo).await
}

/// True if the student may still book a free group class.
pub async fn can_use_free_group<C>(db: &C, student_id: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    can_use(db, student_id, FreeCategory::Group).await
}

/// Marks a free category as used, recording the session that used it.
///
/// Must run on the transaction that confirms the free booking. Fails with
/// `QuotaExceeded` if the flag was already set, including by a concurrent claim.
pub async fn consume<C>(
    db: &C,
    student_id: &str,
    category: FreeCategory,
    session_ref: &str,
) -> Result<free_class_usage::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let blank = free_class_usage::ActiveModel {
        student_id: Set(student_id.to_string()),
        demo_used: Set(false),
        group_used: Set(false),
        demo_session_ref: Set(None),
        group_session_ref: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    FreeClassUsage::insert(blank)
        .on_conflict(
            OnConflict::column(free_class_usage::Column::StudentId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let claimed = FreeClassUsage::update_many()
        .col_expr(category.flag(), Expr::value(true))
        .col_expr(category.session_ref(), Expr::value(session_ref))
        .col_expr(free_class_usage::Column::UpdatedAt, Expr::value(now))
        .filter(free_class_usage::Column::StudentId.eq(student_id))
        .filter(category.flag().eq(false))
        .exec(db)
        .await?;

    if claimed.rows_affected == 0 {
        return Err(Error::QuotaExceeded {
            student_id: student_id.to_string(),
            category: category.label(),
        });
    }
    info!(student_id, session_ref, category = category.label(), "Free trial consumed");

    get_usage(db, student_id)
        .await?
        .ok_or_else(|| Error::not_found("free class usage", student_id))
}

/// Marks the free demo as used.
pub async fn consume_free_demo<C>(
    db: &C,
    student_id: &str,
    session_ref: &str,
) -> Result<free_class_usage::Model>
where
    C: ConnectionTrait,
{
    consume(db, student_id, FreeCategory::Demo, session_ref).await
}

/// Marks the free group class as used.
pub async fn consume_free_group<C>(
    db: &C,
    student_id: &str,
    session_ref: &str,
) -> Result<free_class_usage::Model>
where
    C: ConnectionTrait,
{
    consume(db, student_id, FreeCategory::Group, session_ref).await
}
