//! Commission engine - splits every sale into platform fee and instructor net.
//!
//! Rows are append-only. A refund never edits the sale it refunds; it writes a
//! second, negative `reversal` row with the same rate, so the instructor's
//! pending balance nets out and the audit trail keeps both facts.
//!
//! Rates come from [`crate::config::settlement::CommissionRates`]; callers
//! never hard-code them. They are persisted as basis points so a reversal can
//! reuse the exact rate of its sale even after the rate table changes.

use crate::{
    entities::{Commission, CommissionKind, CommissionStatus, SourceType, commission},
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::{debug, info};

const BPS_PER_UNIT: i64 = 10_000;

/// Result of splitting a gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    /// Platform fee
    pub commission_amount: i64,
    /// Remainder owed to the instructor
    pub net_amount: i64,
}

/// `round(amount × fraction)`, half away from zero.
///
/// Fails with `Validation` if the product does not fit in minor units.
pub fn round_share(amount: i64, fraction: Decimal) -> Result<i64> {
    Decimal::from(amount)
        .checked_mul(fraction)
        .map(|share| share.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|share| share.to_i64())
        .ok_or_else(|| Error::Validation {
            field: "amount",
            message: format!("{amount} × {fraction} is out of range"),
        })
}

/// Splits `gross` at `rate` into commission and net.
pub fn compute_split(gross: i64, rate: Decimal) -> Result<Split> {
    let commission_amount = round_share(gross, rate)?;
    Ok(Split {
        commission_amount,
        net_amount: gross - commission_amount,
    })
}

/// Converts a fractional rate to basis points (0.2 -> 2000).
pub fn rate_to_bps(rate: Decimal) -> Result<i64> {
    round_share(BPS_PER_UNIT, rate)
}

/// Converts basis points back to a fractional rate (2000 -> 0.2).
#[must_use]
pub fn bps_to_rate(bps: i64) -> Decimal {
    Decimal::new(bps, 4)
}

fn validate_rate(rate: Decimal) -> Result<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(Error::Validation {
            field: "rate",
            message: format!("must be within [0, 1], got {rate}"),
        });
    }
    Ok(())
}

/// Finds the sale row of a sold item, if one was recorded.
pub async fn find_sale<C>(
    db: &C,
    source_type: SourceType,
    source_ref: &str,
) -> Result<Option<commission::Model>>
where
    C: ConnectionTrait,
{
    Commission::find()
        .filter(commission::Column::SourceType.eq(source_type))
        .filter(commission::Column::SourceRef.eq(source_ref))
        .filter(commission::Column::Kind.eq(CommissionKind::Sale))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Records a settled sale as a `pending` commission row.
///
/// A second sale for the same `(source_type, source_ref)` is a `Conflict`.
pub async fn record_sale<C>(
    db: &C,
    teacher_id: &str,
    gross_amount: i64,
    rate: Decimal,
    source_type: SourceType,
    source_ref: &str,
) -> Result<commission::Model>
where
    C: ConnectionTrait,
{
    if gross_amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: gross_amount,
        });
    }
    validate_rate(rate)?;

    if find_sale(db, source_type, source_ref).await?.is_some() {
        return Err(Error::conflict(format!(
            "sale for {source_type:?} {source_ref} already recorded"
        )));
    }

    let split = compute_split(gross_amount, rate)?;
    let row = insert_row(
        db,
        teacher_id,
        source_type,
        source_ref,
        CommissionKind::Sale,
        gross_amount,
        split,
        rate,
    )
    .await?;
    info!(
        teacher_id,
        source_ref,
        gross_amount,
        commission_amount = split.commission_amount,
        net_amount = split.net_amount,
        "Sale commission recorded"
    );
    Ok(row)
}

/// Writes the negative row offsetting (part of) a sale.
///
/// `gross_amount = -refund_amount`, `commission_amount = -round(refund_amount × rate)`
/// and `net_amount` is the difference. A zero refund still writes a zero row so
/// every cancellation leaves an audit entry. The row starts `pending` so it
/// offsets the instructor's next payout.
pub async fn reverse_sale<C>(
    db: &C,
    teacher_id: &str,
    refund_amount: i64,
    rate: Decimal,
    source_type: SourceType,
    source_ref: &str,
) -> Result<commission::Model>
where
    C: ConnectionTrait,
{
    if refund_amount < 0 {
        return Err(Error::InvalidAmount {
            amount: refund_amount,
        });
    }
    validate_rate(rate)?;

    if let Some(sale) = find_sale(db, source_type, source_ref).await?
        && refund_amount > sale.gross_amount
    {
        return Err(Error::Validation {
            field: "refund_amount",
            message: format!(
                "{refund_amount} exceeds the original sale of {}",
                sale.gross_amount
            ),
        });
    }

    let split = compute_split(refund_amount, rate)?;
    let reversal = Split {
        commission_amount: -split.commission_amount,
        net_amount: -split.net_amount,
    };
    let row = insert_row(
        db,
        teacher_id,
        source_type,
        source_ref,
        CommissionKind::Reversal,
        -refund_amount,
        reversal,
        rate,
    )
    .await?;
    info!(
        teacher_id,
        source_ref,
        refund_amount,
        net_amount = reversal.net_amount,
        "Sale reversal recorded"
    );
    Ok(row)
}

#[allow(clippy::too_many_arguments)]
async fn insert_row<C>(
    db: &C,
    teacher_id: &str,
    source_type: SourceType,
    source_ref: &str,
    kind: CommissionKind,
    gross_amount: i64,
    split: Split,
    rate: Decimal,
) -> Result<commission::Model>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    commission::ActiveModel {
        teacher_id: Set(teacher_id.to_string()),
        source_type: Set(source_type),
        source_ref: Set(source_ref.to_string()),
        kind: Set(kind),
        gross_amount: Set(gross_amount),
        commission_amount: Set(split.commission_amount),
        net_amount: Set(split.net_amount),
        rate_bps: Set(rate_to_bps(rate)?),
        status: Set(CommissionStatus::Pending),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(|e| {
        Error::from_insert(e, || {
            format!("{kind:?} commission for {source_type:?} {source_ref} already recorded")
        })
    })
}

/// Pending commission rows of an instructor, oldest first.
pub async fn pending_commissions<C>(db: &C, teacher_id: &str) -> Result<Vec<commission::Model>>
where
    C: ConnectionTrait,
{
    Commission::find()
        .filter(commission::Column::TeacherId.eq(teacher_id))
        .filter(commission::Column::Status.eq(CommissionStatus::Pending))
        .order_by_asc(commission::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sum of `net_amount` over the instructor's `pending` rows.
pub async fn pending_net_balance<C>(db: &C, teacher_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    let rows = pending_commissions(db, teacher_id).await?;
    let balance = rows.iter().map(|row| row.net_amount).sum();
    debug!(teacher_id, balance, rows = rows.len(), "Pending net balance");
    Ok(balance)
}

/// All-time net earnings: every sale minus every reversal, in any status.
pub async fn total_net_earnings<C>(db: &C, teacher_id: &str) -> Result<i64>
where
    C: ConnectionTrait,
{
    let rows = list_commissions(db, teacher_id).await?;
    Ok(rows.iter().map(|row| row.net_amount).sum())
}

/// Every commission row of an instructor, newest first.
pub async fn list_commissions<C>(db: &C, teacher_id: &str) -> Result<Vec<commission::Model>>
where
    C: ConnectionTrait,
{
    Commission::find()
        .filter(commission::Column::TeacherId.eq(teacher_id))
        .order_by_desc(commission::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
