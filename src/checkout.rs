//! Order pricing, coupon rules and the order status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::models::{CartLine, Coupon};

pub const COUPON_PERCENT: &str = "percent";
pub const COUPON_FIXED: &str = "fixed";

/// OrderStatus
///
/// Lifecycle: `pending -> paid -> shipped -> delivered`, with `cancelled` reachable
/// from `pending` and `paid`. Stored as lower-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Cancelled)
                | (Self::Paid, Self::Shipped)
                | (Self::Paid, Self::Cancelled)
                | (Self::Shipped, Self::Delivered)
        )
    }

    /// Orders that can still be cancelled by their owner.
    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(Self::Cancelled)
    }

    /// Statuses whose totals count as revenue.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Shipped | Self::Delivered)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown order status '{0}'")]
pub struct UnknownStatus(pub String);

impl TryFrom<String> for OrderStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// Why a coupon cannot be used for an order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit reached")]
    Exhausted,
    #[error("order subtotal must be at least {0} cents to use this coupon")]
    BelowMinimum(i64),
    #[error("coupon has an unsupported kind '{0}'")]
    UnknownKind(String),
}

/// Validates the shape of a coupon definition before it is stored.
pub fn validate_coupon_definition(kind: &str, value: i64) -> Result<(), String> {
    match kind {
        COUPON_PERCENT if (1..=100).contains(&value) => Ok(()),
        COUPON_PERCENT => Err("percent coupons take a value between 1 and 100".to_string()),
        COUPON_FIXED if value > 0 => Ok(()),
        COUPON_FIXED => Err("fixed coupons take a positive value in cents".to_string()),
        other => Err(format!("unsupported coupon kind '{other}'")),
    }
}

impl Coupon {
    /// Discount this coupon grants on `subtotal_cents` at `now`.
    pub fn discount_for(&self, subtotal_cents: i64, now: DateTime<Utc>) -> Result<i64, CouponError> {
        if !self.is_active {
            return Err(CouponError::Inactive);
        }
        if self.expires_at.is_some_and(|expires| expires <= now) {
            return Err(CouponError::Expired);
        }
        if self.max_uses.is_some_and(|max| self.used_count >= max) {
            return Err(CouponError::Exhausted);
        }
        if subtotal_cents < self.min_order_cents {
            return Err(CouponError::BelowMinimum(self.min_order_cents));
        }

        let discount = match self.kind.as_str() {
            COUPON_PERCENT => subtotal_cents * self.value.clamp(0, 100) / 100,
            COUPON_FIXED => self.value.max(0),
            other => return Err(CouponError::UnknownKind(other.to_string())),
        };
        Ok(discount.min(subtotal_cents))
    }
}

/// OrderPricing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderPricing {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

/// Prices a set of cart lines, applying `coupon` when given.
pub fn price_order(
    lines: &[CartLine],
    coupon: Option<&Coupon>,
    now: DateTime<Utc>,
) -> Result<OrderPricing, CouponError> {
    let subtotal_cents: i64 = lines
        .iter()
        .map(|line| line.unit_price_cents * i64::from(line.quantity))
        .sum();

    let discount_cents = match coupon {
        Some(coupon) => coupon.discount_for(subtotal_cents, now)?,
        None => 0,
    };

    Ok(OrderPricing {
        subtotal_cents,
        discount_cents,
        total_cents: subtotal_cents - discount_cents,
    })
}
