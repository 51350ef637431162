use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub const MAX_COUPON_CODE_LEN: usize = 64;

/// A distributable coupon. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponCodeError {
    #[error("Coupon code cannot be empty")]
    Empty,
    #[error("Coupon code exceeds {MAX_COUPON_CODE_LEN} character limit")]
    TooLong,
    #[error("Coupon code may only contain letters, digits, '-' and '_'")]
    InvalidCharacter,
}

/// Trim and validate a coupon code supplied by an administrator or the seed list.
pub fn normalize_coupon_code(value: &str) -> Result<String, CouponCodeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CouponCodeError::Empty);
    }
    if trimmed.len() > MAX_COUPON_CODE_LEN {
        return Err(CouponCodeError::TooLong);
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CouponCodeError::InvalidCharacter);
    }
    Ok(trimmed.to_string())
}
