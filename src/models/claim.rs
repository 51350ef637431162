use chrono::{DateTime, Utc};
use serde::Serialize;

/// Claim about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub user_id: String,
    pub coupon_id: i64,
    pub coupon_code: String,
    pub ip_address: String,
    pub claimed_at: DateTime<Utc>,
}

/// A recorded claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub id: i64,
    pub user_id: String,
    pub coupon_id: i64,
    pub coupon_code: String,
    pub ip_address: String,
    pub claimed_at: DateTime<Utc>,
}

/// Body of `GET /claim-status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatusView {
    /// `None` when the user may claim right now.
    pub time_remaining_seconds: Option<u64>,
    /// Newest first.
    pub recent_claims: Vec<String>,
}
