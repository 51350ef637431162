//! In-process backend. All rotation state sits behind one mutex, which is the
//! critical section for the read-pick-advance of the cursor.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{ClaimLedger, CouponStore, StoreError, UserStore};
use crate::models::claim::{Claim, NewClaim};
use crate::models::coupon::Coupon;

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashSet<String>>,
    rotation: Mutex<Rotation>,
    ledger: RwLock<Ledger>,
}

#[derive(Debug, Default)]
struct Rotation {
    /// Ascending by id, which is creation order.
    coupons: Vec<Coupon>,
    cursor: u64,
    next_id: i64,
}

#[derive(Debug, Default)]
struct Ledger {
    by_user: HashMap<String, Vec<Claim>>,
    by_ip: HashMap<String, Vec<Claim>>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn set_cursor(&self, cursor: u64) {
        self.rotation.lock().cursor = cursor;
    }
}

impl Rotation {
    fn insert(&mut self, code: &str, now: DateTime<Utc>) -> Option<Coupon> {
        if self.coupons.iter().any(|coupon| coupon.code == code) {
            return None;
        }
        self.next_id += 1;
        let coupon = Coupon {
            id: self.next_id,
            code: code.to_string(),
            created_at: now,
        };
        self.coupons.push(coupon.clone());
        Some(coupon)
    }
}

fn newest(claims: Option<&Vec<Claim>>) -> Option<Claim> {
    claims?
        .iter()
        .max_by_key(|claim| (claim.claimed_at, claim.id))
        .cloned()
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ensure_user(
        &self,
        user_id: &str,
        _ip_address: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Only existence matters here; the IP lives on each ledger entry
        self.users.write().insert(user_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn next_coupon(&self, _now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError> {
        let mut rotation = self.rotation.lock();
        let count = rotation.coupons.len() as u64;
        if count == 0 {
            return Ok(None);
        }

        let index = rotation.cursor % count;
        let coupon = rotation
            .coupons
            .get(index as usize)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("no coupon at index {index}")))?;
        rotation.cursor = (index + 1) % count;
        Ok(Some(coupon))
    }

    async fn create_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<Coupon, StoreError> {
        self.rotation
            .lock()
            .insert(code, now)
            .ok_or_else(|| StoreError::DuplicateCoupon(code.to_string()))
    }

    async fn seed(&self, codes: &[String], now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rotation = self.rotation.lock();
        let inserted = codes
            .iter()
            .filter(|code| rotation.insert(code, now).is_some())
            .count();
        Ok(inserted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rotation.lock().coupons.len() as u64)
    }

    async fn cursor(&self) -> Result<u64, StoreError> {
        Ok(self.rotation.lock().cursor)
    }
}

#[async_trait]
impl ClaimLedger for MemoryStore {
    async fn record(&self, claim: NewClaim) -> Result<Claim, StoreError> {
        let mut ledger = self.ledger.write();
        ledger.next_id += 1;
        let recorded = Claim {
            id: ledger.next_id,
            user_id: claim.user_id,
            coupon_id: claim.coupon_id,
            coupon_code: claim.coupon_code,
            ip_address: claim.ip_address,
            claimed_at: claim.claimed_at,
        };
        ledger
            .by_user
            .entry(recorded.user_id.clone())
            .or_default()
            .push(recorded.clone());
        ledger
            .by_ip
            .entry(recorded.ip_address.clone())
            .or_default()
            .push(recorded.clone());
        Ok(recorded)
    }

    async fn latest(&self, user_id: &str) -> Result<Option<Claim>, StoreError> {
        Ok(newest(self.ledger.read().by_user.get(user_id)))
    }

    async fn latest_for_ip(&self, ip_address: &str) -> Result<Option<Claim>, StoreError> {
        Ok(newest(self.ledger.read().by_ip.get(ip_address)))
    }

    async fn history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<String>, StoreError> {
        let ledger = self.ledger.read();
        let Some(claims) = ledger.by_user.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut recent: Vec<&Claim> = claims
            .iter()
            .filter(|claim| claim.claimed_at >= since)
            .collect();
        recent.sort_by_key(|claim| std::cmp::Reverse((claim.claimed_at, claim.id)));
        Ok(recent
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|claim| claim.coupon_code.clone())
            .collect())
    }
}
