//! Storage contracts for users, the coupon rotation and the claim ledger.
//!
//! Two backends implement every trait: [`memory::MemoryStore`] for tests and
//! local runs, and [`database::DatabaseStore`] on PostgreSQL via sea-orm.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;

use self::database::DatabaseStore;
use crate::models::claim::{Claim, NewClaim};
use crate::models::coupon::Coupon;

pub mod database;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Coupon code {0} already exists")]
    DuplicateCoupon(String),
    #[error("Storage call exceeded {0:?}")]
    Timeout(Duration),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Storage invariant violated: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user if absent. A concurrent create of the same id is success.
    async fn ensure_user(
        &self,
        user_id: &str,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Ordered coupon set plus the shared rotation cursor it exclusively owns.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Hand out the coupon under the cursor and advance it, atomically with
    /// respect to every other caller. `None` when no coupons exist, in which
    /// case the cursor is left untouched.
    async fn next_coupon(&self, now: DateTime<Utc>) -> Result<Option<Coupon>, StoreError>;

    async fn create_coupon(&self, code: &str, now: DateTime<Utc>) -> Result<Coupon, StoreError>;

    /// Insert any codes not already present, in order. Returns how many were new.
    async fn seed(&self, codes: &[String], now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Raw stored cursor value, reported by the readiness endpoint.
    async fn cursor(&self) -> Result<u64, StoreError>;
}

/// Append-only record of successful claims.
#[async_trait]
pub trait ClaimLedger: Send + Sync {
    async fn record(&self, claim: NewClaim) -> Result<Claim, StoreError>;

    async fn latest(&self, user_id: &str) -> Result<Option<Claim>, StoreError>;

    async fn latest_for_ip(&self, ip_address: &str) -> Result<Option<Claim>, StoreError>;

    /// Coupon codes claimed by `user_id` at or after `since`, newest first.
    async fn history(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<String>, StoreError>;
}

#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub claims: Arc<dyn ClaimLedger>,
    database: Option<Arc<DatabaseStore>>,
}

impl Storage {
    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            users: store.clone(),
            coupons: store.clone(),
            claims: store,
            database: None,
        }
    }

    pub fn database(connection: DatabaseConnection) -> Self {
        let store = Arc::new(DatabaseStore::new(connection));
        Self {
            users: store.clone(),
            coupons: store.clone(),
            claims: store.clone(),
            database: Some(store),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        users: Arc<dyn UserStore>,
        coupons: Arc<dyn CouponStore>,
        claims: Arc<dyn ClaimLedger>,
    ) -> Self {
        Self {
            users,
            coupons,
            claims,
            database: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        if self.database.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match &self.database {
            Some(store) => store.ping().await,
            None => Ok(()),
        }
    }
}

/// Run a storage call with an upper bound on how long the caller waits.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
