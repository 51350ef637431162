//! Claim orchestration.
//!
//! A claim walks `identified -> cooldown checked` and ends in exactly one of
//! [`ClaimOutcome`]'s variants. Only the rotation store mutates the cursor;
//! the ledger alone decides cooldowns.
//!
//! If the cursor advances but the ledger append fails, that rotation slot is
//! simply skipped. No rollback is attempted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ClaimsConfig;
use crate::cooldown::{CooldownTracker, wait_message};
use crate::identity::{ResolvedIdentity, is_routable_ip};
use crate::models::claim::{ClaimStatusView, NewClaim};
use crate::state::ApiCache;
use crate::store::{Storage, StoreError, bounded};

pub const NO_COUPONS_MESSAGE: &str = "no coupons available";
pub const FAILURE_MESSAGE: &str = "Error processing request";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Dispensed {
        coupon_code: String,
        cooldown_period_seconds: u64,
    },
    OnCooldown {
        remaining_seconds: u64,
        message: String,
    },
    Exhausted,
    /// Details were logged; callers only learn that it failed.
    Failed,
}

pub struct ClaimOrchestrator {
    storage: Storage,
    cache: Arc<ApiCache>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownTracker,
    storage_timeout: Duration,
    history_limit: u64,
    history_retention: chrono::Duration,
    ip_cooldown: bool,
}

impl ClaimOrchestrator {
    pub fn new(
        storage: Storage,
        cache: Arc<ApiCache>,
        clock: Arc<dyn Clock>,
        claims: &ClaimsConfig,
        storage_timeout: Duration,
    ) -> Self {
        assert!(claims.history_limit > 0, "History limit must be positive");
        assert!(
            claims.history_limit <= 100,
            "History limit exceeds defensive bound"
        );
        Self {
            storage,
            cache,
            clock,
            cooldown: CooldownTracker::new(claims.cooldown_period_seconds),
            storage_timeout,
            history_limit: claims.history_limit,
            history_retention: claims.history_retention(),
            ip_cooldown: claims.ip_cooldown,
        }
    }

    pub fn cooldown_period_seconds(&self) -> u64 {
        self.cooldown.period_seconds()
    }

    pub async fn claim(&self, identity: &ResolvedIdentity) -> ClaimOutcome {
        let lock = self.cache.claim_lock(&identity.user_id);
        let _guard = lock.lock().await;

        match self.try_claim(identity).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    user_id = %identity.user_id,
                    ip = %identity.ip_address,
                    error = %err,
                    "Coupon claim failed"
                );
                ClaimOutcome::Failed
            }
        }
    }

    async fn try_claim(&self, identity: &ResolvedIdentity) -> Result<ClaimOutcome, StoreError> {
        let now = self.clock.now();
        self.ensure_user(identity, now).await?;

        let latest = bounded(
            self.storage_timeout,
            self.storage.claims.latest(&identity.user_id),
        )
        .await?;
        let status = self.cooldown.check(latest.map(|claim| claim.claimed_at), now);
        if status.on_cooldown {
            debug!(
                user_id = %identity.user_id,
                remaining = status.remaining_seconds,
                "Claim refused, user on cooldown"
            );
            return Ok(ClaimOutcome::OnCooldown {
                remaining_seconds: status.remaining_seconds,
                message: wait_message(status.remaining_seconds),
            });
        }

        if self.ip_cooldown && is_routable_ip(&identity.ip_address) {
            let latest_for_ip = bounded(
                self.storage_timeout,
                self.storage.claims.latest_for_ip(&identity.ip_address),
            )
            .await?;
            let status = self
                .cooldown
                .check(latest_for_ip.map(|claim| claim.claimed_at), now);
            if status.on_cooldown {
                debug!(
                    user_id = %identity.user_id,
                    ip = %identity.ip_address,
                    remaining = status.remaining_seconds,
                    "Claim refused, address on cooldown"
                );
                return Ok(ClaimOutcome::OnCooldown {
                    remaining_seconds: status.remaining_seconds,
                    message: wait_message(status.remaining_seconds),
                });
            }
        }

        let Some(coupon) =
            bounded(self.storage_timeout, self.storage.coupons.next_coupon(now)).await?
        else {
            warn!(user_id = %identity.user_id, "Claim refused, no coupons available");
            return Ok(ClaimOutcome::Exhausted);
        };

        let claim = NewClaim {
            user_id: identity.user_id.clone(),
            coupon_id: coupon.id,
            coupon_code: coupon.code.clone(),
            ip_address: identity.ip_address.clone(),
            claimed_at: self.clock.now(),
        };
        if let Err(err) = bounded(self.storage_timeout, self.storage.claims.record(claim)).await {
            warn!(
                coupon = %coupon.code,
                "Rotation slot consumed without a recorded claim"
            );
            return Err(err);
        }

        info!(
            user_id = %identity.user_id,
            ip = %identity.ip_address,
            coupon = %coupon.code,
            "Coupon claimed"
        );
        Ok(ClaimOutcome::Dispensed {
            coupon_code: coupon.code,
            cooldown_period_seconds: self.cooldown.period_seconds(),
        })
    }

    async fn ensure_user(
        &self,
        identity: &ResolvedIdentity,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        if self.cache.known_users.contains_key(&identity.user_id) {
            return Ok(());
        }
        bounded(
            self.storage_timeout,
            self.storage
                .users
                .ensure_user(&identity.user_id, &identity.ip_address, now),
        )
        .await?;
        self.cache
            .known_users
            .insert(identity.user_id.clone(), ())
            .await;
        Ok(())
    }

    /// Read-only view of cooldown and recent history.
    pub async fn status(&self, identity: &ResolvedIdentity) -> Result<ClaimStatusView, StoreError> {
        // A cookie minted just now cannot have history
        if identity.fresh {
            return Ok(ClaimStatusView::default());
        }

        let now = self.clock.now();
        let latest = bounded(
            self.storage_timeout,
            self.storage.claims.latest(&identity.user_id),
        )
        .await?;
        let status = self.cooldown.check(latest.map(|claim| claim.claimed_at), now);

        let recent_claims = bounded(
            self.storage_timeout,
            self.storage.claims.history(
                &identity.user_id,
                now - self.history_retention,
                self.history_limit,
            ),
        )
        .await?;
        assert!(
            recent_claims.len() as u64 <= self.history_limit,
            "History exceeded configured limit"
        );

        Ok(ClaimStatusView {
            time_remaining_seconds: status.on_cooldown.then_some(status.remaining_seconds),
            recent_claims,
        })
    }
}
