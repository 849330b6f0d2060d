//! Periodic cleanup of expired licenses.
//!
//! Each sweep selects time-limited licenses whose expiry has passed and that carry no cleanup
//! marker, then processes every user in a transaction of its own:
//!
//! 1. write the cleanup marker (`INSERT ... ON CONFLICT DO NOTHING`); a lost race skips the user
//! 2. delete the license, but only if it is still expired (a fresh redemption wins)
//! 3. drop the resource grant row
//!
//! Only after commit are the external entitlement and resource removed and the user told. Those
//! calls are best-effort and bounded by `sweeper.external_timeout`, so a platform outage never
//! leaves a license half-revoked in storage nor stalls later sweeps.
//!
//! A sweep fetches `batch_size` licenses at a time and keeps going until none are left.
//!
//! Sweeps never overlap within a process: a tick that finds the previous sweep still running is
//! skipped.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SweeperConfig;
use crate::db::handlers::{LicenseCleanups, Licenses, ResourceGrants};
use crate::db::models::grants::ResourceGrantDBResponse;
use crate::db::models::licenses::ExpiredLicense;
use crate::errors::Result;
use crate::grants::GrantProvider;
use crate::notifications::{Event, Notifications};
use crate::types::{Actor, Operation, UserId};

/// Counts from a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired, uncleaned licenses processed, across all batches
    pub examined: usize,
    pub revoked: usize,
    /// Already claimed by a concurrent sweep, or renewed before deletion
    pub skipped: usize,
    /// Storage errors; these users are picked up again next sweep
    pub failed: usize,
}

enum Revocation {
    Revoked(Option<ResourceGrantDBResponse>),
    Skipped,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    pool: SqlitePool,
    config: SweeperConfig,
    grants: Arc<dyn GrantProvider>,
    notifications: Notifications,
    guard: Arc<Mutex<()>>,
}

impl ExpirySweeper {
    pub fn new(
        pool: SqlitePool,
        config: SweeperConfig,
        grants: Arc<dyn GrantProvider>,
        notifications: Notifications,
    ) -> Self {
        Self {
            pool,
            config,
            grants,
            notifications,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Administrator-triggered sweep. `None` when a sweep is already running.
    pub async fn sweep_now(&self, actor: &Actor) -> Result<Option<SweepReport>> {
        actor.ensure_admin(Operation::Sweep)?;
        self.try_sweep(Utc::now()).await
    }

    /// Sweep as of `now` unless a sweep is already in progress.
    pub async fn try_sweep(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>> {
        let Ok(_running) = self.guard.try_lock() else {
            debug!("Previous sweep still running, skipping");
            return Ok(None);
        };
        self.sweep_locked(now).await.map(Some)
    }

    /// Sweep as of `now`, waiting for any sweep in progress.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let _running = self.guard.lock().await;
        self.sweep_locked(now).await
    }

    #[instrument(skip(self), err)]
    async fn sweep_locked(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        // Users whose revocation failed stay listed; they are retried next sweep, not next batch
        let mut failed: HashSet<UserId> = HashSet::new();

        loop {
            let limit = self.config.batch_size.saturating_add(failed.len() as i64);
            let batch: Vec<ExpiredLicense> = {
                let mut conn = self.pool.acquire().await?;
                Licenses::new(&mut conn).list_expired_uncleaned(now, limit).await?
            }
            .into_iter()
            .filter(|license| !failed.contains(&license.user_id))
            .collect();

            if batch.is_empty() {
                break;
            }
            report.examined += batch.len();

            for license in batch {
                match self.revoke(&license.user_id, now).await {
                    Ok(Revocation::Revoked(grant)) => {
                        report.revoked += 1;
                        self.release_external(&license, grant).await;
                    }
                    Ok(Revocation::Skipped) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!(user_id = %license.user_id, error = %e, "Failed to revoke expired license");
                        failed.insert(license.user_id);
                    }
                }
            }
        }

        metrics::counter!("shopctl_sweeps_total").increment(1);
        metrics::counter!("shopctl_licenses_revoked_total").increment(report.revoked as u64);
        if report.examined > 0 {
            info!(
                examined = report.examined,
                revoked = report.revoked,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }

        Ok(report)
    }

    async fn revoke(&self, user: &UserId, now: DateTime<Utc>) -> Result<Revocation> {
        let mut tx = self.pool.begin().await?;

        if !LicenseCleanups::new(&mut tx).insert(user, now).await? {
            tx.rollback().await?;
            return Ok(Revocation::Skipped);
        }

        if !Licenses::new(&mut tx).delete_expired(user, now).await? {
            tx.rollback().await?;
            return Ok(Revocation::Skipped);
        }

        let grant = ResourceGrants::new(&mut tx).delete(user).await?;
        tx.commit().await?;

        Ok(Revocation::Revoked(grant))
    }

    async fn release_external(&self, license: &ExpiredLicense, grant: Option<ResourceGrantDBResponse>) {
        let user = &license.user_id;
        let limit = self.config.external_timeout;

        match timeout(limit, self.grants.revoke_entitlement(user)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id = %user, error = %e, "Failed to revoke entitlement"),
            Err(_) => warn!(user_id = %user, timeout = ?limit, "Timed out revoking entitlement"),
        }

        if let Some(grant) = grant {
            match timeout(limit, self.grants.delete_resource(&grant.external_ref)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(user_id = %user, external_ref = %grant.external_ref, error = %e, "Failed to delete resource")
                }
                Err(_) => {
                    warn!(user_id = %user, external_ref = %grant.external_ref, timeout = ?limit, "Timed out deleting resource")
                }
            }
        }

        self.notifications
            .user(
                user,
                Event::LicenseExpired {
                    expired_at: license.expires_at,
                },
            )
            .await;
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.config.interval, batch_size = self.config.batch_size, "Starting expiry sweeper");

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }

            if let Err(e) = self.try_sweep(Utc::now()).await {
                error!(error = %e, "Expiry sweep failed");
            }
        }
    }
}
