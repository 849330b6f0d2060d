//! License-gated resource grants.
//!
//! An active license holder gets an entitlement (a role on the chat platform) and, once they
//! configure a banner, a dedicated resource named after it. The platform side lives behind
//! [`GrantProvider`]; this module keeps the `resource_grants` mapping in step with it.
//!
//! Provisioning is idempotent: a user with an existing grant has it renamed in place, never a
//! second one created.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::handlers::{BannerSettings, Licenses, ResourceGrants};
use crate::db::models::grants::ResourceGrantDBResponse;
use crate::errors::{Error, Result};
use crate::notifications::{Event, Notifications};
use crate::types::UserId;

const MAX_EMOJI_LEN: usize = 50;
const MAX_BANNER_NAME_LEN: usize = 50;

/// The chat platform's resource and entitlement management.
#[async_trait]
pub trait GrantProvider: Send + Sync {
    /// Create the user's resource, or rename it when `existing_ref` is given. Returns the
    /// reference of the resource now in place.
    async fn provision(&self, user: &UserId, existing_ref: Option<&str>, display_name: &str) -> anyhow::Result<String>;

    async fn assign_entitlement(&self, user: &UserId) -> anyhow::Result<()>;

    async fn revoke_entitlement(&self, user: &UserId) -> anyhow::Result<()>;

    async fn delete_resource(&self, external_ref: &str) -> anyhow::Result<()>;
}

/// Provider that records nothing externally and hands out stable references.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogGrantProvider;

#[async_trait]
impl GrantProvider for LogGrantProvider {
    async fn provision(&self, user: &UserId, existing_ref: Option<&str>, display_name: &str) -> anyhow::Result<String> {
        let external_ref = existing_ref.map(str::to_string).unwrap_or_else(|| format!("grant-{user}"));
        info!(user_id = %user, external_ref = %external_ref, display_name, "Grant provisioned (not delivered)");
        Ok(external_ref)
    }

    async fn assign_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
        info!(user_id = %user, "Entitlement assigned (not delivered)");
        Ok(())
    }

    async fn revoke_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
        info!(user_id = %user, "Entitlement revoked (not delivered)");
        Ok(())
    }

    async fn delete_resource(&self, external_ref: &str) -> anyhow::Result<()> {
        info!(external_ref, "Resource deleted (not delivered)");
        Ok(())
    }
}

/// `{emoji}{separator}{name}`, cut to `max_len` characters.
pub fn build_display_name(emoji: &str, separator: &str, name: &str, max_len: usize) -> String {
    format!("{emoji}{separator}{name}").chars().take(max_len).collect()
}

#[derive(Clone)]
pub struct GrantService {
    pool: SqlitePool,
    config: Arc<Config>,
    provider: Arc<dyn GrantProvider>,
    notifications: Notifications,
}

impl GrantService {
    pub fn new(pool: SqlitePool, config: Arc<Config>, provider: Arc<dyn GrantProvider>, notifications: Notifications) -> Self {
        Self {
            pool,
            config,
            provider,
            notifications,
        }
    }

    pub fn provider(&self) -> &Arc<dyn GrantProvider> {
        &self.provider
    }

    /// Store the user's banner and create or rename their resource to match it.
    #[instrument(skip(self, emoji, name), fields(user_id = %user), err)]
    pub async fn configure_grant(&self, user: &UserId, emoji: &str, name: &str) -> Result<ResourceGrantDBResponse> {
        let emoji = emoji.trim();
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput {
                message: "Banner name cannot be empty".to_string(),
            });
        }
        if emoji.is_empty() {
            return Err(Error::InvalidInput {
                message: "Emoji cannot be empty".to_string(),
            });
        }
        if emoji.chars().count() > MAX_EMOJI_LEN || name.chars().count() > MAX_BANNER_NAME_LEN {
            return Err(Error::InvalidInput {
                message: format!("Emoji and banner name are limited to {MAX_BANNER_NAME_LEN} characters"),
            });
        }

        let now = Utc::now();
        let mut conn = self.pool.acquire().await?;

        let active = Licenses::new(&mut conn).get(user).await?.is_some_and(|license| license.is_active_at(now));
        if !active {
            return Err(Error::LicenseInactive);
        }

        BannerSettings::new(&mut conn).upsert(user, emoji, name, now).await?;
        let display_name = build_display_name(emoji, &self.config.grants.separator, name, self.config.grants.max_name_len);
        let existing = ResourceGrants::new(&mut conn).get(user).await?;

        let external_ref = self
            .provider
            .provision(user, existing.as_ref().map(|g| g.external_ref.as_str()), &display_name)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to provision resource grant");
                Error::Internal {
                    operation: "provision resource grant".to_string(),
                }
            })?;
        // Entitle before recording: once the row exists, a sweep that removes it also revokes this
        if let Err(e) = self.provider.assign_entitlement(user).await {
            warn!(error = %e, "Failed to assign entitlement");
        }

        let recorded = ResourceGrants::new(&mut conn)
            .upsert_if_licensed(user, &external_ref, &display_name, Utc::now())
            .await?;
        drop(conn);

        let Some(grant) = recorded else {
            self.withdraw(user, &external_ref).await;
            return Err(Error::LicenseInactive);
        };
        info!(external_ref = %grant.external_ref, display_name = %grant.display_name, "Grant configured");

        self.notifications
            .channel(
                self.config.notifications.announce_channel.as_deref(),
                Event::GrantConfigured {
                    user_id: user.clone(),
                    display_name: grant.display_name.clone(),
                },
            )
            .await;

        Ok(grant)
    }

    /// Bring the user's external grants in line with a freshly activated license. Failures are
    /// logged and skipped; the license itself is already committed.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn sync(&self, user: &UserId) {
        if let Err(e) = self.provider.assign_entitlement(user).await {
            warn!(error = %e, "Failed to assign entitlement after redemption");
        }

        if let Err(e) = self.reprovision(user).await {
            warn!(error = %e, "Failed to re-provision grant after redemption");
        }
    }

    async fn reprovision(&self, user: &UserId) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;

        let Some(banner) = BannerSettings::new(&mut conn).get(user).await? else {
            return Ok(());
        };
        let existing = ResourceGrants::new(&mut conn).get(user).await?;
        let display_name = build_display_name(
            &banner.emoji,
            &self.config.grants.separator,
            &banner.banner_name,
            self.config.grants.max_name_len,
        );

        let external_ref = self
            .provider
            .provision(user, existing.as_ref().map(|g| g.external_ref.as_str()), &display_name)
            .await?;
        let recorded = ResourceGrants::new(&mut conn)
            .upsert_if_licensed(user, &external_ref, &display_name, Utc::now())
            .await?;
        drop(conn);

        if recorded.is_none() {
            self.withdraw(user, &external_ref).await;
        }

        Ok(())
    }

    /// Undo a provisioning whose license was revoked before the grant could be recorded.
    async fn withdraw(&self, user: &UserId, external_ref: &str) {
        info!(user_id = %user, external_ref, "License gone before grant was recorded, withdrawing");

        if let Err(e) = self.provider.revoke_entitlement(user).await {
            warn!(error = %e, "Failed to revoke entitlement for withdrawn grant");
        }
        if let Err(e) = self.provider.delete_resource(external_ref).await {
            warn!(error = %e, external_ref, "Failed to delete withdrawn resource");
        }
    }

    pub async fn get_grant(&self, user: &UserId) -> Result<Option<ResourceGrantDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Ok(ResourceGrants::new(&mut conn).get(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::licenses::LicenseKind;
    use crate::db::handlers::LicenseCleanups;
    use crate::errors::ErrorKind;
    use crate::test_utils::{RecordingGrantProvider, TestContext, create_test_context};

    /// Provider during whose `provision` call the user's license is revoked and committed, the
    /// way an expiry sweep would do it.
    struct RevokedWhileProvisioning {
        pool: SqlitePool,
        inner: Arc<RecordingGrantProvider>,
    }

    #[async_trait]
    impl GrantProvider for RevokedWhileProvisioning {
        async fn provision(&self, user: &UserId, existing_ref: Option<&str>, display_name: &str) -> anyhow::Result<String> {
            let mut tx = self.pool.begin().await?;
            LicenseCleanups::new(&mut tx).insert(user, Utc::now()).await?;
            sqlx::query("DELETE FROM licenses WHERE user_id = ?").bind(user).execute(&mut *tx).await?;
            ResourceGrants::new(&mut tx).delete(user).await?;
            tx.commit().await?;

            self.inner.provision(user, existing_ref, display_name).await
        }

        async fn assign_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
            self.inner.assign_entitlement(user).await
        }

        async fn revoke_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
            self.inner.revoke_entitlement(user).await
        }

        async fn delete_resource(&self, external_ref: &str) -> anyhow::Result<()> {
            self.inner.delete_resource(external_ref).await
        }
    }

    async fn licensed(ctx: &TestContext, user: &UserId) {
        let code = ctx.app.licenses.issue_code(&ctx.admin(), LicenseKind::Long).await.unwrap();
        ctx.app.licenses.redeem(user, &code.code).await.unwrap();
    }

    #[test]
    fn test_display_name_truncates_by_chars() {
        assert_eq!(build_display_name("⭐", "┃", "Fan Club", 100), "⭐┃Fan Club");
        assert_eq!(build_display_name("⭐", "┃", "abcdef", 5), "⭐┃abc");

        let long = "가".repeat(120);
        assert_eq!(build_display_name("", "", &long, 100).chars().count(), 100);
    }

    #[test_log::test(tokio::test)]
    async fn test_requires_active_license() {
        let ctx = create_test_context().await;

        let err = ctx
            .app
            .grants
            .configure_grant(&UserId::from("g1"), "⭐", "Fans")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LicenseInactive);
        assert!(ctx.grants.provisioned().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_rejects_empty_name() {
        let ctx = create_test_context().await;
        let user = UserId::from("g2");
        licensed(&ctx, &user).await;

        let err = ctx.app.grants.configure_grant(&user, "⭐", "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test_log::test(tokio::test)]
    async fn test_reconfigure_updates_in_place() {
        let ctx = create_test_context().await;
        let user = UserId::from("g3");
        licensed(&ctx, &user).await;

        let first = ctx.app.grants.configure_grant(&user, "⭐", "Fans").await.unwrap();
        assert_eq!(first.display_name, "⭐┃Fans");

        let second = ctx.app.grants.configure_grant(&user, "🔥", "Hot Fans").await.unwrap();
        assert_eq!(second.external_ref, first.external_ref);
        assert_eq!(second.display_name, "🔥┃Hot Fans");

        let calls = ctx.grants.provisioned();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1.as_deref(), Some(first.external_ref.as_str()));

        assert!(ctx.notifier.events().iter().any(|e| matches!(
            e,
            Event::GrantConfigured { display_name, .. } if display_name == "🔥┃Hot Fans"
        )));
    }

    #[test_log::test(tokio::test)]
    async fn test_redeem_renames_existing_grant() {
        let ctx = create_test_context().await;
        let user = UserId::from("g4");
        licensed(&ctx, &user).await;
        let grant = ctx.app.grants.configure_grant(&user, "⭐", "Fans").await.unwrap();

        // Re-licensing re-runs provisioning against the same resource
        licensed(&ctx, &user).await;

        let calls = ctx.grants.provisioned();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.as_deref(), Some(grant.external_ref.as_str()));
        assert_eq!(ctx.app.grants.get_grant(&user).await.unwrap().unwrap().external_ref, grant.external_ref);
    }

    #[test_log::test(tokio::test)]
    async fn test_provider_failure_is_internal_error() {
        let ctx = create_test_context().await;
        let user = UserId::from("g5");
        licensed(&ctx, &user).await;
        ctx.grants.fail_all(true);

        let err = ctx.app.grants.configure_grant(&user, "⭐", "Fans").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(ctx.app.grants.get_grant(&user).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_revocation_during_provisioning_leaves_no_grant() {
        let ctx = create_test_context().await;
        let user = UserId::from("g6");
        licensed(&ctx, &user).await;

        let platform = Arc::new(RecordingGrantProvider::default());
        let service = GrantService::new(
            ctx.app.pool.clone(),
            ctx.app.config.clone(),
            Arc::new(RevokedWhileProvisioning {
                pool: ctx.app.pool.clone(),
                inner: platform.clone(),
            }),
            Notifications::new(ctx.notifier.clone()),
        );

        let err = service.configure_grant(&user, "⭐", "Fans").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LicenseInactive);
        assert!(service.get_grant(&user).await.unwrap().is_none());

        // What was created on the platform is taken back
        assert_eq!(platform.revoked(), vec![user.clone()]);
        assert_eq!(platform.deleted(), vec![format!("res-{user}")]);
        assert!(
            !ctx.notifier
                .events()
                .iter()
                .any(|e| matches!(e, Event::GrantConfigured { .. }))
        );
    }
}
