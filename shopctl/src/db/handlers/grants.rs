//! Database repositories for resource grants and banner settings.

use crate::db::{
    errors::Result,
    models::grants::{BannerSettingDBResponse, ResourceGrantDBResponse},
};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;

pub struct ResourceGrants<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> ResourceGrants<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get(&mut self, user_id: &UserId) -> Result<Option<ResourceGrantDBResponse>> {
        let grant = sqlx::query_as::<_, ResourceGrantDBResponse>("SELECT * FROM resource_grants WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(grant)
    }

    /// Record (or repoint) the user's single grant, provided they hold a license active at `now`.
    ///
    /// The license check and the write are one statement, so a revocation committed in between
    /// cannot leave a grant behind. Returns `None` when there is no active license.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn upsert_if_licensed(
        &mut self,
        user_id: &UserId,
        external_ref: &str,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ResourceGrantDBResponse>> {
        let grant = sqlx::query_as::<_, ResourceGrantDBResponse>(
            r#"
            INSERT INTO resource_grants (user_id, external_ref, display_name, created_at, updated_at)
            SELECT ?1, ?2, ?3, ?4, ?4
            WHERE EXISTS (
                SELECT 1 FROM licenses
                WHERE user_id = ?1 AND (expires_at IS NULL OR expires_at > ?4)
            )
            ON CONFLICT (user_id) DO UPDATE SET
                external_ref = excluded.external_ref,
                display_name = excluded.display_name,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(external_ref)
        .bind(display_name)
        .bind(now)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(grant)
    }

    /// Remove the mapping, returning what it pointed at so the caller can clean up externally.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn delete(&mut self, user_id: &UserId) -> Result<Option<ResourceGrantDBResponse>> {
        let grant = sqlx::query_as::<_, ResourceGrantDBResponse>("DELETE FROM resource_grants WHERE user_id = ? RETURNING *")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(grant)
    }
}

pub struct BannerSettings<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> BannerSettings<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get(&mut self, user_id: &UserId) -> Result<Option<BannerSettingDBResponse>> {
        let banner = sqlx::query_as::<_, BannerSettingDBResponse>("SELECT * FROM banner_settings WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(banner)
    }

    #[instrument(skip(self, emoji, banner_name), fields(user_id = %user_id), err)]
    pub async fn upsert(
        &mut self,
        user_id: &UserId,
        emoji: &str,
        banner_name: &str,
        now: DateTime<Utc>,
    ) -> Result<BannerSettingDBResponse> {
        let banner = sqlx::query_as::<_, BannerSettingDBResponse>(
            r#"
            INSERT INTO banner_settings (user_id, emoji, banner_name, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                emoji = excluded.emoji,
                banner_name = excluded.banner_name,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(emoji)
        .bind(banner_name)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(banner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{LicenseCodes, Licenses};
    use crate::db::models::licenses::{LicenseKind, LicenseUpsertDBRequest};
    use crate::test_utils::create_test_pool;
    use chrono::Duration;

    async fn license(conn: &mut SqliteConnection, user: &UserId, code: &str, expires_at: Option<DateTime<Utc>>) {
        let kind = if expires_at.is_some() { LicenseKind::Short } else { LicenseKind::Permanent };
        LicenseCodes::new(conn).insert(code, &kind, Utc::now()).await.unwrap();
        Licenses::new(conn)
            .upsert(&LicenseUpsertDBRequest {
                user_id: user.clone(),
                code: code.to_string(),
                kind,
                activated_at: Utc::now(),
                expires_at,
            })
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_grant_upsert_and_delete() {
        let (pool, _dir) = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let user = UserId::from("5001");
        license(&mut conn, &user, "G-1-PERM", None).await;
        let mut repo = ResourceGrants::new(&mut conn);

        let created = repo.upsert_if_licensed(&user, "role-1", "⭐ | Fan", Utc::now()).await.unwrap().unwrap();
        let updated = repo.upsert_if_licensed(&user, "role-1", "🔥 | Fan", Utc::now()).await.unwrap().unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.display_name, "🔥 | Fan");

        let removed = repo.delete(&user).await.unwrap().unwrap();
        assert_eq!(removed.external_ref, "role-1");
        assert!(repo.delete(&user).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_grant_requires_live_license() {
        let (pool, _dir) = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let unlicensed = UserId::from("5003");
        let written = ResourceGrants::new(&mut conn)
            .upsert_if_licensed(&unlicensed, "role-3", "x", now)
            .await
            .unwrap();
        assert!(written.is_none());

        let lapsed = UserId::from("5004");
        license(&mut conn, &lapsed, "G-4-7D", Some(now - Duration::seconds(1))).await;
        let written = ResourceGrants::new(&mut conn)
            .upsert_if_licensed(&lapsed, "role-4", "x", now)
            .await
            .unwrap();
        assert!(written.is_none());

        let active = UserId::from("5005");
        license(&mut conn, &active, "G-5-7D", Some(now + Duration::days(1))).await;
        let written = ResourceGrants::new(&mut conn)
            .upsert_if_licensed(&active, "role-5", "x", now)
            .await
            .unwrap();
        assert_eq!(written.map(|g| g.external_ref).as_deref(), Some("role-5"));

        for user in [&unlicensed, &lapsed] {
            assert!(ResourceGrants::new(&mut conn).get(user).await.unwrap().is_none());
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_banner_upsert_overwrites() {
        let (pool, _dir) = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let user = UserId::from("5002");
        let mut repo = BannerSettings::new(&mut conn);

        repo.upsert(&user, "⭐", "first", Utc::now()).await.unwrap();
        repo.upsert(&user, "🌙", "second", Utc::now()).await.unwrap();

        let banner = repo.get(&user).await.unwrap().unwrap();
        assert_eq!(banner.emoji, "🌙");
        assert_eq!(banner.banner_name, "second");
    }
}
