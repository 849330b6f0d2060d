//! Database models for resource grants and the banner settings that name them.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mapping from a license holder to the external resource provisioned for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResourceGrantDBResponse {
    pub user_id: UserId,
    pub external_ref: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The emoji and name a holder chose for their resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BannerSettingDBResponse {
    pub user_id: UserId,
    pub emoji: String,
    pub banner_name: String,
    pub updated_at: DateTime<Utc>,
}
