//! Database models for balance top-ups.

use crate::types::{TopupId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-up status stored as TEXT in database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TopupStatus {
    Waiting,
    Approved,
    Rejected,
}

/// Database request for a new top-up
#[derive(Debug, Clone)]
pub struct TopupCreateDBRequest {
    pub user_id: UserId,
    pub depositor_name: String,
    pub amount: i64,
}

/// Database response for a top-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopupDBResponse {
    pub id: TopupId,
    pub user_id: UserId,
    pub depositor_name: String,
    pub amount: i64,
    pub status: TopupStatus,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
