//! Customer accounts: balance, total spend and tier.
//!
//! Accounts are created lazily by the first order or top-up and are never deleted. Balances
//! only move inside the order and top-up transactions; this module just reads them.

use sqlx::SqlitePool;

use crate::db::handlers::Users;
use crate::db::models::users::UserDBResponse;
use crate::errors::{Error, Result};
use crate::types::UserId;

#[derive(Clone)]
pub struct AccountService {
    pool: SqlitePool,
}

impl AccountService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_user(&self, user: &UserId) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn)
            .get_by_id(user)
            .await?
            .ok_or_else(|| Error::not_found("User", user))
    }
}
