//! Top-up state machine.
//!
//! ```text
//! waiting ──(admin)──> approved | rejected
//! ```
//!
//! A buyer attests a bank transfer; an administrator checks it by hand and resolves the request.
//! Approval credits the balance in the same transaction as the status change, and a request can
//! only leave `waiting` once.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::handlers::{Topups, Users};
use crate::db::models::topups::{TopupCreateDBRequest, TopupDBResponse, TopupStatus};
use crate::errors::{Error, Result};
use crate::notifications::{Event, Notifications};
use crate::types::{Actor, Operation, TopupId, UserId};

#[derive(Clone)]
pub struct TopupService {
    pool: SqlitePool,
    config: Arc<Config>,
    notifications: Notifications,
}

impl TopupService {
    pub fn new(pool: SqlitePool, config: Arc<Config>, notifications: Notifications) -> Self {
        Self {
            pool,
            config,
            notifications,
        }
    }

    #[instrument(skip(self, depositor_name), fields(user_id = %user), err)]
    pub async fn request_topup(&self, user: &UserId, depositor_name: &str, amount: i64) -> Result<TopupId> {
        if amount <= 0 {
            return Err(Error::InvalidAmount { amount });
        }
        let depositor_name = depositor_name.trim();
        if depositor_name.is_empty() {
            return Err(Error::InvalidInput {
                message: "Depositor name is required".to_string(),
            });
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Users::new(&mut tx).ensure(user, self.config.default_tier(), now).await?;
        let topup = Topups::new(&mut tx)
            .create(
                &TopupCreateDBRequest {
                    user_id: user.clone(),
                    depositor_name: depositor_name.to_string(),
                    amount,
                },
                now,
            )
            .await?;
        tx.commit().await?;

        info!(topup_id = topup.id, amount, "Top-up requested");

        self.notifications
            .channel(
                self.config.notifications.topup_channel.as_deref(),
                Event::TopupRequested {
                    topup_id: topup.id,
                    user_id: user.clone(),
                    depositor_name: topup.depositor_name.clone(),
                    amount,
                },
            )
            .await;

        Ok(topup.id)
    }

    /// Approve or reject a waiting top-up. Approval credits the requester's balance atomically
    /// with the status change.
    #[instrument(skip(self), fields(actor = %actor.id), err)]
    pub async fn resolve_topup(&self, topup_id: TopupId, approve: bool, actor: &Actor) -> Result<TopupDBResponse> {
        actor.ensure_admin(Operation::ResolveTopup)?;

        let status = if approve {
            TopupStatus::Approved
        } else {
            TopupStatus::Rejected
        };

        let mut tx = self.pool.begin().await?;

        let Some(topup) = Topups::new(&mut tx).resolve(topup_id, status, &actor.id, Utc::now()).await? else {
            let existing = Topups::new(&mut tx).get_by_id(topup_id).await?;
            tx.rollback().await?;
            return Err(match existing {
                Some(_) => Error::AlreadyResolved,
                None => Error::not_found("Top-up", topup_id),
            });
        };

        let mut users = Users::new(&mut tx);
        let balance = if approve {
            let Some(user) = users.credit(&topup.user_id, topup.amount).await? else {
                tx.rollback().await?;
                warn!(topup_id, amount = topup.amount, "Balance would overflow, top-up left pending");
                return Err(Error::InvalidAmount { amount: topup.amount });
            };
            user.balance
        } else {
            users.get_by_id(&topup.user_id).await?.map(|u| u.balance).unwrap_or_default()
        };

        tx.commit().await?;
        info!(topup_id, approved = approve, amount = topup.amount, balance, "Top-up resolved");

        self.notifications
            .user(
                &topup.user_id,
                Event::TopupResolved {
                    topup_id,
                    amount: topup.amount,
                    approved: approve,
                    balance,
                },
            )
            .await;

        Ok(topup)
    }

    pub async fn list_pending_topups(&self, actor: &Actor) -> Result<Vec<TopupDBResponse>> {
        actor.ensure_admin(Operation::ResolveTopup)?;

        let mut conn = self.pool.acquire().await?;
        Ok(Topups::new(&mut conn).list_by_status(TopupStatus::Waiting).await?)
    }
}
