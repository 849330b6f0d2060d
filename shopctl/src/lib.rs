//! # shopctl: storefront core for a chat-operated shop
//!
//! `shopctl` holds the state of a small virtual-goods storefront run through a chat platform: a
//! single shared stock counter, per-customer balances, purchase orders, bank-transfer top-ups,
//! and time-limited access licenses that gate a per-user resource on the platform.
//!
//! ## Overview
//!
//! The chat binding itself (buttons, modals, slash commands, embeds) is a thin presentation layer
//! that lives elsewhere. It turns each interaction into a [`commands::Command`], hands it to the
//! [`commands::Dispatcher`] and renders the [`commands::Outcome`] or [`errors::Error`] it gets
//! back. Everything that must hold under concurrent use lives here:
//!
//! - **Inventory** ([`inventory`]): one stock counter. Reservations are a single conditional
//!   `UPDATE`, so concurrent buyers can never oversell.
//! - **Orders** ([`orders`]): `requested → queued → fulfilled | canceled`. Queueing and the
//!   reservation commit together.
//! - **Top-ups** ([`topups`]): `waiting → approved | rejected`. Approval and the balance credit
//!   commit together, and a top-up resolves once.
//! - **Licenses** ([`licenses`]): single-use codes activating a short, long or permanent license.
//! - **Grants** ([`grants`]): the platform resource and entitlement an active license holder gets.
//! - **Expiry sweeper** ([`sweeper`]): a background task revoking expired licenses, idempotent
//!   through a per-user cleanup marker.
//!
//! ## Architecture
//!
//! All state is in SQLite, accessed through [`sqlx`] with the repository structs in
//! [`db::handlers`]. Services own a pool and compose repositories inside one transaction per
//! transition. Outbound effects (notifications, platform calls) only run after commit, through
//! [`notifications::Notifier`] and [`grants::GrantProvider`], and their failures are logged,
//! never propagated into the transition.
//!
//! [`AppContext`] is built once at startup and owns one instance of each service. There is no
//! global state.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use clap::Parser;
//! use shopctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     rustls::crypto::aws_lc_rs::default_provider()
//!         .install_default()
//!         .map_err(|_| anyhow::anyhow!("crypto provider already installed"))?;
//!
//!     let args = shopctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     shopctl::telemetry::init_telemetry(config.log_format)?;
//!
//!     let notifier = shopctl::notifications::from_config(&config.notifications)?;
//!     let grants = Arc::new(shopctl::grants::LogGrantProvider);
//!
//!     let app = Application::new(config, notifier, grants).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod accounts;
pub mod commands;
pub mod config;
pub mod db;
pub mod errors;
pub mod grants;
pub mod inventory;
pub mod licenses;
pub mod notifications;
pub mod orders;
pub mod sweeper;
pub mod telemetry;
pub mod topups;
pub mod types;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod test;

use std::future::Future;
use std::sync::Arc;

use bon::bon;
use sqlx::{Executor, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use config::Config;
pub use types::{Actor, OrderId, TopupId, UserId};

use crate::accounts::AccountService;
use crate::grants::{GrantProvider, GrantService};
use crate::inventory::InventoryManager;
use crate::licenses::{CodeSource, LicenseService};
use crate::notifications::{Notifications, Notifier};
use crate::orders::OrderService;
use crate::sweeper::ExpirySweeper;
use crate::topups::TopupService;

/// Get the shopctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Everything a command handler needs, constructed once.
///
/// # Example
///
/// ```ignore
/// let ctx = AppContext::builder()
///     .pool(pool)
///     .config(Arc::new(config))
///     .notifier(notifier)
///     .grants(grant_provider)
///     .codes(Arc::new(RandomCodes))
///     .build();
/// ```
#[derive(Clone)]
pub struct AppContext {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub inventory: InventoryManager,
    pub orders: OrderService,
    pub topups: TopupService,
    pub accounts: AccountService,
    pub licenses: LicenseService,
    pub grants: GrantService,
    pub sweeper: ExpirySweeper,
}

#[bon]
impl AppContext {
    #[builder]
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        notifier: Arc<dyn Notifier>,
        grants: Arc<dyn GrantProvider>,
        codes: Arc<dyn CodeSource>,
    ) -> Self {
        let notifications = Notifications::new(notifier);
        let grant_service = GrantService::new(pool.clone(), config.clone(), grants.clone(), notifications.clone());

        Self {
            inventory: InventoryManager::new(pool.clone()),
            orders: OrderService::new(pool.clone(), config.clone(), notifications.clone()),
            topups: TopupService::new(pool.clone(), config.clone(), notifications.clone()),
            accounts: AccountService::new(pool.clone()),
            licenses: LicenseService::new(pool.clone(), config.clone(), codes, grant_service.clone(), notifications.clone()),
            sweeper: ExpirySweeper::new(pool.clone(), config.sweeper.clone(), grants, notifications),
            grants: grant_service,
            pool,
            config,
        }
    }

    /// Check that the database answers a trivial query.
    pub async fn health_check(&self) -> errors::Result<()> {
        self.pool.execute("SELECT 1").await?;
        Ok(())
    }
}

/// Connect, migrate and build the [`AppContext`] without starting any background task.
pub async fn setup_context(
    config: Config,
    notifier: Arc<dyn Notifier>,
    grants: Arc<dyn GrantProvider>,
) -> anyhow::Result<Arc<AppContext>> {
    let pool = db::connect(&config.database).await?;
    migrator().run(&pool).await?;
    debug!("Database migrations applied");

    let context = AppContext::builder()
        .pool(pool)
        .config(Arc::new(config))
        .notifier(notifier)
        .grants(grants)
        .codes(Arc::new(licenses::RandomCodes))
        .build();

    Ok(Arc::new(context))
}

/// Handles to the tasks running next to the command surface.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(context: &AppContext, shutdown_token: CancellationToken) -> BackgroundServices {
    let mut background_tasks = Vec::new();

    if context.config.sweeper.enabled {
        let sweeper = context.sweeper.clone();
        background_tasks.push(tokio::spawn(sweeper.run(shutdown_token.clone())));
    } else {
        info!("Expiry sweeper disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
    }
}

pub struct Application {
    context: Arc<AppContext>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with the database ready and background services running
    pub async fn new(config: Config, notifier: Arc<dyn Notifier>, grants: Arc<dyn GrantProvider>) -> anyhow::Result<Self> {
        debug!("Starting shopctl with configuration: {:#?}", config);

        let context = setup_context(config, notifier, grants).await?;
        let bg_services = setup_background_services(&context, CancellationToken::new());

        Ok(Self { context, bg_services })
    }

    pub fn context(&self) -> Arc<AppContext> {
        self.context.clone()
    }

    /// Run until `shutdown` resolves, then stop background services and close the pool.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("shopctl running");
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(self) {
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.context.pool.close().await;
    }
}
