//! Shared fixtures for unit and scenario tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::AppContext;
use crate::config::{Config, DatabaseConfig, LicenseConfig, NotificationConfig, OrderConfig, SweeperConfig};
use crate::db::models::licenses::LicenseKind;
use crate::grants::GrantProvider;
use crate::licenses::CodeSource;
use crate::notifications::{Event, Notifier, Target};
use crate::types::{Actor, UserId};

/// What `main` does at startup. Tests share a process, so only the first call installs.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Migrated pool on a fresh file database. Keep the directory alive for the test's duration.
pub async fn create_test_pool() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("shop.db").display()),
        ..Default::default()
    };

    let pool = crate::db::connect(&config).await.expect("Failed to open test database");
    crate::migrator().run(&pool).await.expect("Failed to run migrations");

    (pool, dir)
}

pub fn create_test_config() -> Config {
    Config {
        admins: vec![UserId::from("admin")],
        licenses: LicenseConfig {
            unit: Duration::from_secs(24 * 60 * 60),
            max_generation_attempts: 5,
            ..Default::default()
        },
        sweeper: SweeperConfig {
            enabled: false,
            ..Default::default()
        },
        orders: OrderConfig { unit_price: 1000 },
        notifications: NotificationConfig {
            fulfillment_channel: Some("fulfillment".to_string()),
            topup_channel: Some("topups".to_string()),
            announce_channel: Some("announcements".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Notifier that records every attempt and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Target, Event)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail_all(true);
        notifier
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Target, Event)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.sent().into_iter().map(|(_, event)| event).collect()
    }

    fn record(&self, target: Target, event: &Event) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((target, event.clone()));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notification gateway unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user: &UserId, event: &Event) -> anyhow::Result<()> {
        self.record(Target::User(user.clone()), event)
    }

    async fn notify_channel(&self, channel: &str, event: &Event) -> anyhow::Result<()> {
        self.record(Target::Channel(channel.to_string()), event)
    }
}

/// Grant provider that records calls. Resources are named `res-{user}`.
#[derive(Default)]
pub struct RecordingGrantProvider {
    provisioned: Mutex<Vec<(UserId, Option<String>, String)>>,
    entitled: Mutex<Vec<UserId>>,
    revoked: Mutex<Vec<UserId>>,
    deleted: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingGrantProvider {
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(user, existing_ref, display_name)` per provision call
    pub fn provisioned(&self) -> Vec<(UserId, Option<String>, String)> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn entitled(&self) -> Vec<UserId> {
        self.entitled.lock().unwrap().clone()
    }

    pub fn revoked(&self) -> Vec<UserId> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("chat platform unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl GrantProvider for RecordingGrantProvider {
    async fn provision(&self, user: &UserId, existing_ref: Option<&str>, display_name: &str) -> anyhow::Result<String> {
        self.check()?;
        self.provisioned.lock().unwrap().push((
            user.clone(),
            existing_ref.map(str::to_string),
            display_name.to_string(),
        ));
        Ok(existing_ref.map(str::to_string).unwrap_or_else(|| format!("res-{user}")))
    }

    async fn assign_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
        self.check()?;
        self.entitled.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn revoke_entitlement(&self, user: &UserId) -> anyhow::Result<()> {
        self.check()?;
        self.revoked.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn delete_resource(&self, external_ref: &str) -> anyhow::Result<()> {
        self.check()?;
        self.deleted.lock().unwrap().push(external_ref.to_string());
        Ok(())
    }
}

/// Hands out the given codes in order, repeating the last one once exhausted.
pub struct FixedCodes {
    codes: Mutex<VecDeque<String>>,
}

impl FixedCodes {
    pub fn new<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            codes: Mutex::new(codes.into_iter().map(str::to_string).collect()),
        }
    }
}

impl CodeSource for FixedCodes {
    fn generate(&self, _prefix: &str, _kind: &LicenseKind) -> String {
        let mut codes = self.codes.lock().unwrap();
        if codes.len() > 1 {
            codes.pop_front().unwrap()
        } else {
            codes.front().cloned().unwrap_or_else(|| "FIXED".to_string())
        }
    }
}

pub struct TestContext {
    pub app: Arc<AppContext>,
    pub notifier: Arc<RecordingNotifier>,
    pub grants: Arc<RecordingGrantProvider>,
    _dir: TempDir,
}

impl TestContext {
    /// An actor on the test config's admin list
    pub fn admin(&self) -> Actor {
        Actor::admin("admin")
    }

    pub fn member(&self, id: &str) -> Actor {
        Actor::member(id)
    }
}

pub async fn create_test_context() -> TestContext {
    create_test_context_with_codes(Arc::new(crate::licenses::RandomCodes)).await
}

pub async fn create_test_context_with_codes(codes: Arc<dyn CodeSource>) -> TestContext {
    let (pool, dir) = create_test_pool().await;
    let notifier = Arc::new(RecordingNotifier::default());
    let grants = Arc::new(RecordingGrantProvider::default());

    let app = AppContext::builder()
        .pool(pool)
        .config(Arc::new(create_test_config()))
        .notifier(notifier.clone())
        .grants(grants.clone())
        .codes(codes)
        .build();

    TestContext {
        app: Arc::new(app),
        notifier,
        grants,
        _dir: dir,
    }
}
