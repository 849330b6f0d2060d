//! Common type definitions shared by the storage layer and the services.
//!
//! # ID Types
//!
//! - [`UserId`]: opaque external identity handed to us by the chat platform. Never parsed,
//!   only compared and stored.
//! - [`OrderId`], [`TopupId`]: database sequences.
//!
//! # Actors
//!
//! Administrator-only transitions take an [`Actor`], which pairs the calling user's id with
//! whether the configured admin list contains it. The presentation layer never decides that on
//! its own; [`crate::config::Config::actor`] does.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub type OrderId = i64;
pub type TopupId = i64;

/// Opaque external user identity (a chat-platform snowflake in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Snowflakes show up as bare integers in YAML and env overrides, so accept either form
impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(id) => UserId(id),
            Repr::Number(id) => UserId(id.to_string()),
        })
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// The caller of an administrator-gated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn admin(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            is_admin: true,
        }
    }

    pub fn member(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    /// The local operator running the CLI, who has database access anyway.
    pub fn system() -> Self {
        Self::admin("system")
    }

    pub fn ensure_admin(&self, action: Operation) -> crate::errors::Result<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(crate::errors::Error::NotAuthorized { action })
        }
    }
}

// Operations gated by the admin list, used for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResolveTopup,
    FulfillOrder,
    CancelOrder,
    AdjustInventory,
    IssueCode,
    UpdateSettings,
    Sweep,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ResolveTopup => write!(f, "resolve top-up"),
            Operation::FulfillOrder => write!(f, "fulfill order"),
            Operation::CancelOrder => write!(f, "cancel order"),
            Operation::AdjustInventory => write!(f, "adjust inventory"),
            Operation::IssueCode => write!(f, "issue license code"),
            Operation::UpdateSettings => write!(f, "update settings"),
            Operation::Sweep => write!(f, "run expiry sweep"),
        }
    }
}
