//! Database record models matching table schemas.
//!
//! Each model corresponds to a table in `migrations/`. Repositories in
//! [`crate::db::handlers`] return these types; services hand them to the presentation layer
//! unchanged, since there is no separate API representation.
//!
//! - [`users`]: customer balances and tiers
//! - [`orders`]: purchase requests and their status
//! - [`topups`]: manually attested balance top-ups
//! - [`settings`]: the singleton stock counter and pass-through configuration
//! - [`licenses`]: redemption codes, active licenses and cleanup markers
//! - [`grants`]: externally provisioned resources tied to a license holder

pub mod grants;
pub mod licenses;
pub mod orders;
pub mod settings;
pub mod topups;
pub mod users;
