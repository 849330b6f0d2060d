//! Repository implementations for database access.
//!
//! Each repository borrows a SQLite connection (`&mut SqliteConnection`), which may be a plain
//! pooled connection or an open transaction. Services compose several repositories inside one
//! transaction when a state transition touches more than one table:
//!
//! ```ignore
//! use shopctl::db::handlers::{Inventory, Orders};
//!
//! async fn example(pool: &sqlx::SqlitePool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     // The guarding write goes first so SQLite takes the write lock up front
//!     let remaining = Inventory::new(&mut tx).try_reserve(6).await?;
//!     if remaining.is_some() {
//!         Orders::new(&mut tx).mark_queued(42, 6, chrono::Utc::now()).await?;
//!     }
//!
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! - [`Users`]: balances, spend and tier
//! - [`Orders`]: order rows and their compare-and-set status transitions
//! - [`Topups`]: top-up rows and resolution
//! - [`Inventory`]: the singleton stock counter and settings row
//! - [`LicenseCodes`], [`Licenses`], [`LicenseCleanups`]: license lifecycle tables
//! - [`ResourceGrants`], [`BannerSettings`]: grant mappings and their naming input

pub mod grants;
pub mod inventory;
pub mod license_codes;
pub mod licenses;
pub mod orders;
pub mod topups;
pub mod users;

pub use grants::{BannerSettings, ResourceGrants};
pub use inventory::Inventory;
pub use license_codes::LicenseCodes;
pub use licenses::{LicenseCleanups, Licenses};
pub use orders::Orders;
pub use topups::Topups;
pub use users::Users;
