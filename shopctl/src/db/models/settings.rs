//! Database models for the singleton settings row.
//!
//! Only `total_stock` carries business rules (see [`crate::inventory`]); everything else is
//! storefront configuration that the core stores and returns verbatim.

use serde::{Deserialize, Serialize};

/// Fixed primary key of the singleton row
pub const SETTINGS_ID: i64 = 1;

/// Database response for the settings row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SettingsDBResponse {
    pub total_stock: i64,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub panel_channel_id: Option<String>,
    pub panel_message_id: Option<String>,
    pub secure_channel_id: Option<String>,
    pub review_webhook_url: Option<String>,
    pub buylog_webhook_url: Option<String>,
}

/// Partial update of the pass-through fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdateDBRequest {
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub panel_channel_id: Option<String>,
    pub panel_message_id: Option<String>,
    pub secure_channel_id: Option<String>,
    pub review_webhook_url: Option<String>,
    pub buylog_webhook_url: Option<String>,
}
