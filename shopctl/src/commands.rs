//! Inbound command dispatch.
//!
//! Every call the presentation layer can make is a [`Command`] variant. Handlers are looked up by
//! [`CommandKind`] in a table built once by [`Dispatcher::new`], which refuses to start if any
//! kind is left without a handler.
//!
//! Callers are identified by their [`UserId`] only; whether they may perform an
//! administrator-only transition is decided here from the configured admin list.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AppContext;
use crate::db::models::grants::ResourceGrantDBResponse;
use crate::db::models::licenses::{LicenseCodeDBResponse, LicenseDBResponse, LicenseKind};
use crate::db::models::orders::OrderDBResponse;
use crate::db::models::settings::{SettingsDBResponse, SettingsUpdateDBRequest};
use crate::db::models::topups::TopupDBResponse;
use crate::db::models::users::UserDBResponse;
use crate::errors::{Error, Result};
use crate::inventory::InventoryAdjustment;
use crate::licenses::LicenseStatus;
use crate::sweeper::SweepReport;
use crate::types::{OrderId, TopupId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    OpenOrder {
        user: UserId,
        fulfillment_method: String,
        recipient_handle: String,
    },
    SetOrderQuantity {
        user: UserId,
        quantity: i64,
    },
    FulfillOrder {
        caller: UserId,
        order_id: OrderId,
    },
    CancelOrder {
        caller: UserId,
        order_id: OrderId,
    },
    ListOrders {
        user: UserId,
    },
    RequestTopup {
        user: UserId,
        depositor_name: String,
        amount: i64,
    },
    ResolveTopup {
        caller: UserId,
        topup_id: TopupId,
        approve: bool,
    },
    ListPendingTopups {
        caller: UserId,
    },
    RedeemLicense {
        user: UserId,
        code: String,
    },
    QueryLicense {
        user: UserId,
    },
    ConfigureGrant {
        user: UserId,
        emoji: String,
        name: String,
    },
    AdjustInventory {
        caller: UserId,
        adjustment: InventoryAdjustment,
        value: i64,
    },
    GetSettings,
    UpdateSettings {
        caller: UserId,
        patch: SettingsUpdateDBRequest,
    },
    IssueCodes {
        caller: UserId,
        kind: LicenseKind,
        count: u32,
    },
    GetUser {
        user: UserId,
    },
    Sweep {
        caller: UserId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    OpenOrder,
    SetOrderQuantity,
    FulfillOrder,
    CancelOrder,
    ListOrders,
    RequestTopup,
    ResolveTopup,
    ListPendingTopups,
    RedeemLicense,
    QueryLicense,
    ConfigureGrant,
    AdjustInventory,
    GetSettings,
    UpdateSettings,
    IssueCodes,
    GetUser,
    Sweep,
}

impl CommandKind {
    pub const ALL: [CommandKind; 17] = [
        CommandKind::OpenOrder,
        CommandKind::SetOrderQuantity,
        CommandKind::FulfillOrder,
        CommandKind::CancelOrder,
        CommandKind::ListOrders,
        CommandKind::RequestTopup,
        CommandKind::ResolveTopup,
        CommandKind::ListPendingTopups,
        CommandKind::RedeemLicense,
        CommandKind::QueryLicense,
        CommandKind::ConfigureGrant,
        CommandKind::AdjustInventory,
        CommandKind::GetSettings,
        CommandKind::UpdateSettings,
        CommandKind::IssueCodes,
        CommandKind::GetUser,
        CommandKind::Sweep,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            CommandKind::OpenOrder => "open_order",
            CommandKind::SetOrderQuantity => "set_order_quantity",
            CommandKind::FulfillOrder => "fulfill_order",
            CommandKind::CancelOrder => "cancel_order",
            CommandKind::ListOrders => "list_orders",
            CommandKind::RequestTopup => "request_topup",
            CommandKind::ResolveTopup => "resolve_topup",
            CommandKind::ListPendingTopups => "list_pending_topups",
            CommandKind::RedeemLicense => "redeem_license",
            CommandKind::QueryLicense => "query_license",
            CommandKind::ConfigureGrant => "configure_grant",
            CommandKind::AdjustInventory => "adjust_inventory",
            CommandKind::GetSettings => "get_settings",
            CommandKind::UpdateSettings => "update_settings",
            CommandKind::IssueCodes => "issue_codes",
            CommandKind::GetUser => "get_user",
            CommandKind::Sweep => "sweep",
        }
    }

    /// Resolve a component id from the chat platform. The panel buttons keep their historical
    /// ids (`register`, `setting`, `info`).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(CommandKind::RedeemLicense),
            "setting" => Some(CommandKind::ConfigureGrant),
            "info" => Some(CommandKind::QueryLicense),
            other => CommandKind::ALL.into_iter().find(|kind| kind.tag() == other),
        }
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::OpenOrder { .. } => CommandKind::OpenOrder,
            Command::SetOrderQuantity { .. } => CommandKind::SetOrderQuantity,
            Command::FulfillOrder { .. } => CommandKind::FulfillOrder,
            Command::CancelOrder { .. } => CommandKind::CancelOrder,
            Command::ListOrders { .. } => CommandKind::ListOrders,
            Command::RequestTopup { .. } => CommandKind::RequestTopup,
            Command::ResolveTopup { .. } => CommandKind::ResolveTopup,
            Command::ListPendingTopups { .. } => CommandKind::ListPendingTopups,
            Command::RedeemLicense { .. } => CommandKind::RedeemLicense,
            Command::QueryLicense { .. } => CommandKind::QueryLicense,
            Command::ConfigureGrant { .. } => CommandKind::ConfigureGrant,
            Command::AdjustInventory { .. } => CommandKind::AdjustInventory,
            Command::GetSettings => CommandKind::GetSettings,
            Command::UpdateSettings { .. } => CommandKind::UpdateSettings,
            Command::IssueCodes { .. } => CommandKind::IssueCodes,
            Command::GetUser { .. } => CommandKind::GetUser,
            Command::Sweep { .. } => CommandKind::Sweep,
        }
    }
}

/// What a handled command produced, for the presentation layer to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    OrderOpened(OrderId),
    Order(OrderDBResponse),
    Orders(Vec<OrderDBResponse>),
    TopupRequested(TopupId),
    Topup(TopupDBResponse),
    Topups(Vec<TopupDBResponse>),
    License(LicenseDBResponse),
    LicenseStatus(LicenseStatus),
    Grant(ResourceGrantDBResponse),
    Stock(i64),
    Settings(SettingsDBResponse),
    Codes(Vec<LicenseCodeDBResponse>),
    User(UserDBResponse),
    /// `None` when a sweep was already running
    Sweep(Option<SweepReport>),
}

pub type Handler = fn(Arc<AppContext>, Command) -> BoxFuture<'static, Result<Outcome>>;

static HANDLERS: &[(CommandKind, Handler)] = &[
    (CommandKind::OpenOrder, open_order),
    (CommandKind::SetOrderQuantity, set_order_quantity),
    (CommandKind::FulfillOrder, fulfill_order),
    (CommandKind::CancelOrder, cancel_order),
    (CommandKind::ListOrders, list_orders),
    (CommandKind::RequestTopup, request_topup),
    (CommandKind::ResolveTopup, resolve_topup),
    (CommandKind::ListPendingTopups, list_pending_topups),
    (CommandKind::RedeemLicense, redeem_license),
    (CommandKind::QueryLicense, query_license),
    (CommandKind::ConfigureGrant, configure_grant),
    (CommandKind::AdjustInventory, adjust_inventory),
    (CommandKind::GetSettings, get_settings),
    (CommandKind::UpdateSettings, update_settings),
    (CommandKind::IssueCodes, issue_codes),
    (CommandKind::GetUser, get_user),
    (CommandKind::Sweep, sweep),
];

pub struct Dispatcher {
    handlers: HashMap<CommandKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Result<Self> {
        Self::from_table(HANDLERS)
    }

    fn from_table(table: &[(CommandKind, Handler)]) -> Result<Self> {
        let handlers: HashMap<CommandKind, Handler> = table.iter().copied().collect();

        if let Some(missing) = CommandKind::ALL.into_iter().find(|kind| !handlers.contains_key(kind)) {
            return Err(Error::Internal {
                operation: format!("register handler for `{}`", missing.tag()),
            });
        }

        Ok(Self { handlers })
    }

    pub async fn dispatch(&self, ctx: Arc<AppContext>, command: Command) -> Result<Outcome> {
        let kind = command.kind();
        let handler = self.handlers.get(&kind).ok_or_else(|| Error::Internal {
            operation: format!("dispatch `{}`", kind.tag()),
        })?;

        debug!(command = kind.tag(), "Dispatching command");
        handler(ctx, command).await
    }
}

fn mismatched(expected: CommandKind, command: &Command) -> Error {
    Error::Internal {
        operation: format!("handle `{}` as `{}`", command.kind().tag(), expected.tag()),
    }
}

fn open_order(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::OpenOrder {
            user,
            fulfillment_method,
            recipient_handle,
        } = command
        else {
            return Err(mismatched(CommandKind::OpenOrder, &command));
        };
        let order_id = ctx.orders.open_order(&user, &fulfillment_method, &recipient_handle).await?;
        Ok(Outcome::OrderOpened(order_id))
    }
    .boxed()
}

fn set_order_quantity(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::SetOrderQuantity { user, quantity } = command else {
            return Err(mismatched(CommandKind::SetOrderQuantity, &command));
        };
        Ok(Outcome::Order(ctx.orders.set_order_quantity(&user, quantity).await?))
    }
    .boxed()
}

fn fulfill_order(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::FulfillOrder { caller, order_id } = command else {
            return Err(mismatched(CommandKind::FulfillOrder, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Order(ctx.orders.fulfill_order(order_id, &actor).await?))
    }
    .boxed()
}

fn cancel_order(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::CancelOrder { caller, order_id } = command else {
            return Err(mismatched(CommandKind::CancelOrder, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Order(ctx.orders.cancel_order(order_id, &actor).await?))
    }
    .boxed()
}

fn list_orders(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::ListOrders { user } = command else {
            return Err(mismatched(CommandKind::ListOrders, &command));
        };
        Ok(Outcome::Orders(ctx.orders.list_orders(&user).await?))
    }
    .boxed()
}

fn request_topup(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::RequestTopup {
            user,
            depositor_name,
            amount,
        } = command
        else {
            return Err(mismatched(CommandKind::RequestTopup, &command));
        };
        let topup_id = ctx.topups.request_topup(&user, &depositor_name, amount).await?;
        Ok(Outcome::TopupRequested(topup_id))
    }
    .boxed()
}

fn resolve_topup(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::ResolveTopup {
            caller,
            topup_id,
            approve,
        } = command
        else {
            return Err(mismatched(CommandKind::ResolveTopup, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Topup(ctx.topups.resolve_topup(topup_id, approve, &actor).await?))
    }
    .boxed()
}

fn list_pending_topups(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::ListPendingTopups { caller } = command else {
            return Err(mismatched(CommandKind::ListPendingTopups, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Topups(ctx.topups.list_pending_topups(&actor).await?))
    }
    .boxed()
}

fn redeem_license(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::RedeemLicense { user, code } = command else {
            return Err(mismatched(CommandKind::RedeemLicense, &command));
        };
        Ok(Outcome::License(ctx.licenses.redeem(&user, &code).await?))
    }
    .boxed()
}

fn query_license(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::QueryLicense { user } = command else {
            return Err(mismatched(CommandKind::QueryLicense, &command));
        };
        Ok(Outcome::LicenseStatus(ctx.licenses.query_status(&user).await?))
    }
    .boxed()
}

fn configure_grant(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::ConfigureGrant { user, emoji, name } = command else {
            return Err(mismatched(CommandKind::ConfigureGrant, &command));
        };
        Ok(Outcome::Grant(ctx.grants.configure_grant(&user, &emoji, &name).await?))
    }
    .boxed()
}

fn adjust_inventory(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::AdjustInventory {
            caller,
            adjustment,
            value,
        } = command
        else {
            return Err(mismatched(CommandKind::AdjustInventory, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Stock(ctx.inventory.adjust_inventory(&actor, adjustment, value).await?))
    }
    .boxed()
}

fn get_settings(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::GetSettings = command else {
            return Err(mismatched(CommandKind::GetSettings, &command));
        };
        Ok(Outcome::Settings(ctx.inventory.settings().await?))
    }
    .boxed()
}

fn update_settings(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::UpdateSettings { caller, patch } = command else {
            return Err(mismatched(CommandKind::UpdateSettings, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Settings(ctx.inventory.update_settings(&actor, &patch).await?))
    }
    .boxed()
}

fn issue_codes(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::IssueCodes { caller, kind, count } = command else {
            return Err(mismatched(CommandKind::IssueCodes, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Codes(ctx.licenses.issue_codes(&actor, kind, count).await?))
    }
    .boxed()
}

fn get_user(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::GetUser { user } = command else {
            return Err(mismatched(CommandKind::GetUser, &command));
        };
        Ok(Outcome::User(ctx.accounts.get_user(&user).await?))
    }
    .boxed()
}

fn sweep(ctx: Arc<AppContext>, command: Command) -> BoxFuture<'static, Result<Outcome>> {
    async move {
        let Command::Sweep { caller } = command else {
            return Err(mismatched(CommandKind::Sweep, &command));
        };
        let actor = ctx.config.actor(caller);
        Ok(Outcome::Sweep(ctx.sweeper.sweep_now(&actor).await?))
    }
    .boxed()
}
