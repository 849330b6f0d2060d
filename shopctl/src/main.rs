use std::sync::Arc;

use clap::Parser;
use shopctl::config::{Args, StockAction, Task};
use shopctl::grants::{GrantProvider, LogGrantProvider};
use shopctl::inventory::InventoryAdjustment;
use shopctl::{Actor, AppContext, Application, Config, notifications, telemetry};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.log_format)?;
    tracing::debug!("{:?}", args);

    let notifier = notifications::from_config(&config.notifications)?;
    // The chat-platform adapter registers its own provider; standalone runs only log
    let grants: Arc<dyn GrantProvider> = Arc::new(LogGrantProvider);

    match args.task.clone().unwrap_or(Task::Serve) {
        Task::Serve => {
            let shutdown = shutdown_signal();
            Application::new(config, notifier, grants).await?.serve(shutdown).await
        }
        task => {
            let context = shopctl::setup_context(config, notifier, grants).await?;
            let result = run_task(task, &context).await;
            context.pool.close().await;
            result
        }
    }
}

/// One-shot operator tasks, run with full administrator rights.
async fn run_task(task: Task, context: &AppContext) -> anyhow::Result<()> {
    let operator = Actor::system();

    match task {
        Task::Serve => anyhow::bail!("serve is not a one-shot task"),
        Task::IssueCode { kind, count } => {
            for code in context.licenses.issue_codes(&operator, kind, count).await? {
                println!("{}", code.code);
            }
        }
        Task::Sweep => match context.sweeper.sweep_now(&operator).await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("A sweep is already running."),
        },
        Task::Stock { action } => {
            let stock = match action {
                StockAction::Show => context.inventory.stock().await?,
                StockAction::Set { value } => {
                    context
                        .inventory
                        .adjust_inventory(&operator, InventoryAdjustment::Set, value)
                        .await?
                }
                StockAction::Inc { value } => {
                    context
                        .inventory
                        .adjust_inventory(&operator, InventoryAdjustment::Increment, value)
                        .await?
                }
                StockAction::Dec { value } => {
                    context
                        .inventory
                        .adjust_inventory(&operator, InventoryAdjustment::Decrement, value)
                        .await?
                }
            };
            println!("{stock}");
        }
        Task::Health => {
            context.health_check().await?;
            println!("ok");
        }
    }

    Ok(())
}
