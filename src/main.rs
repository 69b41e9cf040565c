use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use planner_notify::config::DEFAULT_SNAPSHOT_LIMIT;
use planner_notify::dispatch::{EffectDispatcher, LogDesktopNotifier, TerminalBell, TerminalToast};
use planner_notify::notifications::{LocalSettingsProvider, NotificationStatus};
use planner_notify::{
    metrics, AppConfig, CliConfig, FileConfig, HttpNotificationApi, Identity, LifecycleBinder,
    NotificationApi, NotificationStore, StompTransport,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(name = "notify-client", about = "Planner notification client")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Base URL of the notification REST API (e.g. http://localhost:8080/api).
    #[clap(long)]
    pub api_url: Option<String>,

    /// WebSocket URL of the push endpoint (e.g. ws://localhost:8080/ws).
    #[clap(long)]
    pub ws_url: Option<String>,

    /// Id of the authenticated user.
    #[clap(long)]
    pub user_id: Option<String>,

    /// Bearer token of the authenticated user.
    #[clap(long)]
    pub token: Option<String>,

    /// Maximum number of notifications fetched per snapshot.
    #[clap(long, default_value_t = DEFAULT_SNAPSHOT_LIMIT)]
    pub limit: usize,

    /// Timeout in seconds for REST requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Print Prometheus metrics on exit.
    #[clap(long)]
    pub print_metrics: bool,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Stay connected and print notifications as they arrive (default).
    Watch,
    /// Print the current notification snapshot.
    List,
    /// Mark one notification as read.
    Read { id: String },
    /// Mark every notification as read.
    ReadAll,
    /// Delete one notification.
    Delete { id: String },
    /// Delete every notification.
    DeleteAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    metrics::init_metrics();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        api_base_url: cli_args.api_url.clone(),
        ws_url: cli_args.ws_url.clone(),
        user_id: cli_args.user_id.clone(),
        token: cli_args.token.clone(),
        snapshot_limit: cli_args.limit,
        request_timeout_sec: cli_args.request_timeout_sec,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    let identity = config
        .identity
        .clone()
        .context("user_id and token must be configured")?;

    let api = Arc::new(HttpNotificationApi::new(
        config.api_base_url.clone(),
        config.request_timeout,
    )?);
    let settings = Arc::new(LocalSettingsProvider::new(config.delivery));
    let desktop = Arc::new(LogDesktopNotifier::new(true));
    let dispatcher = Arc::new(EffectDispatcher::new(
        Arc::new(TerminalToast),
        desktop.clone(),
        Arc::new(TerminalBell),
        settings.clone(),
    ));
    let store = Arc::new(
        NotificationStore::new(api.clone(), dispatcher, settings)
            .with_snapshot_limit(config.snapshot_limit)
            .with_delete_policy(config.delete_failure_policy),
    );

    let command = cli_args.command.clone().unwrap_or(Command::Watch);
    if !matches!(command, Command::Watch) {
        api.set_identity(Some(&identity));
        store.bind_owner(&identity.user_id).await;
    }

    match command {
        Command::Watch => {
            let transport = Arc::new(StompTransport::new(
                config.ws_url.clone(),
                &config.connection,
            ));
            let binder = LifecycleBinder::new(
                store.clone(),
                api.clone(),
                transport,
                config.connection.clone(),
            )
            .with_desktop_notifier(desktop);
            watch(&binder, identity).await?;
        }
        Command::List => {
            store.load_snapshot().await?;
            let view = store.view();
            for record in &view.notifications {
                let marker = match record.status {
                    NotificationStatus::Sent => "*",
                    NotificationStatus::Read => " ",
                };
                println!(
                    "{} {}  {}  {:<18}  {}",
                    marker,
                    record.id,
                    record.sent_at.to_rfc3339(),
                    record.notification_type,
                    record.title
                );
            }
            println!("{} unread of {}", view.unread_count, view.notifications.len());
        }
        Command::Read { id } => {
            store.mark_as_read(&id).await?;
            println!("Marked {} as read", id);
        }
        Command::ReadAll => {
            store.mark_all_as_read().await?;
            println!("Marked all notifications as read");
        }
        Command::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted {}", id);
        }
        Command::DeleteAll => {
            store.delete_all().await?;
            println!("Deleted all notifications");
        }
    }

    if cli_args.print_metrics {
        print!("{}", metrics::render());
    }

    Ok(())
}

/// Run until Ctrl-C, logging unread count and connectivity changes.
async fn watch(binder: &LifecycleBinder, identity: Identity) -> Result<()> {
    let mut views = binder.store().subscribe();
    let reporter = tokio::spawn(async move {
        let mut last = None;
        while views.changed().await.is_ok() {
            let current = {
                let view = views.borrow_and_update();
                (view.unread_count, view.connected)
            };
            if last != Some(current) {
                info!("Unread: {}, connected: {}", current.0, current.1);
                last = Some(current);
            }
        }
    });

    binder.set_identity(Some(identity)).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");

    binder.shutdown().await;
    reporter.abort();
    Ok(())
}
