use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use jobpulse_client::feed::NotificationsApi;
use jobpulse_client::session::AuthApi;
use jobpulse_client::{
    ClientConfig, FileStore, LogoutReason, NotificationFeed, RestClient, SessionEvent,
    SessionManager, SessionStore,
};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "jobpulse", about = "JobPulse job-search API client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in by exchanging a Google identity token
    GoogleLogin {
        #[arg(long)]
        token: String,
    },
    /// Create an account and log in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// End the current session
    Logout,
    /// Show the current session
    Status,
    /// Notification operations
    #[command(subcommand)]
    Notifications(NotificationsCommand),
    /// Keep the session alive in the foreground, reporting transitions
    Watch,
}

#[derive(Subcommand)]
enum NotificationsCommand {
    /// List notifications, newest first
    List {
        /// How many pages to fetch
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Show the unread count
    Unread,
    /// Mark one notification as read
    MarkRead { id: u64 },
    /// Mark every notification as read
    MarkAllRead,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("jobpulse_client=info,jobpulse=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load()?;

    let store: Arc<dyn SessionStore> = Arc::new(FileStore::new(config.storage_path.clone()));
    let client = Arc::new(RestClient::new(
        config.api_base_url.clone(),
        config.request_timeout(),
        Arc::clone(&store),
    )?);

    let session = Arc::new(SessionManager::new(
        Arc::clone(&client) as Arc<dyn AuthApi>,
        store,
        config.session_ttl(),
    ));
    session.restore().await;

    match cli.command {
        Command::Login { email, password } => {
            session.login_with_credentials(&email, &password).await?;
            println!("Logged in as {}", display_user(&session));
        }
        Command::GoogleLogin { token } => {
            session.federated_login(&token).await?;
            println!("Logged in as {}", display_user(&session));
        }
        Command::Register { email, password } => {
            session.register(&email, &password).await?;
            println!("Registered and logged in as {}", display_user(&session));
        }
        Command::Logout => {
            session.logout(LogoutReason::Manual).await;
            println!("Logged out");
        }
        Command::Status => {
            if session.is_authenticated() {
                println!("Authenticated as {}", display_user(&session));
                if let Some(expires_at) = session.expires_at() {
                    println!("Session expires at {}", format_expiry(expires_at));
                }
            } else {
                println!("Not authenticated");
            }
        }
        Command::Notifications(command) => {
            anyhow::ensure!(
                session.is_authenticated(),
                "Not authenticated. Run `jobpulse login` first."
            );
            run_notifications(command, &client, &config).await?;
        }
        Command::Watch => {
            anyhow::ensure!(
                session.is_authenticated(),
                "Not authenticated. Run `jobpulse login` first."
            );
            watch(&session, &client, &config).await?;
        }
    }

    Ok(())
}

async fn run_notifications(
    command: NotificationsCommand,
    client: &Arc<RestClient>,
    config: &ClientConfig,
) -> Result<()> {
    match command {
        NotificationsCommand::List { pages } => {
            let feed = NotificationFeed::new(Arc::clone(client) as Arc<dyn NotificationsApi>, config.page_limit);
            feed.initial_load().await?;
            for _ in 1..pages {
                if !feed.load_more().await? {
                    break;
                }
            }
            for n in feed.notifications() {
                let marker = if n.is_read { " " } else { "*" };
                println!(
                    "{} [{}] {:?} {}: {}",
                    marker, n.id, n.notification_type, n.title, n.message
                );
            }
            println!("{} unread", feed.unread_count());
        }
        NotificationsCommand::Unread => {
            let count = client.unread_count().await?;
            println!("{} unread", count);
        }
        NotificationsCommand::MarkRead { id } => {
            client
                .mark_read(id)
                .await
                .with_context(|| format!("Failed to mark notification {} as read", id))?;
            println!("Marked {} as read", id);
        }
        NotificationsCommand::MarkAllRead => {
            client
                .mark_all_read()
                .await
                .context("Failed to mark all notifications as read")?;
            println!("Marked all as read");
        }
    }
    Ok(())
}

/// Foreground mode: arms the expiry check and unread-count resync and
/// reports session transitions until interrupted or logged out.
async fn watch(
    session: &Arc<SessionManager>,
    client: &Arc<RestClient>,
    config: &ClientConfig,
) -> Result<()> {
    let feed = Arc::new(NotificationFeed::new(
        Arc::clone(client) as Arc<dyn NotificationsApi>,
        config.page_limit,
    ));
    feed.initial_load().await?;
    println!("{} unread notifications", feed.unread_count());

    let mut events = session.subscribe();
    let _expiry = session.spawn_expiry_check(config.expiry_check_interval());
    let _resync = feed.spawn_unread_resync(session, config.unread_poll_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::LoggedOut(reason)) => {
                        feed.clear();
                        println!("Session ended: {:?}", reason);
                        break;
                    }
                    Ok(SessionEvent::LoggedIn) => {}
                    Err(_) => break,
                }
            }
        }
    }
    Ok(())
}

fn display_user(session: &SessionManager) -> String {
    session
        .user()
        .and_then(|u| u.get("email").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| "unknown user".to_string())
}

fn format_expiry(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| epoch_ms.to_string())
}
