use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gastos_server::core::scheduler::start_scheduler;
use gastos_server::core::services::{LegacyImporter, LoginAttemptService, SessionService, UserService};
use gastos_server::core::traits::StorageConfig;
use gastos_server::state::AppState;
use gastos_server::web::WebServer;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 8000, env = "PORT")]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0", env = "BIND_ADDRESS")]
    bind: IpAddr,

    #[arg(short, long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory containing static frontend files (for production)
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// HS256 signing secret. Generated and stored in the database when unset.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Close idle sessions and print session statistics
    CleanupTokens {
        #[arg(long, default_value_t = 60)]
        timeout_minutes: i64,
        /// Also delete session rows older than --days-to-keep
        #[arg(long)]
        delete_old: bool,
        #[arg(long, default_value_t = 7)]
        days_to_keep: i64,
    },
    /// Delete login attempts older than the retention window
    PurgeLoginAttempts {
        /// Defaults to the configured retention
        #[arg(long)]
        days: Option<i64>,
    },
    /// Copy medios de pago and gastos from a legacy database
    ImportLegacy {
        /// postgres://… or sqlite:…
        #[arg(long)]
        url: String,
        /// Target username
        #[arg(long)]
        user: String,
        /// Only import rows owned by this legacy user id
        #[arg(long)]
        source_user: Option<i64>,
    },
    /// Create a staff account
    CreateStaff {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "STAFF_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let state = match args.data_dir.clone() {
        Some(dir) => AppState::with_data_dir(dir, args.jwt_secret.clone()).await,
        None => AppState::new(args.jwt_secret.clone()).await,
    }
    .map_err(|e| anyhow!("Failed to init state: {}", e))?;

    let file_appender = tracing_appender::rolling::daily(state.storage.logs_dir(), "gastos-server.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let state = Arc::new(state);
    let now = Utc::now().timestamp();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            start_scheduler(state.clone());
            let addr = SocketAddr::new(args.bind, args.port);
            WebServer::new(state, addr, args.static_dir)
                .run()
                .await
                .map_err(|e| anyhow!("{}", e))?;
        }
        Command::CleanupTokens {
            timeout_minutes,
            delete_old,
            days_to_keep,
        } => {
            let pool = &state.db_pool;
            let idle = SessionService::mark_idle(pool, timeout_minutes, now).await?;
            println!("Marked {} sessions inactive (idle > {} min)", idle, timeout_minutes);
            if delete_old {
                let deleted = SessionService::delete_older_than(pool, days_to_keep.saturating_mul(86400), now).await?;
                println!("Deleted {} sessions older than {} days", deleted, days_to_keep);
            }
            let stats = SessionService::stats(pool).await?;
            println!("Sessions: {} total, {} active, {} inactive", stats.total, stats.active, stats.inactive);
            for (username, active) in &stats.top_users {
                println!("  {}: {} active", username, active);
            }
        }
        Command::PurgeLoginAttempts { days } => {
            let days = match days {
                Some(days) => days,
                None => state.config.read().await.login_retention_days,
            };
            let deleted = LoginAttemptService::purge(&state.db_pool, days, now).await?;
            println!("Deleted {} login attempts older than {} days", deleted, days);
        }
        Command::ImportLegacy {
            url,
            user,
            source_user,
        } => {
            let target = UserService::find_by_username(&state.db_pool, &user)
                .await?
                .with_context(|| format!("User {} does not exist", user))?;
            let data = LegacyImporter::read_url(&url, source_user).await?;
            let report = LegacyImporter::import(&state.db_pool, target.id, &data).await?;
            state.invalidate_gastos(target.id);
            println!(
                "Imported {} medios de pago and {} gastos into {} ({} skipped)",
                report.medios_pago, report.gastos, user, report.skipped
            );
        }
        Command::CreateStaff {
            username,
            email,
            password,
        } => {
            let user = UserService::create_staff(&state.db_pool, &username, &email, &password).await?;
            println!("Created staff user {} (id {})", user.username, user.id);
        }
    }

    Ok(())
}
