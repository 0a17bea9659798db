//! PIGGYBANK: recurring buy-or-withdraw agent for Kraken accounts.
//!
//! Entry point. Initialises structured logging, loads configuration, opens
//! the bookkeeping database, and runs the balance→buy/withdraw loop until the
//! process is stopped.

use anyhow::Result;
use secrecy::SecretString;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use piggybank::config::{self, AppConfig};
use piggybank::engine::scheduler::{ManagedAccount, Scheduler};
use piggybank::exchange::kraken::KrakenClient;
use piggybank::exchange::Exchange;
use piggybank::notify::smtp::SmtpMailer;
use piggybank::notify::Notifier;
use piggybank::storage::BookkeepingStore;

const BANNER: &str = r#"
 ____  _                   ____              _
|  _ \(_) __ _  __ _ _   _| __ )  __ _ _ __ | | __
| |_) | |/ _` |/ _` | | | |  _ \ / _` | '_ \| |/ /
|  __/| | (_| | (_| | |_| | |_) | (_| | | | |   <
|_|   |_|\__, |\__, |\__, |____/ \__,_|_| |_|_|\_\
         |___/ |___/ |___/
  Recurring buy & withdraw agent  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let _log_guard = init_logging();
    println!("{BANNER}");

    // -- Configuration (fatal on any error) -------------------------------

    let config_path = std::env::var("PIGGYBANK_CONFIG")
        .unwrap_or_else(|_| config::DEFAULT_CONFIG_FILE.to_string());
    let cfg = AppConfig::load(&config_path)?;

    info!(
        agent_name = %cfg.agent.name,
        accounts = cfg.accounts.len(),
        sleep_time_hours = cfg.agent.sleep_time_hours,
        pair = %cfg.market.pair,
        "PIGGYBANK starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = BookkeepingStore::open(&cfg.database.path).await?;

    // The SMTP password is only required if someone wants emails.
    let smtp_password = if cfg.accounts.iter().any(|a| a.send_notification_email) {
        AppConfig::resolve_env(&cfg.smtp.password_env)?
    } else {
        String::new()
    };
    let mailer = SmtpMailer::new(&cfg.smtp, SecretString::new(smtp_password))?;
    let notifier = Notifier::new(
        cfg.notifications.template_path.clone(),
        cfg.smtp.from_header(),
        Box::new(mailer),
    );

    let mut accounts = Vec::with_capacity(cfg.accounts.len());
    for account in &cfg.accounts {
        let client = KrakenClient::new(account.credentials()?, cfg.market.clone())?;
        info!(
            account_id = account.id,
            account = %account.description,
            exchange = client.name(),
            "Account loaded"
        );
        accounts.push(ManagedAccount {
            config: account.clone(),
            exchange: Box::new(client),
        });
    }

    let mut scheduler = Scheduler::new(&cfg, accounts, store, notifier);

    // -- Main loop -------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    info!("PIGGYBANK shut down.");
    Ok(())
}

/// Initialise the `tracing` subscriber: console plus a daily log file.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging() -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter, Layer};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("piggybank=info"));

    let log_dir = std::env::var("PIGGYBANK_LOG_DIR").unwrap_or_else(|_| "logs".to_string());

    // `rolling::daily` panics if it cannot create its file, so check first.
    let writable = std::fs::create_dir_all(&log_dir).is_ok() && {
        let test_file = std::path::Path::new(&log_dir).join(".piggybank_write_test");
        let ok = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_file)
            .is_ok();
        let _ = std::fs::remove_file(&test_file);
        ok
    };

    let (file_layer, guard) = if writable {
        let appender = tracing_appender::rolling::daily(&log_dir, "piggybank.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        eprintln!("Warning: cannot write to log directory {log_dir}, file logging disabled");
        (None, None)
    };

    let json_logging = std::env::var("PIGGYBANK_LOG_JSON").is_ok();
    let console_layer = if json_logging {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
