//! COPYTRADE — Multi-User Automated Binary Options Trading Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the store and the surface factory, and drives the trading core
//! from a line-based operator console with graceful shutdown.
//!
//! Signal ingestion over the network belongs to the embedding service;
//! the console exposes the same operations for standalone runs.

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use copytrade::config::AppConfig;
use copytrade::engine::{PlacementProtocol, TradingEngine};
use copytrade::notify::{ChannelSink, EventSink};
use copytrade::session::SessionPool;
use copytrade::staking;
use copytrade::store::{SqliteStore, TradeSink, UserStore};
use copytrade::surface::{ChromiumFactory, ScriptedFactory, SurfaceFactory};
use copytrade::types::{Direction, Outcome, Signal, SignalResult, UserRecord};

const BANNER: &str = r#"
  ____ ___  ____  __   _______ ____      _    ____  _____
 / ___/ _ \|  _ \ \ \ / /_   _|  _ \    / \  |  _ \| ____|
| |  | | | | |_) | \ V /  | | | |_) |  / _ \ | | | |  _|
| |__| |_| |  __/   | |   | | |  _ <  / ___ \| |_| | |___
 \____\___/|_|      |_|   |_| |_| \_\/_/   \_\____/|_____|

  Multi-User Automated Binary Options Trading Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML; defaults cover a missing file
    let cfg = match AppConfig::load("config.toml") {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config.toml not loaded ({e:#}) — using built-in defaults");
            AppConfig::default()
        }
    };

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        driver = %cfg.pool.driver,
        max_sessions = cfg.pool.max_sessions,
        database_url = %cfg.storage.database_url,
        "COPYTRADE starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);

    let factory: Arc<dyn SurfaceFactory> = match cfg.pool.driver.as_str() {
        "chromium" => Arc::new(ChromiumFactory::new(&cfg.pool)),
        "scripted" => {
            warn!("Scripted surface driver selected — paper mode, no real browser");
            Arc::new(ScriptedFactory::new())
        }
        other => {
            warn!(driver = other, "Unknown surface driver, defaulting to chromium");
            Arc::new(ChromiumFactory::new(&cfg.pool))
        }
    };

    // Notification fan-in: without a transport layer the consumer just
    // logs each event as its JSON payload.
    let (sink, mut notifications) = ChannelSink::new(cfg.notifications.channel_capacity);
    let events: Arc<dyn EventSink> = Arc::new(sink);
    tokio::spawn(async move {
        while let Some(event) = notifications.recv().await {
            info!(
                owner_id = %event.owner_id,
                event = event.notification.name(),
                payload = %serde_json::to_string(&event).unwrap_or_default(),
                "Notification"
            );
        }
    });

    let pool = Arc::new(SessionPool::new(
        factory,
        cfg.venue.clone(),
        cfg.pool.max_sessions,
        Arc::clone(&events),
    ));

    let engine = TradingEngine::new(
        Arc::clone(&pool),
        Arc::clone(&store) as Arc<dyn UserStore>,
        Arc::clone(&store) as Arc<dyn TradeSink>,
        events,
        PlacementProtocol::new(&cfg.venue),
    );

    // -- Operator console ------------------------------------------------

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_signal_id: Option<String> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if matches!(line, "quit" | "exit") {
                            break;
                        }
                        if let Err(e) = run_command(
                            line, &cfg, &store, &pool, &engine, &mut last_signal_id,
                        )
                        .await
                        {
                            error!(error = %e, "Command failed");
                        }
                    }
                    Ok(None) => break, // stdin closed
                    Err(e) => {
                        error!(error = %e, "Console read failed");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Close every session, then the shared browser process
    pool.close_all().await;
    info!("COPYTRADE shut down cleanly.");

    Ok(())
}

/// Dispatch one console command.
async fn run_command(
    line: &str,
    cfg: &AppConfig,
    store: &Arc<SqliteStore>,
    pool: &Arc<SessionPool>,
    engine: &TradingEngine,
    last_signal_id: &mut Option<String>,
) -> Result<()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.as_slice() {
        ["help"] => print_help(),

        ["adduser", owner_id, rest @ ..] => {
            let mut user = UserRecord::new(*owner_id);
            user.trading_settings.is_auto_trading = true;
            if let [base] = rest {
                user.trading_settings.base_amount = base.parse::<Decimal>()?;
            }
            store.upsert_user(&user).await?;
            println!(
                "user {} ready (base ${}, auto-trading on)",
                owner_id, user.trading_settings.base_amount,
            );
        }

        ["connect", owner_id] => {
            let view = pool.create_session(owner_id).await?;
            pool.navigate_to_entry(owner_id).await?;
            println!(
                "session for {} opened at {} — log in to the venue in the browser",
                view.owner_id, cfg.venue.login_url,
            );
        }

        ["close", owner_id] => {
            pool.close_session(owner_id).await;
            println!("session for {owner_id} closed");
        }

        ["signal", asset, direction, rest @ ..] => {
            let direction: Direction = direction.parse()?;
            let duration_secs = match rest {
                [secs] => secs.parse()?,
                _ => cfg.venue.default_duration_secs,
            };
            let signal = Signal {
                signal_id: format!("sig-{}", uuid::Uuid::new_v4()),
                asset: asset.to_string(),
                direction,
                duration_secs,
            };
            let report = engine.broadcast_signal(&signal).await;
            *last_signal_id = Some(signal.signal_id.clone());
            println!("broadcast {}: {report}", signal.signal_id);
        }

        ["result", outcome, rest @ ..] => {
            let outcome: Outcome = outcome.parse()?;
            let signal_id = match rest {
                [id] => id.to_string(),
                _ => last_signal_id
                    .clone()
                    .ok_or_else(|| anyhow!("No signal broadcast yet — pass a signal id"))?,
            };
            engine
                .process_result(&SignalResult { signal_id, outcome })
                .await;
            println!("result {outcome} applied");
        }

        ["sync", owner_id] => {
            let user = store
                .load_user(owner_id)
                .await?
                .ok_or_else(|| anyhow!("Unknown user: {owner_id}"))?;
            engine.sync_settings(&user).await;
        }

        ["status", owner_id] => {
            let user = store
                .load_user(owner_id)
                .await?
                .ok_or_else(|| anyhow!("Unknown user: {owner_id}"))?;
            let status = staking::status(&user.trading_settings, &user.staking)?;
            let location = pool
                .location_state(owner_id)
                .map(|l| l.to_string())
                .unwrap_or_else(|| "no session".to_string());
            println!("{owner_id}: {status} | {location}");
        }

        ["trades", owner_id] => {
            for trade in store.trades_for(owner_id).await? {
                println!("{trade}");
            }
        }

        ["stats"] => println!("{}", pool.stats()),

        _ => println!("unknown command — try 'help'"),
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"commands:
  adduser <id> [base]          create/update a user (auto-trading on)
  connect <id>                 open a browser session and go to the login page
  close <id>                   close a user's session
  signal <asset> <call|put> [secs]   broadcast a signal to all eligible users
  result <win|loss> [signal]   apply an outcome to staking states
  sync <id>                    push the user's base stake into their session
  status <id>                  staking level and session location
  trades <id>                  trade history
  stats                        session pool counters
  quit"#
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("copytrade=info"));

    let json_logging = std::env::var("COPYTRADE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
