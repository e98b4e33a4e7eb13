use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use tavern_db::Database;
use tavern_sync::{ChatFacade, ClaimOutcome, OnlineSession, SyncConfig, day_number};
use tavern_types::{ConnectionKind, MessageKind};

mod render;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("TAVERN_DB_PATH").unwrap_or_else(|_| "tavern.db".into());
    let identity = std::env::var("TAVERN_NODE_IDENTITY").unwrap_or_else(|_| "innkeeper".into());
    let display_name = std::env::var("TAVERN_NODE_NAME").unwrap_or_else(|_| identity.clone());
    let day_check_secs: u64 = std::env::var("TAVERN_DAY_CHECK_SECS")
        .unwrap_or_else(|_| "60".into())
        .parse()
        .context("TAVERN_DAY_CHECK_SECS")?;
    let config = SyncConfig::from_env()?;

    let db = Database::open(&PathBuf::from(&db_path))
        .with_context(|| format!("opening {}", db_path))?;
    info!("Shared world store at {}", db_path);

    let mut session = OnlineSession::start(
        Arc::new(db),
        &identity,
        &display_name,
        ConnectionKind::Local,
        config,
    )
    .await?;

    let world = session.synchronizer().load_all().await;
    info!("Loaded {} shared documents", world.len());

    let mut chat = ChatFacade::for_session(&session);
    let mut incoming = session
        .incoming()
        .context("session incoming channel already taken")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let mut day_check = tokio::time::interval(Duration::from_secs(day_check_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            _ = day_check.tick() => check_new_day(&session).await,
            Some(message) = incoming.recv() => {
                chat.receive(message);
                for message in chat.take_pending() {
                    println!("{}", render::message_line(&message));
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_input(&chat, &line).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn handle_input(chat: &ChatFacade, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match chat.execute(line).await {
        Ok(Some(reply)) => {
            for out in render::reply_lines(&reply) {
                println!("{}", out);
            }
        }
        Ok(None) => println!("Commands: /say /tell /announce /who /online /news"),
        Err(e) => warn!("Chat command failed: {}", e),
    }
}

/// Race the other sessions for today's reset; the winner announces it.
async fn check_new_day(session: &OnlineSession) {
    let now = session.synchronizer().backend().now();
    let day = day_number(now, session.config().reset_hour_utc);
    if session.synchronizer().try_claim_daily_reset(day).await != ClaimOutcome::Committed {
        return;
    }

    let headline = format!("A new day dawns over the realm (day {})", day);
    if let Err(e) = session
        .news()
        .add_news(&headline, "world", session.identity())
        .await
    {
        warn!("Failed to post new-day news: {}", e);
    }
    if let Err(e) = session
        .relay()
        .broadcast(session.identity(), MessageKind::System, &headline)
        .await
    {
        warn!("Failed to announce new day: {}", e);
    }
}
