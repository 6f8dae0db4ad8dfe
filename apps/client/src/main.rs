use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_cell::{
    ChatConfig, ChatConnectionManager, ChatHistory, ChatSession, SqliteHistoryStore,
    TranscriptEvent, WsChatTransport,
};
use shared_config::ClientConfig;
use shared_utils::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting telecare chat client");

    let config = ClientConfig::from_env();
    if !config.is_configured() {
        anyhow::bail!("TELECARE_API_URL and TELECARE_CHAT_SOCKET_URL must be set");
    }

    let chat_config = ChatConfig {
        history_retention_days: config.history_retention_days,
        ..ChatConfig::default()
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = Arc::new(WsChatTransport::new(config.chat_socket_url.clone()));
    let connection =
        ChatConnectionManager::new(transport.clone(), clock.clone(), chat_config.clone());

    let user_id = std::env::var("TELECARE_USER_ID").ok();
    let history = match &user_id {
        Some(_) => {
            let store = SqliteHistoryStore::new(&config.history_dir)
                .context("failed to open history store")?;
            Some(Arc::new(ChatHistory::new(
                Arc::new(store),
                clock.clone(),
                chat_config.history_retention_days,
            )))
        }
        None => None,
    };

    let session = ChatSession::new(
        chat_config,
        clock,
        transport,
        connection,
        history,
        user_id,
    );
    session.start();

    if let Err(e) = session.connection().ensure_connected().await {
        warn!("Initial connect failed: {}", e);
    }
    session.connection().spawn_liveness();
    session.spawn_response_pump();
    session.spawn_connection_monitor();

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TranscriptEvent::MessageAppended(message)
                | TranscriptEvent::PlaceholderResolved { message, .. } => {
                    println!("[{:?}] {}", message.role, message.content);
                }
                TranscriptEvent::PlaceholderShown(_) => println!("[Bot] ..."),
                TranscriptEvent::RecoveryRequired => {
                    println!("(something went wrong - type /restart to reset)");
                }
                TranscriptEvent::Restarted => println!("(conversation restarted)"),
            }
        }
    });

    for message in session.transcript() {
        println!("[{:?}] {}", message.role, message.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = session.send(&line).await {
            warn!("Send failed: {}", e);
        }
    }

    session.shutdown().await;
    info!("Chat client stopped");
    Ok(())
}
