//! Follows a project's progress stream from the terminal.
//!
//! ```text
//! AUTOSHOP_API_URL=http://localhost:8080/api SHOP_TOKEN=... \
//!     cargo run --example progress_watch -- 42 7
//! ```
//!
//! The first argument is the project id, the optional second one a user id
//! whose notifications are listed alongside.

use autoshop_realtime::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("progress_watch=info".parse()?)
                .add_directive("autoshop_realtime=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let project_id = args.next().unwrap_or_else(|| "1".to_string());
    let user_id = args.next();

    let config = StreamConfig::from_env()?;
    info!(base_url = %config.base_url(), "Using API");
    let connector = Arc::new(SseConnector::new(&config)?);
    let tokens: Arc<dyn TokenProvider> = Arc::new(|| std::env::var("SHOP_TOKEN").ok());

    let progress = ProgressStreamManager::new(connector.clone(), Arc::clone(&tokens), config.clone());
    let _status = progress.subscribe_to_connection_status(&project_id, |status| {
        info!(%status, "Connection status changed");
    })?;
    let _updates = progress.subscribe_to_project_progress_with_error(
        &project_id,
        |update| {
            if let Some(pct) = update.progress_percentage {
                info!(project_id = %update.project_id, status = ?update.status, "{pct:.0}% complete");
            }
            for message in &update.messages {
                info!(project_id = %update.project_id, "{}", message.content);
            }
        },
        |error| warn!(%error, "Progress stream error"),
    )?;

    let notifications = NotificationStreamManager::new(connector, tokens, config);
    let feed = match user_id {
        Some(user_id) => Some(NotificationFeed::start(&notifications, &user_id)?),
        None => None,
    };

    tokio::signal::ctrl_c().await?;

    if let Some(feed) = feed {
        feed.stop();
        for record in feed.snapshot() {
            let marker = if record.read { " " } else { "*" };
            println!("{marker} [{}] {}", record.kind, record.message);
        }
    }
    info!("Shutting down");
    Ok(())
}
