//! raidguard entry point.

use std::sync::Arc;

use serenity::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raidguard::backup::{AutoBackup, BackupService};
use raidguard::config::RaidGuardConfig;
use raidguard::detectors::{Detectors, KeywordMatcher};
use raidguard::discord::SerenityPlatform;
use raidguard::error::{RaidGuardError, Result};
use raidguard::gateway::GatewayHandler;
use raidguard::health::spawn_health_server;
use raidguard::lockdown::LockdownEngine;
use raidguard::platform::Platform;
use raidguard::recovery::RecoverySequencer;
use raidguard::router::EventRouter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG controls verbosity, default info.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        built = env!("BUILD_TIMESTAMP"),
        commit = option_env!("GIT_COMMIT").unwrap_or("unknown"),
        "raidguard starting..."
    );

    let config = RaidGuardConfig::from_env()?;
    tracing::info!(
        prefix = %config.command_prefix,
        keywords = config.raid_keywords.len(),
        backup_dir = %config.backup_dir.display(),
        "Configuration loaded"
    );

    spawn_health_server(config.health_port);

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let me = http
        .get_current_user()
        .await
        .map_err(|e| RaidGuardError::DiscordApi(Box::new(e)))?;
    tracing::info!(user = %me.name, user_id = %me.id, "Authenticated");

    let platform: Arc<dyn Platform> = Arc::new(SerenityPlatform::new(http, me.id));

    let keywords = KeywordMatcher::new(config.raid_keywords.as_slice())?;
    let detectors = Detectors::new(config.detection.clone(), keywords);
    let lockdown = LockdownEngine::new(
        platform.clone(),
        RecoverySequencer::new(config.recovery.clone()),
    )
    .with_concurrency(config.fanout_concurrency);
    let backups = BackupService::new(config.backup_dir.clone());
    let router = Arc::new(EventRouter::new(detectors, lockdown, backups.clone()));

    let auto_backup = Arc::new(AutoBackup::new(
        platform.clone(),
        backups,
        config.backup_interval,
    ));

    let handler = GatewayHandler::new(
        router,
        platform,
        auto_backup.clone(),
        config.command_prefix.clone(),
    );

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| RaidGuardError::DiscordApi(Box::new(e)))?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_backup = auto_backup.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutting down");
        shutdown_backup.stop().await;
        shard_manager.shutdown_all().await;
    });

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| RaidGuardError::DiscordApi(Box::new(e)))?;

    auto_backup.stop().await;
    Ok(())
}
