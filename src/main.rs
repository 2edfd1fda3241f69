use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod server;
mod ui;

use crate::audio::{
    controller::PlaybackController, engine::AudioEngine, lavalink::LavalinkEngine,
    registry::SessionRegistry,
};
use crate::bot::{
    events::{self, Announcer},
    moderation::Purger,
    SisyphusBot,
};
use crate::config::Config;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sisyphus=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    let config = Arc::new(Config::load()?);
    info!(
        "🎵 Starting Sisyphus v{} (instance {})",
        env!("CARGO_PKG_VERSION"),
        config.instance_id
    );
    info!("{}", config.summary());

    // Playback core
    let songbird = Songbird::serenity();
    let registry = Arc::new(SessionRegistry::new(
        config.default_volume,
        config.max_history,
    ));
    let lavalink = Arc::new(LavalinkEngine::new(&config, songbird.clone())?);
    let engine: Arc<dyn AudioEngine> = lavalink.clone();
    let controller = PlaybackController::new(registry.clone(), engine, config.idle_timeout);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = SisyphusBot::new(config.clone(), controller.clone(), lavalink.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shutdown = CancellationToken::new();

    // Lavalink events
    let user_id = client.http.get_current_user().await?.id;
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(lavalink.run(user_id, events_tx, shutdown.clone()));
    tokio::spawn(events::run_engine_events(
        events_rx,
        controller,
        Announcer::new(client.http.clone(), client.cache.clone()),
    ));

    // Keep-alive server
    let state = AppState::new(
        Purger::new(client.http.clone()),
        registry,
        config.instance_id.clone(),
    );
    let port = config.keep_alive_port;
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run(port, state, server_shutdown).await {
            error!("❌ Keep-alive server stopped: {:?}", e);
        }
    });

    // Graceful shutdown
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
