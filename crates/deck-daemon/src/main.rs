mod backend;
mod core;
mod discovery;
mod embed;
mod error;
mod http;
mod lyric_sync;
mod lyrics_provider;
mod mpv;
mod radio;
mod socket;
#[cfg(test)]
mod testing;

use backend::DirectStream;
use deck_proto::config::Config;
use deck_proto::protocol::Notice;
use deck_proto::state::{load_embed_catalog_from_toml, EmbedCatalog, StateManager};
use deck_proto::track::Track;
use discovery::ItunesDiscovery;
use embed::{EmbeddedVideo, MpvEmbedHost};
use lyrics_provider::LrclibClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Notice(Notice),
    /// A fetched transcript landed; clients read it from the state.
    LyricsUpdated,
    LyricLine(Option<usize>),
    SearchResults {
        term: String,
        tracks: Vec<Track>,
    },
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR go to clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

/// Debug for this binary's own targets, info for everything else.
const DEFAULT_LOG_FILTER: &str = concat!("info,", env!("CARGO_CRATE_NAME"), "=debug");

fn load_catalog(config: &Config) -> EmbedCatalog {
    if !config.embed.enabled {
        return EmbedCatalog::new();
    }
    let path = &config.embed.catalog_file;
    if !path.exists() {
        info!("No embed catalog at {:?}", path);
        return EmbedCatalog::new();
    }
    match load_embed_catalog_from_toml(path) {
        Ok(catalog) => {
            info!("Loaded {} embed matches from {:?}", catalog.len(), path);
            catalog
        }
        Err(e) => {
            warn!("Failed to load embed catalog {:?}: {}", path, e);
            EmbedCatalog::new()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "--system-deps") {
        deck_proto::platform::set_use_system_deps(true);
    }

    // Broadcast channel first so logging can feed it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(256);

    let data_dir = deck_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        config.playback.history_cap,
    ));
    let catalog = load_catalog(&config);

    // All external inputs funnel into the core
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::CoreEvent>(256);

    let load_timeout = Duration::from_secs(config.playback.load_timeout_secs);
    let direct = DirectStream::new(load_timeout);
    let embed_host = Arc::new(MpvEmbedHost::new(config.embed.watch_url_prefix.clone()));
    let embedded = EmbeddedVideo::new(embed_host.clone(), load_timeout);

    if config.embed.enabled {
        let host = embed_host.clone();
        let tx = event_tx.clone();
        tokio::spawn(async move {
            match host.handshake().await {
                Ok(()) => {
                    let _ = tx.send(core::CoreEvent::EmbedReady).await;
                }
                Err(e) => warn!("Embedded player unavailable: {}", e),
            }
        });
    }

    let services = core::Services {
        direct: direct.clone(),
        embedded,
        discovery: Arc::new(ItunesDiscovery::new(&config.discovery)?),
        lyrics: Arc::new(LrclibClient::new(&config.lyrics)?),
    };

    let player_core = core::PlayerCore::new(
        config.clone(),
        state_manager.clone(),
        services,
        catalog,
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await;

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        deck_proto::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(core::CoreEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    player_core.run(event_rx).await?;

    direct.shutdown().await;
    embed_host.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
