use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

mod api;
mod convert;
mod encoder;
mod protocol;
mod state;
mod ws;

use convert::ConvertRegistry;
use state::RoomStore;

/// Runtime settings, read once at startup and injected everywhere.
#[derive(Debug)]
pub struct ServerConfig {
    pub admin_pin: String,
    pub videos_dir: PathBuf,
    pub raw_dir: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomStore,
    pub jobs: ConvertRegistry,
    pub config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor_server=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3000);
    let admin_pin = env::var("ADMIN_PIN").unwrap_or_else(|_| "1234".into());
    let videos_dir = env_path("VIDEOS_DIR", "public/videos");
    let raw_dir = env_path("RAW_DIR", "unconverted");
    let ffmpeg = env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into());

    fs::create_dir_all(&videos_dir)?;
    fs::create_dir_all(&raw_dir)?;

    let config = Arc::new(ServerConfig {
        admin_pin,
        videos_dir: videos_dir.clone(),
        raw_dir: raw_dir.clone(),
    });
    let app_state = AppState {
        rooms: RoomStore::new(),
        jobs: ConvertRegistry::new(raw_dir.clone(), videos_dir.clone(), ffmpeg),
        config,
    };

    let app = Router::new()
        .route("/api/health", get(api::health))
        .route("/api/videos", get(api::list_videos))
        .route("/api/subtitles", get(api::list_subtitles))
        .route("/api/unconverted", get(api::list_unconverted))
        .route("/api/convert", post(api::start_convert))
        .route("/api/convert/status/:id", get(api::convert_status))
        .route("/ws", get(ws::ws_endpoint))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Watch party server listening on {}", addr);
    tracing::info!("Videos dir: {}", videos_dir.display());
    tracing::info!("Raw dir:    {}", raw_dir.display());
    axum::serve(listener, app).await?;
    Ok(())
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(default)
    })
}
