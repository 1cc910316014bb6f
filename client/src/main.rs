use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

mod player;
mod protocol;
mod reconcile;
mod sync;

use player::{Player, VirtualPlayer};
use protocol::{ControlAction, ServerMessage};
use reconcile::{projected_position, Reconciler};
use sync::{join_url, now_ms, SyncClient};

/// Headless seat: joins a room, keeps a virtual player on the room's
/// timeline, prints chat, and (for a host) forwards typed commands as
/// controls. Useful for exercising rooms without a media pipeline.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor_client=info".into()),
        )
        .init();

    let server = env::var("PARLOR_SERVER").unwrap_or_else(|_| "ws://localhost:3000".into());
    let room = env::var("PARLOR_ROOM").unwrap_or_else(|_| "family".into());
    let name = env::var("PARLOR_NAME").unwrap_or_else(|_| "Guest".into());
    let pin = env::var("PARLOR_PIN").unwrap_or_default();

    let player = Arc::new(VirtualPlayer::new());
    let reconciler = Arc::new(Reconciler::new());
    let sync = Arc::new(SyncClient::new());

    let url = join_url(&server, &room, &name, &pin);
    tracing::info!("joining {room} at {server}");

    let handler = {
        let player = Arc::clone(&player);
        let reconciler = Arc::clone(&reconciler);
        move |msg: ServerMessage| match msg {
            ServerMessage::Hello(hello) => {
                println!(
                    "* connected as {}{}",
                    hello.you.name,
                    if hello.you.is_host { " (host)" } else { "" }
                );
                for entry in &hello.chat {
                    println!("[{}] {}", entry.from, entry.text);
                }
                reconciler.apply(&hello.state, now_ms(), player.as_ref(), true);
            }
            ServerMessage::System(text) => println!("* {text}"),
            ServerMessage::Chat(entry) => println!("[{}] {}", entry.from, entry.text),
            ServerMessage::State(state) => {
                reconciler.apply(&state, now_ms(), player.as_ref(), false);
                tracing::debug!(
                    "timeline: {:?} {} at {:.1}s",
                    state.video,
                    if state.playing { "playing" } else { "paused" },
                    projected_position(&state, now_ms())
                );
            }
            ServerMessage::HostGranted => println!("* host controls granted"),
        }
    };

    let closed = sync.connect(&url, handler).await?;

    let input_task = tokio::spawn(read_commands(
        Arc::clone(&sync),
        Arc::clone(&player),
        Arc::clone(&reconciler),
    ));

    let _ = closed.await;
    println!("* disconnected");
    input_task.abort();
    Ok(())
}

/// stdin loop: `/play`, `/pause`, `/seek <secs>`, `/video <ref>`, `/pos`
/// act on the room (host pin required server-side); anything else is chat.
async fn read_commands(sync: Arc<SyncClient>, player: Arc<VirtualPlayer>, reconciler: Arc<Reconciler>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Transport commands landing inside the applying-remote window are
        // echoes of a correction, not host intent; they are swallowed.
        let result = match line.split_once(' ') {
            _ if line == "/play" => {
                if reconciler.applying_remote() {
                    continue;
                }
                player.play();
                sync.control(ControlAction::Play, player.position())
            }
            _ if line == "/pause" => {
                if reconciler.applying_remote() {
                    continue;
                }
                player.pause();
                sync.control(ControlAction::Pause, player.position())
            }
            _ if line == "/pos" => {
                println!(
                    "* {} at {:.1}s ({})",
                    player.video().as_deref().unwrap_or("no video"),
                    player.position(),
                    if player.is_paused() { "paused" } else { "playing" }
                );
                Ok(())
            }
            Some(("/seek", target)) => match target.trim().parse::<f64>() {
                Ok(seconds) => {
                    if reconciler.applying_remote() {
                        continue;
                    }
                    player.seek(seconds);
                    sync.control(ControlAction::Seek, seconds)
                }
                Err(_) => {
                    println!("* usage: /seek <seconds>");
                    Ok(())
                }
            },
            Some(("/video", video)) => sync.set_video(video.trim()),
            _ => sync.send_chat(line),
        };
        if let Err(e) = result {
            tracing::warn!("send failed: {e}");
        }
    }
}
