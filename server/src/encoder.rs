use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::convert::ConvertRegistry;

/// Fully resolved invocation for one encode run.
#[derive(Debug, Clone)]
pub struct EncodeCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// ffmpeg invocation producing an HLS rendition any browser player can
/// consume: x264 high profile, AAC stereo, 6-second mpegts segments with
/// a never-truncated playlist.
pub fn hls_command(program: &str, input: &Path, out_dir: &Path, playlist: &Path) -> EncodeCommand {
    let input = input.to_string_lossy().to_string();
    let playlist = playlist.to_string_lossy().to_string();
    let segment_pattern = out_dir.join("segment%03d.ts").to_string_lossy().to_string();
    let args = [
        "-y",
        "-hide_banner",
        "-loglevel",
        "info",
        "-stats",
        "-i",
        input.as_str(),
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-sn",
        "-dn",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-preset",
        "veryfast",
        "-crf",
        "20",
        "-profile:v",
        "high",
        "-level",
        "4.0",
        "-g",
        "60",
        "-keyint_min",
        "60",
        "-sc_threshold",
        "0",
        "-c:a",
        "aac",
        "-ac",
        "2",
        "-ar",
        "48000",
        "-b:a",
        "160k",
        "-f",
        "hls",
        "-hls_time",
        "6",
        "-hls_list_size",
        "0",
        "-hls_flags",
        "independent_segments",
        "-hls_segment_type",
        "mpegts",
        "-hls_segment_filename",
        segment_pattern.as_str(),
        playlist.as_str(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    EncodeCommand {
        program: program.to_string(),
        args,
    }
}

/// Launch the encode process and track it to completion in the background.
/// Fire-and-forget: every failure mode, including a spawn failure, lands
/// in the job record rather than at the caller.
pub fn supervise(registry: ConvertRegistry, job_id: String, command: EncodeCommand) {
    tokio::spawn(run(registry, job_id, command));
}

async fn run(registry: ConvertRegistry, job_id: String, command: EncodeCommand) {
    registry.mark_running(&job_id);
    let mut child = match Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(job = %job_id, "encoder failed to start: {e}");
            registry.append_log(&job_id, format!("failed to start {}: {e}", command.program));
            registry.finish(&job_id, false);
            return;
        }
    };

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump_lines(
            registry.clone(),
            job_id.clone(),
            stdout,
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump_lines(
            registry.clone(),
            job_id.clone(),
            stderr,
        )));
    }

    let status = child.wait().await;
    // Drain whatever output is still buffered before sealing the record.
    for pump in pumps {
        let _ = pump.await;
    }

    match status {
        Ok(status) => {
            tracing::info!(job = %job_id, code = ?status.code(), "encoder exited");
            registry.finish(&job_id, status.success());
        }
        Err(e) => {
            registry.append_log(&job_id, format!("wait failed: {e}"));
            registry.finish(&job_id, false);
        }
    }
}

async fn pump_lines<R>(registry: ConvertRegistry, job_id: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        registry.append_log(&job_id, line);
    }
}
