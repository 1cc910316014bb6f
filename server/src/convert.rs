use std::collections::VecDeque;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::encoder;
use crate::state::now_ms;

/// Process output lines kept per job; oldest are dropped beyond this.
pub const LOG_CAPACITY: usize = 250;
/// How much of the log a status poll returns.
pub const LOG_TAIL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Error,
}

/// One supervised encode. `Pending` covers only the instant between
/// registration and the supervisor task picking the job up; a terminal
/// status is reached exactly once, when the underlying process exits,
/// and never changes afterwards.
pub struct ConvertJob {
    pub id: String,
    pub source: PathBuf,
    pub out_dir: PathBuf,
    pub playlist: PathBuf,
    pub folder_name: String,
    pub status: JobStatus,
    pub log: VecDeque<String>,
    pub started: u64,
    pub ended: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: String,
    pub output_folder: String,
    pub playlist: String,
}

/// Pollable view of one job. `segs` comes from reading the playlist the
/// encoder emits on disk, not from parsing its stdout; the files are the
/// contract the player consumes.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub folder: String,
    pub segs: usize,
    pub started: u64,
    pub ended: Option<u64>,
    pub log: Vec<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    #[error("no source path supplied")]
    MissingPath,
    #[error("source path escapes the raw media root")]
    InvalidPath,
    #[error("could not start conversion: {0}")]
    Failed(String),
}

/// Tracks every conversion for the life of the process. Starting a job is
/// fire-and-forget once validation passes: from then on every outcome,
/// including a spawn failure, lands in the job record and is only visible
/// through polling.
#[derive(Clone)]
pub struct ConvertRegistry {
    jobs: Arc<DashMap<String, ConvertJob>>,
    raw_root: PathBuf,
    videos_root: PathBuf,
    ffmpeg: String,
}

impl ConvertRegistry {
    pub fn new(raw_root: PathBuf, videos_root: PathBuf, ffmpeg: String) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            raw_root,
            videos_root,
            ffmpeg,
        }
    }

    /// Validate the request, claim a unique output folder, and launch the
    /// encoder. Validation is lexical on purpose: a source file that
    /// vanished still starts a job, which then fails through the normal
    /// supervised path rather than here.
    pub fn start(
        &self,
        source: Option<&str>,
        desired_name: Option<&str>,
    ) -> Result<StartedJob, ConvertError> {
        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConvertError::MissingPath)?;

        let abs = lexical_absolute(Path::new(source));
        let root = lexical_absolute(&self.raw_root);
        if !abs.starts_with(&root) {
            return Err(ConvertError::InvalidPath);
        }

        let base = desired_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(sanitize_folder_name)
            .or_else(|| {
                abs.file_stem()
                    .map(|stem| sanitize_folder_name(&stem.to_string_lossy()))
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "video".to_string());

        let (folder_name, out_dir) = unique_folder(&self.videos_root, &base);
        fs::create_dir_all(&out_dir).map_err(|e| ConvertError::Failed(e.to_string()))?;
        let playlist = out_dir.join("playlist.m3u8");

        let id = Uuid::new_v4().simple().to_string();
        self.track(ConvertJob {
            id: id.clone(),
            source: abs.clone(),
            out_dir: out_dir.clone(),
            playlist: playlist.clone(),
            folder_name: folder_name.clone(),
            status: JobStatus::Pending,
            log: VecDeque::new(),
            started: now_ms(),
            ended: None,
        });

        let command = encoder::hls_command(&self.ffmpeg, &abs, &out_dir, &playlist);
        encoder::supervise(self.clone(), id.clone(), command);
        tracing::info!(job = %id, folder = %folder_name, "conversion started");

        Ok(StartedJob {
            job_id: id,
            output_folder: folder_name.clone(),
            playlist: format!(
                "/videos/{}/playlist.m3u8",
                urlencoding::encode(&folder_name)
            ),
        })
    }

    /// Current view of one job, or `None` for an unknown id. Progress is
    /// re-derived on every poll by re-reading the emitted playlist.
    pub async fn status(&self, id: &str) -> Option<JobSnapshot> {
        let (mut snapshot, playlist) = {
            let job = self.jobs.get(id)?;
            let tail_start = job.log.len().saturating_sub(LOG_TAIL);
            (
                JobSnapshot {
                    id: job.id.clone(),
                    status: job.status,
                    folder: job.folder_name.clone(),
                    segs: 0,
                    started: job.started,
                    ended: job.ended,
                    log: job.log.iter().skip(tail_start).cloned().collect(),
                },
                job.playlist.clone(),
            )
        };
        let text = tokio::fs::read_to_string(&playlist).await.unwrap_or_default();
        snapshot.segs = count_segment_refs(&text);
        Some(snapshot)
    }

    pub(crate) fn track(&self, job: ConvertJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub(crate) fn mark_running(&self, id: &str) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Running;
            }
        }
    }

    pub(crate) fn append_log(&self, id: &str, line: String) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            job.log.push_back(line);
            if job.log.len() > LOG_CAPACITY {
                job.log.pop_front();
            }
        }
    }

    /// Seal the job. Only the first call takes effect; a terminal status
    /// never changes again.
    pub(crate) fn finish(&self, id: &str, success: bool) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if matches!(job.status, JobStatus::Done | JobStatus::Error) {
                return;
            }
            job.status = if success {
                JobStatus::Done
            } else {
                JobStatus::Error
            };
            job.ended = Some(now_ms());
            tracing::info!(
                job = %job.id,
                status = ?job.status,
                source = %job.source.display(),
                out = %job.out_dir.display(),
                "conversion finished"
            );
        }
    }
}

/// Resolve to an absolute path without consulting the filesystem, so that
/// containment checks behave the same for paths that do not exist yet.
fn lexical_absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Collapse every run of characters outside `[A-Za-z0-9_- ]` into a single
/// underscore, then trim.
fn sanitize_folder_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_gap = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | ' ') {
            out.push(ch);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    out.trim().to_string()
}

/// First free folder name under `videos_root`: `base`, then `base-2`,
/// `base-3`, ... Collisions are resolved here, at creation time, so two
/// jobs can never write into the same folder.
fn unique_folder(videos_root: &Path, base: &str) -> (String, PathBuf) {
    let mut name = base.to_string();
    let mut dir = videos_root.join(&name);
    let mut i = 1;
    while dir.exists() {
        i += 1;
        name = format!("{base}-{i}");
        dir = videos_root.join(&name);
    }
    (name, dir)
}

fn count_segment_refs(playlist: &str) -> usize {
    playlist.matches(".ts").count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn registry(dir: &Path, ffmpeg: &str) -> ConvertRegistry {
        ConvertRegistry::new(dir.join("raw"), dir.join("videos"), ffmpeg.to_string())
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_folder_name("Movie Night 2"), "Movie Night 2");
        assert_eq!(sanitize_folder_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_folder_name("a...b"), "a_b");
        assert_eq!(sanitize_folder_name("..."), "_");
        assert_eq!(sanitize_folder_name("  spaced  "), "spaced");
    }

    #[test]
    fn lexical_absolute_resolves_traversal_without_fs() {
        let abs = lexical_absolute(Path::new("/media/raw/../../etc/passwd"));
        assert_eq!(abs, PathBuf::from("/etc/passwd"));
        let kept = lexical_absolute(Path::new("/media/raw/./show.mkv"));
        assert_eq!(kept, PathBuf::from("/media/raw/show.mkv"));
    }

    #[test]
    fn unique_folder_appends_numeric_suffix() {
        let tmp = tempdir().unwrap();
        let (first, dir) = unique_folder(tmp.path(), "name");
        assert_eq!(first, "name");
        fs::create_dir_all(&dir).unwrap();
        let (second, _) = unique_folder(tmp.path(), "name");
        assert_eq!(second, "name-2");
    }

    #[test]
    fn counts_segment_references() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:6\n#EXTINF:6.0,\nsegment000.ts\n#EXTINF:6.0,\nsegment001.ts\n";
        assert_eq!(count_segment_refs(playlist), 2);
        assert_eq!(count_segment_refs(""), 0);
    }

    #[tokio::test]
    async fn start_rejects_missing_and_escaping_paths() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");

        assert!(matches!(reg.start(None, None), Err(ConvertError::MissingPath)));
        assert!(matches!(reg.start(Some("   "), None), Err(ConvertError::MissingPath)));

        let outside = tmp.path().join("raw/../elsewhere/file.mkv");
        let result = reg.start(Some(outside.to_str().unwrap()), None);
        assert!(matches!(result, Err(ConvertError::InvalidPath)));
    }

    #[tokio::test]
    async fn same_desired_name_yields_distinct_folders() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");
        let source = tmp.path().join("raw/show.mkv");
        let source = source.to_str().unwrap();

        let first = reg.start(Some(source), Some("Movie Night")).unwrap();
        let second = reg.start(Some(source), Some("Movie Night")).unwrap();

        assert_eq!(first.output_folder, "Movie Night");
        assert_eq!(second.output_folder, "Movie Night-2");
        assert_ne!(first.job_id, second.job_id);
        assert_eq!(first.playlist, "/videos/Movie%20Night/playlist.m3u8");
    }

    #[tokio::test]
    async fn folder_name_falls_back_to_source_stem() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");
        let source = tmp.path().join("raw/Some Show S01E01.mkv");

        let started = reg.start(Some(source.to_str().unwrap()), None).unwrap();
        assert_eq!(started.output_folder, "Some Show S01E01");
    }

    #[tokio::test]
    async fn vanished_source_still_becomes_a_job_that_errors() {
        let tmp = tempdir().unwrap();
        // "false" exits non-zero no matter what, standing in for an
        // encoder that cannot read its input.
        let reg = registry(tmp.path(), "false");
        let source = tmp.path().join("raw/never-existed.mkv");

        let started = reg.start(Some(source.to_str().unwrap()), None).unwrap();
        let status = wait_terminal(&reg, &started.job_id).await;
        assert_eq!(status, JobStatus::Error);
    }

    #[test]
    fn log_is_bounded() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");
        reg.track(test_job("job-1", tmp.path()));
        for i in 0..LOG_CAPACITY + 10 {
            reg.append_log("job-1", format!("line {i}"));
        }
        let job = reg.jobs.get("job-1").unwrap();
        assert_eq!(job.log.len(), LOG_CAPACITY);
        assert_eq!(job.log.front().unwrap(), "line 10");
    }

    #[test]
    fn terminal_status_is_set_exactly_once() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");
        reg.track(test_job("job-1", tmp.path()));

        reg.finish("job-1", false);
        let first_ended = reg.jobs.get("job-1").unwrap().ended;
        reg.finish("job-1", true);

        let job = reg.jobs.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.ended, first_ended);
    }

    #[tokio::test]
    async fn status_reports_tail_and_segments() {
        let tmp = tempdir().unwrap();
        let reg = registry(tmp.path(), "true");
        let mut job = test_job("job-1", tmp.path());
        job.playlist = tmp.path().join("playlist.m3u8");
        fs::write(&job.playlist, "#EXTM3U\nsegment000.ts\nsegment001.ts\nsegment002.ts\n").unwrap();
        reg.track(job);
        for i in 0..LOG_TAIL + 5 {
            reg.append_log("job-1", format!("line {i}"));
        }

        let snapshot = reg.status("job-1").await.unwrap();
        assert_eq!(snapshot.segs, 3);
        assert_eq!(snapshot.log.len(), LOG_TAIL);
        assert_eq!(snapshot.log[0], "line 5");

        assert!(reg.status("no-such-job").await.is_none());
    }

    fn test_job(id: &str, dir: &Path) -> ConvertJob {
        ConvertJob {
            id: id.to_string(),
            source: dir.join("raw/source.mkv"),
            out_dir: dir.join("videos/out"),
            playlist: dir.join("videos/out/playlist.m3u8"),
            folder_name: "out".to_string(),
            status: JobStatus::Running,
            log: VecDeque::new(),
            started: 0,
            ended: None,
        }
    }

    async fn wait_terminal(reg: &ConvertRegistry, id: &str) -> JobStatus {
        for _ in 0..200 {
            let status = reg.status(id).await.unwrap().status;
            if matches!(status, JobStatus::Done | JobStatus::Error) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal status");
    }
}
