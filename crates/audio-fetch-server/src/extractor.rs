//! Audio stream acquisition through `yt-dlp`.
//!
//! Resolution dumps the item's info as JSON and picks the best audio-only
//! format; opening runs a second `yt-dlp` that writes that format to stdout.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

const STDERR_TAIL_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("extractor not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to resolve {id}: {message}")]
    Resolve { id: String, message: String },
    #[error("no audio-only stream available for {0}")]
    NoAudioStream(String),
    #[error("failed to open audio stream for {id}: {message}")]
    Open { id: String, message: String },
    #[error("acquisition cancelled")]
    Cancelled,
    #[error("acquisition timed out")]
    TimedOut,
}

/// A sequential audio byte stream plus the info needed to name it.
///
/// The stream is owned by whoever copies it and must be finished with either
/// [`AcquiredStream::close`] or [`AcquiredStream::abort`].
pub struct AcquiredStream {
    pub title: String,
    /// Container extension reported by the backend, if any.
    pub ext: Option<String>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    process: Option<(String, Child)>,
}

impl AcquiredStream {
    /// Wrap an in-memory or already-open reader.
    pub fn from_reader(
        title: impl Into<String>,
        ext: Option<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            title: title.into(),
            ext,
            reader,
            process: None,
        }
    }

    fn from_child(
        id: &str,
        title: String,
        ext: Option<String>,
        mut child: Child,
    ) -> Result<Self, AcquireError> {
        let stdout = child.stdout.take().ok_or_else(|| AcquireError::Open {
            id: id.to_string(),
            message: "extractor stdout not captured".to_string(),
        })?;
        Ok(Self {
            title,
            ext,
            reader: Box::new(stdout),
            process: Some((id.to_string(), child)),
        })
    }

    pub fn reader_mut(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.reader.as_mut()
    }

    /// Release the stream after a complete read and check the backend's exit.
    pub async fn close(self) -> Result<(), AcquireError> {
        let Self { reader, process, .. } = self;
        drop(reader);
        let Some((id, mut child)) = process else {
            return Ok(());
        };
        let status = child.wait().await.map_err(|err| AcquireError::Open {
            id: id.clone(),
            message: format!("wait for extractor: {err}"),
        })?;
        check_exit(&id, status)
    }

    /// Release the stream after a failed or cancelled read.
    pub async fn abort(self) {
        let Self { reader, process, .. } = self;
        drop(reader);
        if let Some((id, mut child)) = process {
            if let Err(err) = child.kill().await {
                tracing::debug!(id = %id, error = %err, "extractor already exited");
            }
        }
    }
}

fn check_exit(id: &str, status: ExitStatus) -> Result<(), AcquireError> {
    if status.success() {
        Ok(())
    } else {
        Err(AcquireError::Open {
            id: id.to_string(),
            message: format!("extractor exited with {status}"),
        })
    }
}

/// Backend that turns a source identifier into an audio stream.
#[async_trait]
pub trait StreamAcquirer: Send + Sync {
    /// Resolve `source_id` and open its best audio-only stream.
    ///
    /// Must stop promptly once `cancel` fires.
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        source_id: &str,
    ) -> Result<AcquiredStream, AcquireError>;
}

pub struct YtDlpAcquirer {
    binary: PathBuf,
}

impl YtDlpAcquirer {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn resolve(
        &self,
        cancel: &CancellationToken,
        id: &str,
    ) -> Result<VideoInfo, AcquireError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--skip-download",
            "--",
            id,
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            output = cmd.output() => output,
        };
        let output = output.map_err(|err| self.spawn_error(id, err, true))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquireError::Resolve {
                id: id.to_string(),
                message: format!("{} ({})", stderr_tail(&stderr), output.status),
            });
        }
        serde_json::from_slice(&output.stdout).map_err(|err| AcquireError::Resolve {
            id: id.to_string(),
            message: format!("parse extractor info: {err}"),
        })
    }

    fn open(&self, id: &str, info: VideoInfo) -> Result<AcquiredStream, AcquireError> {
        let format = select_best_audio_format(&info.formats)
            .ok_or_else(|| AcquireError::NoAudioStream(id.to_string()))?;
        let target = info.webpage_url.as_deref().unwrap_or(id);
        tracing::info!(
            id = %id,
            format_id = %format.format_id,
            ext = ?format.ext,
            abr = ?format.abr,
            "opening audio stream"
        );

        let child = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--no-warnings",
                "--quiet",
                "--no-part",
                "-f",
                format.format_id.as_str(),
                "-o",
                "-",
                "--",
                target,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.spawn_error(id, err, false))?;

        let title = info.title.unwrap_or_default();
        let ext = format.ext.clone().filter(|ext| !ext.trim().is_empty());
        AcquiredStream::from_child(id, title, ext, child)
    }

    fn spawn_error(&self, id: &str, err: std::io::Error, resolving: bool) -> AcquireError {
        if err.kind() == std::io::ErrorKind::NotFound {
            return AcquireError::BinaryNotFound(self.binary.display().to_string());
        }
        let message = format!("spawn {}: {err}", self.binary.display());
        if resolving {
            AcquireError::Resolve {
                id: id.to_string(),
                message,
            }
        } else {
            AcquireError::Open {
                id: id.to_string(),
                message,
            }
        }
    }
}

#[async_trait]
impl StreamAcquirer for YtDlpAcquirer {
    async fn acquire(
        &self,
        cancel: &CancellationToken,
        source_id: &str,
    ) -> Result<AcquiredStream, AcquireError> {
        let info = self.resolve(cancel, source_id).await?;
        if cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        self.open(source_id, info)
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
}

impl FormatInfo {
    fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none") && self.acodec.as_deref() != Some("none")
    }
}

/// Highest-bitrate audio-only format; later entries win ties.
fn select_best_audio_format(formats: &[FormatInfo]) -> Option<&FormatInfo> {
    formats
        .iter()
        .filter(|format| format.is_audio_only())
        .max_by(|a, b| {
            let rank = |f: &FormatInfo| (f.abr.unwrap_or(0.0), f.tbr.unwrap_or(0.0));
            rank(a)
                .partial_cmp(&rank(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Reduce a pasted YouTube URL to its video id; anything else passes through.
pub fn normalize_source_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let (host, rest) = without_scheme
        .split_once('/')
        .unwrap_or((without_scheme, ""));
    let host_lower = host.to_ascii_lowercase();
    let host = ["www.", "m.", "music."]
        .iter()
        .find_map(|prefix| host_lower.strip_prefix(prefix))
        .unwrap_or(host_lower.as_str());
    let rest = rest.split('#').next().unwrap_or("");
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());

    let id = match host {
        "youtu.be" => segments.next(),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "v")
                .map(|(_, value)| value),
            Some("shorts" | "embed" | "live" | "v") => segments.next(),
            _ => None,
        },
        _ => None,
    };
    match id.filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => trimmed.to_string(),
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
}
