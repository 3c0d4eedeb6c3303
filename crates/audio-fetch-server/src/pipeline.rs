//! Download pipeline: acquire, stage, enrich, transcode, promote, clean up.
//!
//! Each request runs through the stages in order and stops at the first fatal
//! error. Metadata enrichment is best-effort and runs alongside acquisition;
//! a failed acquisition drops it without waiting for the lookup.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use audio_fetch_types::{DownloadResponse, MP3_MIME};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::extractor::{AcquireError, StreamAcquirer, YtDlpAcquirer, normalize_source_id};
use crate::files::{display_name, ensure_dir, mime_for_extension, sanitize_filename, unique_path};
use crate::musicbrainz::{DisabledEnricher, MetadataEnricher, MetadataError, MusicBrainzClient};
use crate::tags::TagRecord;
use crate::transcode::{FfmpegTranscoder, Transcoder};

/// Extension used for the scratch file when the backend reports none.
const DEFAULT_SOURCE_EXT: &str = "m4a";
const FINAL_EXT: &str = "mp3";
const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// One validated download request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRequest {
    pub source_id: String,
    pub metadata_id: Option<String>,
}

impl MediaRequest {
    /// Validate raw query values.
    ///
    /// The source id is required; a blank, `undefined` or `null` metadata id
    /// counts as absent.
    pub fn new(source_id: Option<&str>, metadata_id: Option<&str>) -> Result<Self, PipelineError> {
        let source_id = source_id
            .map(normalize_source_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PipelineError::BadRequest("missing id parameter".to_string()))?;
        let metadata_id = metadata_id
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != "undefined" && *id != "null")
            .map(str::to_string);
        Ok(Self {
            source_id,
            metadata_id,
        })
    }
}

/// A finished download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub mime_type: &'static str,
    pub size_bytes: u64,
}

impl DownloadOutcome {
    pub fn to_response(&self) -> DownloadResponse {
        DownloadResponse {
            file_name: display_name(&self.path),
            mime_type: self.mime_type.to_string(),
            size_bytes: self.size_bytes,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Acquiring,
    Staging,
    Enriching,
    Transcoding,
    Promoted,
    Cleaned,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Acquiring => "acquiring",
            Stage::Staging => "staging",
            Stage::Enriching => "enriching",
            Stage::Transcoding => "transcoding",
            Stage::Promoted => "promoted",
            Stage::Cleaned => "cleaned",
        }
    }
}

/// Raw stream written to disk, plus the name it was derived from.
struct Staged {
    base_name: String,
    scratch: PathBuf,
    bytes: u64,
}

pub struct Pipeline {
    output_dir: PathBuf,
    acquire_timeout: Option<Duration>,
    acquirer: Arc<dyn StreamAcquirer>,
    enricher: Arc<dyn MetadataEnricher>,
    transcoder: Arc<dyn Transcoder>,
}

impl Pipeline {
    pub fn new(
        output_dir: PathBuf,
        acquire_timeout: Option<Duration>,
        acquirer: Arc<dyn StreamAcquirer>,
        enricher: Arc<dyn MetadataEnricher>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        Self {
            output_dir,
            acquire_timeout,
            acquirer,
            enricher,
            transcoder,
        }
    }

    /// Wire the `yt-dlp`, MusicBrainz and `ffmpeg` backends from config.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let enricher: Arc<dyn MetadataEnricher> = if cfg.musicbrainz.enabled {
            Arc::new(MusicBrainzClient::new(&cfg.musicbrainz))
        } else {
            Arc::new(DisabledEnricher)
        };
        Self::new(
            cfg.output_dir.clone(),
            cfg.acquire_timeout,
            Arc::new(YtDlpAcquirer::new(cfg.extractor_binary.clone())),
            enricher,
            Arc::new(FfmpegTranscoder::new(cfg.transcoder_binary.clone(), cfg.quality)),
        )
    }

    /// Run one request to completion.
    pub async fn run(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, PipelineError> {
        let deadline = self.acquire_timeout.map(|limit| Instant::now() + limit);
        let staging = self.stage(request, cancel, deadline);
        let enrichment = self.enrich(request.metadata_id.as_deref());
        tokio::pin!(staging, enrichment);

        let mut tags = None;
        let staged = loop {
            tokio::select! {
                staged = &mut staging => break staged,
                done = &mut enrichment, if tags.is_none() => tags = Some(done),
            }
        };
        let staged = staged.inspect_err(|err| log_failure(request, Stage::Staging, err))?;
        let tags = match tags {
            Some(tags) => tags,
            None => enrichment.await,
        };

        // The scratch file exists by now, so the allocator cannot return it.
        let final_path = unique_path(&self.output_dir, &staged.base_name, FINAL_EXT);
        tracing::info!(
            id = %request.source_id,
            stage = Stage::Transcoding.as_str(),
            input = %staged.scratch.display(),
            output = %final_path.display(),
            tagged = !tags.is_empty(),
            "transcoding audio"
        );
        if let Err(err) = self
            .transcoder
            .transcode_and_tag(&staged.scratch, &final_path, &tags, cancel)
            .await
        {
            let err = PipelineError::from(err);
            log_failure(request, Stage::Transcoding, &err);
            tracing::warn!(
                scratch = %staged.scratch.display(),
                "scratch file kept for diagnosis"
            );
            return Err(err);
        }

        let size_bytes = tokio::fs::metadata(&final_path)
            .await
            .map(|meta| meta.len())
            .map_err(|err| PipelineError::io("stat final file", err))
            .inspect_err(|err| log_failure(request, Stage::Promoted, err))?;
        tracing::info!(
            id = %request.source_id,
            stage = Stage::Promoted.as_str(),
            path = %final_path.display(),
            size_bytes,
            source_bytes = staged.bytes,
            "final file promoted"
        );

        if staged.scratch == final_path {
            tracing::warn!(
                stage = Stage::Cleaned.as_str(),
                path = %final_path.display(),
                "scratch path is the final path; nothing to clean"
            );
        } else {
            remove_scratch(&staged.scratch).await;
        }

        Ok(DownloadOutcome {
            path: final_path,
            mime_type: MP3_MIME,
            size_bytes,
        })
    }

    async fn stage(
        &self,
        request: &MediaRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Staged, PipelineError> {
        tracing::info!(
            id = %request.source_id,
            stage = Stage::Acquiring.as_str(),
            "acquiring audio stream"
        );
        let mut stream =
            until_deadline(deadline, self.acquirer.acquire(cancel, &request.source_id)).await??;

        let base_name = sanitize_filename(&stream.title);
        let ext = stream
            .ext
            .as_deref()
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_SOURCE_EXT)
            .to_string();

        if let Err(err) = ensure_dir(&self.output_dir).await {
            stream.abort().await;
            return Err(PipelineError::io("failed to create output directory", err));
        }
        let scratch = unique_path(&self.output_dir, &base_name, &ext);
        tracing::info!(
            id = %request.source_id,
            stage = Stage::Staging.as_str(),
            title = %stream.title,
            scratch = %scratch.display(),
            source_mime = mime_for_extension(&ext),
            "writing audio stream"
        );

        let copied = copy_to_file(stream.reader_mut(), &scratch, cancel, deadline).await;
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(err) => {
                stream.abort().await;
                discard_partial(&scratch).await;
                return Err(err);
            }
        };
        if let Err(err) = stream.close().await {
            discard_partial(&scratch).await;
            return Err(err.into());
        }

        Ok(Staged {
            base_name,
            scratch,
            bytes,
        })
    }

    async fn enrich(&self, metadata_id: Option<&str>) -> TagRecord {
        let Some(metadata_id) = metadata_id else {
            return TagRecord::default();
        };
        tracing::info!(
            musicbrainz_id = %metadata_id,
            stage = Stage::Enriching.as_str(),
            "fetching metadata"
        );
        tags_or_empty(metadata_id, self.enricher.enrich(metadata_id).await)
    }
}

/// Metadata is best-effort: a failed lookup degrades to an empty record.
pub fn tags_or_empty(metadata_id: &str, result: Result<TagRecord, MetadataError>) -> TagRecord {
    match result {
        Ok(tags) => tags,
        Err(err) => {
            tracing::warn!(
                musicbrainz_id = %metadata_id,
                error = %err,
                "metadata lookup failed; continuing without tags"
            );
            TagRecord::default()
        }
    }
}

async fn until_deadline<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, AcquireError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| AcquireError::TimedOut),
        None => Ok(fut.await),
    }
}

/// Copy the whole stream into a new file through a fixed-size buffer.
async fn copy_to_file<R>(
    reader: &mut R,
    path: &Path,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> Result<u64, PipelineError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|err| PipelineError::io("failed to create file", err))?;
    let mut buf = vec![0u8; COPY_BUFFER_BYTES];
    let mut total = 0u64;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled.into()),
            read = until_deadline(deadline, reader.read(&mut buf)) => read?,
        };
        let read = read.map_err(|err| PipelineError::io("failed while reading stream", err))?;
        if read == 0 {
            break;
        }
        file.write_all(&buf[..read])
            .await
            .map_err(|err| PipelineError::io("failed while writing file", err))?;
        total += read as u64;
    }
    file.flush()
        .await
        .map_err(|err| PipelineError::io("failed while closing file", err))?;
    Ok(total)
}

async fn remove_scratch(scratch: &Path) {
    match tokio::fs::remove_file(scratch).await {
        Ok(()) => tracing::debug!(
            stage = Stage::Cleaned.as_str(),
            scratch = %scratch.display(),
            "scratch file removed"
        ),
        Err(err) => tracing::warn!(
            stage = Stage::Cleaned.as_str(),
            scratch = %scratch.display(),
            error = %err,
            "failed to remove scratch file"
        ),
    }
}

async fn discard_partial(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove partial file");
        }
    }
}

fn log_failure(request: &MediaRequest, stage: Stage, err: &PipelineError) {
    tracing::error!(
        id = %request.source_id,
        stage = stage.as_str(),
        kind = err.kind(),
        error = %err,
        "download failed"
    );
}
