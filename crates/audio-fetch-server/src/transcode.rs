//! MP3 transcoding and tagging through `ffmpeg`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::tags::TagRecord;

/// Suffix appended to the final path while the transcoder is writing.
pub const TEMP_SUFFIX: &str = ".tmp.mp3";
const STDERR_TAIL_LINES: usize = 8;

const TRACK_ID_TAG: &str = "MusicBrainz Track Id";
const ARTIST_ID_TAG: &str = "MusicBrainz Artist Id";
const RELEASE_ID_TAG: &str = "MusicBrainz Release Id";
const RELEASE_GROUP_ID_TAG: &str = "MusicBrainz Release Group Id";

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The transcoder binary could not be located; a deployment problem.
    #[error("transcoder not found: {0}")]
    BinaryNotFound(String),
    #[error("transcoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    /// The request was cancelled while the transcoder ran; nothing was promoted.
    #[error("transcode cancelled before promotion")]
    Cancelled,
    #[error("transcoder i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts an input audio file into a tagged MP3.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write `output` from `input`, or leave `output` untouched on failure.
    ///
    /// A running transcode is not interrupted, but once `cancel` has fired
    /// the result must not be promoted to `output`.
    async fn transcode_and_tag(
        &self,
        input: &Path,
        output: &Path,
        tags: &TagRecord,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;
}

pub struct FfmpegTranscoder {
    binary: PathBuf,
    quality: u8,
}

impl FfmpegTranscoder {
    pub fn new(binary: PathBuf, quality: u8) -> Self {
        Self { binary, quality }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode_and_tag(
        &self,
        input: &Path,
        output: &Path,
        tags: &TagRecord,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let tmp_path = temp_output_path(output);
        let args = build_ffmpeg_args(input, &tmp_path, tags, self.quality);
        tracing::debug!(
            binary = %self.binary.display(),
            args = ?args,
            "running transcoder"
        );

        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        let result = match result {
            Ok(result) => result,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscodeError::BinaryNotFound(
                    self.binary.display().to_string(),
                ));
            }
            Err(err) => return Err(TranscodeError::Io(err)),
        };
        if !result.status.success() {
            return Err(TranscodeError::Failed {
                status: result.status.to_string(),
                stderr: stderr_tail(&String::from_utf8_lossy(&result.stderr)),
            });
        }

        if cancel.is_cancelled() {
            tracing::info!(
                tmp = %tmp_path.display(),
                "request cancelled during transcode; output not promoted"
            );
            return Err(TranscodeError::Cancelled);
        }
        tokio::fs::rename(&tmp_path, output).await?;
        Ok(())
    }
}

/// Sibling path the transcoder writes before promotion.
pub fn temp_output_path(output: &Path) -> PathBuf {
    let mut raw = output.as_os_str().to_os_string();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}

/// Argument list for one ffmpeg run.
///
/// Only the first audio stream is kept; standard tags and MusicBrainz
/// provenance tags are added for non-empty fields only.
pub fn build_ffmpeg_args(
    input: &Path,
    tmp_output: &Path,
    tags: &TagRecord,
    quality: u8,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-y",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(input.as_os_str().to_os_string());
    push_all(&mut args, &["-map", "0:a:0", "-vn"]);

    let standard = [
        ("title", &tags.title),
        ("artist", &tags.artist),
        ("album", &tags.album),
        ("date", &tags.date),
        ("genre", &tags.genre),
    ];
    for (key, value) in standard {
        push_metadata(&mut args, key, value.as_deref());
    }

    push_metadata(&mut args, TRACK_ID_TAG, tags.recording_id.as_deref());
    for artist_id in &tags.artist_ids {
        push_metadata(&mut args, ARTIST_ID_TAG, Some(artist_id.as_str()));
    }
    push_metadata(&mut args, RELEASE_ID_TAG, tags.release_id.as_deref());
    push_metadata(&mut args, RELEASE_GROUP_ID_TAG, tags.release_group_id.as_deref());

    push_all(&mut args, &["-c:a", "libmp3lame", "-q:a"]);
    args.push(quality.to_string().into());
    push_all(&mut args, &["-id3v2_version", "3", "-write_id3v1", "1"]);
    args.push(tmp_output.as_os_str().to_os_string());
    args
}

fn push_all(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

fn push_metadata(args: &mut Vec<OsString>, key: &str, value: Option<&str>) {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return;
    };
    args.push("-metadata".into());
    args.push(format!("{key}={value}").into());
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect()
    }

    fn full_tags() -> TagRecord {
        TagRecord {
            title: Some("Song".to_string()),
            artist: Some("A & B".to_string()),
            album: Some("Album".to_string()),
            date: Some("2001-02-03".to_string()),
            genre: Some("Rock, Pop".to_string()),
            recording_id: Some("rec-1".to_string()),
            release_id: Some("rel-1".to_string()),
            release_group_id: Some("rg-1".to_string()),
            artist_ids: vec!["art-1".to_string(), "art-2".to_string()],
        }
    }

    #[test]
    fn empty_tags_produce_no_metadata_flags() {
        let args = as_strings(&build_ffmpeg_args(
            Path::new("in.webm"),
            Path::new("out.mp3.tmp.mp3"),
            &TagRecord::default(),
            2,
        ));
        assert!(!args.iter().any(|arg| arg == "-metadata"));
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i", "in.webm",
                "-map", "0:a:0", "-vn", "-c:a", "libmp3lame", "-q:a", "2",
                "-id3v2_version", "3", "-write_id3v1", "1", "out.mp3.tmp.mp3",
            ]
        );
    }

    #[test]
    fn full_tags_produce_standard_and_provenance_entries() {
        let args = as_strings(&build_ffmpeg_args(
            Path::new("in.m4a"),
            Path::new("out.tmp.mp3"),
            &full_tags(),
            4,
        ));
        let metadata: Vec<&str> = args
            .windows(2)
            .filter(|pair| pair[0] == "-metadata")
            .map(|pair| pair[1].as_str())
            .collect();
        assert_eq!(
            metadata,
            vec![
                "title=Song",
                "artist=A & B",
                "album=Album",
                "date=2001-02-03",
                "genre=Rock, Pop",
                "MusicBrainz Track Id=rec-1",
                "MusicBrainz Artist Id=art-1",
                "MusicBrainz Artist Id=art-2",
                "MusicBrainz Release Id=rel-1",
                "MusicBrainz Release Group Id=rg-1",
            ]
        );
        assert!(args.windows(2).any(|pair| pair[0] == "-q:a" && pair[1] == "4"));
        assert_eq!(args.last().map(String::as_str), Some("out.tmp.mp3"));
    }

    #[test]
    fn blank_values_are_skipped() {
        let tags = TagRecord {
            title: Some("  ".to_string()),
            artist_ids: vec![" ".to_string()],
            ..TagRecord::default()
        };
        let args = as_strings(&build_ffmpeg_args(
            Path::new("in"),
            Path::new("out"),
            &tags,
            2,
        ));
        assert!(!args.iter().any(|arg| arg == "-metadata"));
    }

    #[test]
    fn temp_output_path_appends_suffix() {
        assert_eq!(
            temp_output_path(Path::new("/tmp/song.mp3")),
            PathBuf::from("/tmp/song.mp3.tmp.mp3")
        );
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = (1..=12).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 5"));
        assert!(tail.ends_with("line 12"));
    }

    #[actix_web::test]
    async fn missing_binary_is_a_distinct_error() {
        let transcoder = FfmpegTranscoder::new(PathBuf::from("/nonexistent/audio-fetch/ffmpeg"), 2);
        let err = transcoder
            .transcode_and_tag(
                Path::new("in.webm"),
                Path::new("out.mp3"),
                &TagRecord::default(),
                &CancellationToken::new(),
            )
            .await
            .expect_err("missing binary");
        assert!(matches!(err, TranscodeError::BinaryNotFound(_)), "{err}");
    }

    /// Stand-in ffmpeg: waits, then writes its last argument like the real one.
    #[cfg(unix)]
    pub(crate) fn slow_fake_ffmpeg(dir: &Path, delay_secs: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nfor last; do :; done\nsleep {delay_secs}\nprintf mp3 > \"$last\"\n"),
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        script
    }

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "audio-fetch-transcode-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn finished_transcode_is_promoted() {
        let dir = temp_dir("promote");
        let transcoder = FfmpegTranscoder::new(slow_fake_ffmpeg(&dir, "0"), 2);
        let output = dir.join("song.mp3");
        transcoder
            .transcode_and_tag(
                &dir.join("song.webm"),
                &output,
                &TagRecord::default(),
                &CancellationToken::new(),
            )
            .await
            .expect("transcode");
        assert_eq!(std::fs::read(&output).unwrap(), b"mp3");
        assert!(!temp_output_path(&output).exists());
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn cancel_during_transcode_skips_promotion() {
        let dir = temp_dir("cancel");
        let transcoder = FfmpegTranscoder::new(slow_fake_ffmpeg(&dir, "0.3"), 2);
        let output = dir.join("song.mp3");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        actix_web::rt::spawn(async move {
            actix_web::rt::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = transcoder
            .transcode_and_tag(&dir.join("song.webm"), &output, &TagRecord::default(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, TranscodeError::Cancelled), "{err}");
        assert!(!output.exists());
        assert!(temp_output_path(&output).exists());
    }
}
