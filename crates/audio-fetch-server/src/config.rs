//! Configuration loading and parsing.
//!
//! Defines the optional TOML schema, then folds it together with CLI/env
//! overrides into one resolved [`AppConfig`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable that overrides the output directory.
pub const OUTPUT_DIR_ENV: &str = "AUDIO_FETCH_OUTPUT_DIR";

const DEFAULT_BIND: &str = "0.0.0.0:3333";
const DEFAULT_OUTPUT_DIR: &str = "./downloads";
const DEFAULT_EXTRACTOR: &str = "yt-dlp";
const DEFAULT_TRANSCODER: &str = "ffmpeg";
const DEFAULT_QUALITY: u8 = 2;
const MAX_QUALITY: u8 = 9;
const DEFAULT_MB_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const DEFAULT_MB_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_USER_AGENT: &str = concat!("audio-fetch-server/", env!("CARGO_PKG_VERSION"));

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Directory that receives scratch and final files.
    pub output_dir: Option<String>,
    /// MusicBrainz enrichment settings.
    pub musicbrainz: Option<MusicBrainzConfig>,
    /// Stream extractor settings.
    pub extractor: Option<ExtractorConfig>,
    /// Transcoder settings.
    pub transcoder: Option<TranscoderConfig>,
}

/// MusicBrainz configuration.
#[derive(Debug, Default, Deserialize)]
pub struct MusicBrainzConfig {
    /// Enable lookups for requests that carry a metadata id (default: true).
    pub enabled: Option<bool>,
    /// User-Agent string required by MusicBrainz (include contact info).
    pub user_agent: Option<String>,
    /// Optional base URL override (defaults to https://musicbrainz.org/ws/2).
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExtractorConfig {
    /// Path or name of the `yt-dlp` binary.
    pub binary: Option<String>,
    /// Abort acquisition (resolve, open and copy) after this many seconds.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranscoderConfig {
    /// Path or name of the `ffmpeg` binary.
    pub binary: Option<String>,
    /// LAME VBR quality, 0 (best) to 9.
    pub quality: Option<u8>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServerConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Command-line and environment overrides.
#[derive(Debug, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct MusicBrainzSettings {
    pub enabled: bool,
    pub user_agent: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Fully resolved process configuration, built once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub output_dir: PathBuf,
    pub musicbrainz: MusicBrainzSettings,
    pub extractor_binary: PathBuf,
    pub acquire_timeout: Option<Duration>,
    pub transcoder_binary: PathBuf,
    pub quality: u8,
}

impl AppConfig {
    /// Resolve config values: overrides first, then file, then defaults.
    pub fn resolve(cfg: ServerConfig, overrides: Overrides) -> Result<Self> {
        let bind = match overrides.bind {
            Some(addr) => addr,
            None => bind_from_config(&cfg)?
                .unwrap_or_else(|| DEFAULT_BIND.parse().expect("default bind")),
        };
        let output_dir = overrides
            .output_dir
            .or_else(|| non_blank(cfg.output_dir.as_deref()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let mb = cfg.musicbrainz.unwrap_or_default();
        let musicbrainz = MusicBrainzSettings {
            enabled: mb.enabled.unwrap_or(true),
            user_agent: non_blank(mb.user_agent.as_deref())
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string(),
            base_url: non_blank(mb.base_url.as_deref())
                .unwrap_or(DEFAULT_MB_BASE_URL)
                .to_string(),
            timeout: Duration::from_millis(mb.timeout_ms.unwrap_or(DEFAULT_MB_TIMEOUT_MS)),
        };

        let extractor = cfg.extractor.unwrap_or_default();
        let transcoder = cfg.transcoder.unwrap_or_default();
        let quality = transcoder.quality.unwrap_or(DEFAULT_QUALITY);
        if quality > MAX_QUALITY {
            anyhow::bail!("transcoder.quality must be between 0 and {MAX_QUALITY}, got {quality}");
        }

        Ok(Self {
            bind,
            output_dir,
            musicbrainz,
            extractor_binary: PathBuf::from(
                non_blank(extractor.binary.as_deref()).unwrap_or(DEFAULT_EXTRACTOR),
            ),
            acquire_timeout: extractor
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            transcoder_binary: PathBuf::from(
                non_blank(transcoder.binary.as_deref()).unwrap_or(DEFAULT_TRANSCODER),
            ),
            quality,
        })
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
