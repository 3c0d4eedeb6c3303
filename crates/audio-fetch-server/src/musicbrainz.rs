//! MusicBrainz recording lookup for metadata enrichment.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::MusicBrainzSettings;
use crate::tags::TagRecord;

/// Related data requested alongside the recording in a single lookup.
const RECORDING_INCLUDES: [&str; 10] = [
    "releases",
    "release-groups",
    "artist-credits",
    "isrcs",
    "tags",
    "genres",
    "recording-rels",
    "work-rels",
    "artist-rels",
    "url-rels",
];
const MAX_BODY_BYTES: u64 = 2_000_000;
const ERROR_SNIPPET_CHARS: usize = 300;

/// Errors from a metadata lookup. None of them abort a download.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("musicbrainz lookups are disabled")]
    Disabled,
    #[error("invalid musicbrainz id: {0}")]
    InvalidId(String),
    #[error("musicbrainz recording not found: {0}")]
    NotFound(String),
    #[error("musicbrainz request failed: {0}")]
    Request(String),
    #[error("musicbrainz response parse failed: {0}")]
    Parse(String),
}

/// Source of tag records keyed by a metadata identifier.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    /// Look up `metadata_id` and normalize the result into a tag record.
    async fn enrich(&self, metadata_id: &str) -> Result<TagRecord, MetadataError>;
}

/// Blocking MusicBrainz web service client.
///
/// Each lookup builds its own agent, so no connection state is shared between
/// requests.
#[derive(Clone, Debug)]
pub struct MusicBrainzClient {
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl MusicBrainzClient {
    pub fn new(settings: &MusicBrainzSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_agent: settings.user_agent.clone(),
            timeout: settings.timeout,
        }
    }

    /// Fetch a recording with its releases, credits, tags, genres and relations.
    pub fn lookup_recording(&self, mbid: &str) -> Result<Recording, MetadataError> {
        let mbid = mbid.trim();
        let mbid = uuid::Uuid::parse_str(mbid)
            .map_err(|_| MetadataError::InvalidId(mbid.to_string()))?
            .hyphenated()
            .to_string();

        let config = ureq::Agent::config_builder()
            .user_agent(&self.user_agent)
            .timeout_global(Some(self.timeout))
            .http_status_as_error(false)
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let url = self.recording_url(&mbid);
        let resp = agent
            .get(&url)
            .query("fmt", "json")
            .query("inc", RECORDING_INCLUDES.join("+"))
            .header("Accept", "application/json")
            .call()
            .map_err(|err| MetadataError::Request(format!("transport url={url}: {err}")))?;

        let code = resp.status();
        let body = resp
            .into_body()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_string();
        if code.as_u16() == 404 {
            return Err(MetadataError::NotFound(mbid));
        }
        if code.as_u16() >= 400 {
            let body = body.unwrap_or_default();
            let trimmed = body.trim();
            if trimmed.is_empty() {
                return Err(MetadataError::Request(format!("status {code} url={url}")));
            }
            let snippet: String = trimmed.chars().take(ERROR_SNIPPET_CHARS).collect();
            let suffix = if trimmed.chars().count() > ERROR_SNIPPET_CHARS {
                "..."
            } else {
                ""
            };
            return Err(MetadataError::Request(format!(
                "status {code} url={url}: {snippet}{suffix}"
            )));
        }
        let body = body.map_err(|err| MetadataError::Request(format!("read body: {err}")))?;
        parse_recording(&body)
    }

    fn recording_url(&self, mbid: &str) -> String {
        format!("{}/recording/{}", self.base_url, mbid)
    }
}

#[async_trait]
impl MetadataEnricher for MusicBrainzClient {
    async fn enrich(&self, metadata_id: &str) -> Result<TagRecord, MetadataError> {
        let client = self.clone();
        let mbid = metadata_id.to_string();
        let recording = tokio::task::spawn_blocking(move || client.lookup_recording(&mbid))
            .await
            .map_err(|err| MetadataError::Request(format!("lookup task failed: {err}")))??;
        tracing::debug!(
            recording_id = %recording.id,
            title = %recording.title,
            releases = recording.releases.len(),
            isrcs = ?recording.isrcs,
            "musicbrainz recording resolved"
        );
        Ok(TagRecord::from_recording(&recording))
    }
}

/// Enricher used when MusicBrainz is switched off in config.
pub struct DisabledEnricher;

#[async_trait]
impl MetadataEnricher for DisabledEnricher {
    async fn enrich(&self, _metadata_id: &str) -> Result<TagRecord, MetadataError> {
        Err(MetadataError::Disabled)
    }
}

fn parse_recording(body: &str) -> Result<Recording, MetadataError> {
    serde_json::from_str(body).map_err(|err| MetadataError::Parse(err.to_string()))
}

/// Recording as returned by `/ws/2/recording/{mbid}`.
#[derive(Debug, Default, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "first-release-date", default)]
    pub first_release_date: Option<String>,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    pub releases: Vec<ReleaseSummary>,
    #[serde(default)]
    pub isrcs: Vec<String>,
    #[serde(default)]
    pub genres: Vec<TagName>,
    #[serde(default)]
    pub tags: Vec<TagName>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistCredit {
    /// Credited name, which may differ from the artist's canonical name.
    pub name: Option<String>,
    pub joinphrase: Option<String>,
    pub artist: Option<ArtistRef>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub date: Option<String>,
    #[serde(rename = "release-group")]
    pub release_group: Option<ReleaseGroupRef>,
    #[serde(default)]
    pub genres: Vec<TagName>,
    #[serde(default)]
    pub tags: Vec<TagName>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseGroupRef {
    #[serde(default)]
    pub id: String,
}

/// Genre or folksonomy tag; only the name is used.
#[derive(Debug, Deserialize)]
pub struct TagName {
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "b1a9c0e9-d987-4042-ae91-78d6a3267d69",
        "title": "Song",
        "first-release-date": "1985-06-01",
        "isrcs": ["GBAYE8500001"],
        "artist-credit": [
            {"name": "A-ha", "joinphrase": " & ", "artist": {"id": "art-1", "name": "a-ha", "sort-name": "a-ha"}},
            {"name": "", "joinphrase": "", "artist": {"id": "art-2", "name": "Guest"}}
        ],
        "releases": [
            {"id": "rel-1", "title": "Hunting High and Low", "date": "1985-06-01",
             "release-group": {"id": "rg-1", "primary-type": "Album"},
             "genres": [{"name": "synth-pop", "count": 3}]},
            {"id": "rel-2", "title": "Greatest Hits", "date": null}
        ],
        "genres": [{"name": "Pop", "count": 5, "id": "g-1"}],
        "tags": [{"name": "pop", "count": 2}, {"name": "80s", "count": 1}],
        "relations": [{"type": "performance", "target-type": "work"}]
    }"#;

    fn settings() -> MusicBrainzSettings {
        MusicBrainzSettings {
            enabled: true,
            user_agent: "audio-fetch-tests/0.1 (local testing)".to_string(),
            base_url: "https://musicbrainz.org/ws/2/".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn parse_recording_reads_lookup_payload() {
        let rec = parse_recording(SAMPLE).expect("parse");
        assert_eq!(rec.title, "Song");
        assert_eq!(rec.artist_credit.len(), 2);
        assert_eq!(rec.releases.len(), 2);
        assert_eq!(
            rec.releases[0].release_group.as_ref().map(|group| group.id.as_str()),
            Some("rg-1")
        );
        assert!(rec.releases[1].date.is_none());
        assert_eq!(rec.isrcs, vec!["GBAYE8500001"]);
    }

    #[test]
    fn parsed_recording_builds_tag_record() {
        let tags = TagRecord::from_recording(&parse_recording(SAMPLE).expect("parse"));
        assert_eq!(tags.artist.as_deref(), Some("A-ha & Guest"));
        assert_eq!(tags.album.as_deref(), Some("Hunting High and Low"));
        assert_eq!(tags.genre.as_deref(), Some("Pop, 80s, synth-pop"));
        assert_eq!(tags.artist_ids, vec!["art-1", "art-2"]);
    }

    #[test]
    fn parse_recording_rejects_garbage() {
        assert!(matches!(
            parse_recording("<html>"),
            Err(MetadataError::Parse(_))
        ));
    }

    #[test]
    fn recording_url_trims_trailing_slash() {
        let client = MusicBrainzClient::new(&settings());
        assert_eq!(
            client.recording_url("abc"),
            "https://musicbrainz.org/ws/2/recording/abc"
        );
    }

    #[test]
    fn lookup_rejects_non_uuid_ids_without_network() {
        let client = MusicBrainzClient::new(&settings());
        assert!(matches!(
            client.lookup_recording("not-a-uuid"),
            Err(MetadataError::InvalidId(_))
        ));
    }

    #[actix_web::test]
    async fn disabled_enricher_always_errors() {
        assert!(matches!(
            DisabledEnricher.enrich("b1a9c0e9-d987-4042-ae91-78d6a3267d69").await,
            Err(MetadataError::Disabled)
        ));
    }

    #[test]
    #[ignore]
    fn live_lookup_recording() {
        let client = MusicBrainzClient::new(&settings());
        let rec = client
            .lookup_recording("12a5b094-3804-4c97-82b8-9c7cc5d4f4ab")
            .expect("lookup recording");
        assert!(!rec.title.is_empty());
    }
}
