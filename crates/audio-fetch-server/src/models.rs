//! API models and OpenAPI schemas.

use serde::Deserialize;
use utoipa::IntoParams;

/// Query string for `/download`.
///
/// Every field is optional at the parsing layer so that a missing `id` is
/// reported with a descriptive 400 body instead of actix's generic one.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
pub struct DownloadQuery {
    /// Source video id or URL.
    #[serde(default)]
    pub id: Option<String>,
    /// MusicBrainz recording id used for tagging.
    #[serde(default)]
    pub musicbrainzid: Option<String>,
    /// Response format: `json`, or plain text when absent.
    #[serde(default)]
    pub format: Option<String>,
}

impl DownloadQuery {
    pub fn wants_json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|format| format.trim().eq_ignore_ascii_case("json"))
    }
}
