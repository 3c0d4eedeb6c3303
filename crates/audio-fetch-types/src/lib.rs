//! Wire types shared by the fetch server and its clients.

use serde::{Deserialize, Serialize};

/// MIME type reported for every transcoded file.
pub const MP3_MIME: &str = "audio/mpeg";

/// Result of a completed `/download` request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DownloadResponse {
    /// Base name of the tagged file inside the output directory.
    pub file_name: String,
    /// MIME type resolved from the final extension.
    pub mime_type: String,
    /// Size of the final file in bytes.
    pub size_bytes: u64,
}

impl DownloadResponse {
    /// Plain-text form returned when the caller did not ask for JSON.
    pub fn summary(&self) -> String {
        format!("Success! Downloaded {} ({})", self.file_name, self.mime_type)
    }
}

/// Liveness probe payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: String,
}
