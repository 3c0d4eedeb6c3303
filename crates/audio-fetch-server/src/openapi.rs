use audio_fetch_types::{DownloadResponse, HealthResponse};
use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::download::download,
        api::health::health,
    ),
    components(
        schemas(
            DownloadResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "audio-fetch-server", description = "Audio download and tagging API")
    )
)]
pub struct ApiDoc;
