use actix_web::{HttpResponse, Responder, get, web};
use audio_fetch_types::DownloadResponse;
use tokio_util::sync::CancellationToken;

use crate::models::DownloadQuery;
use crate::pipeline::MediaRequest;
use crate::state::AppState;

/// Download a source's audio, tag it and store it as MP3.
///
/// Responds with a plain-text summary unless `format=json` is given.
#[utoipa::path(
    get,
    path = "/download",
    params(DownloadQuery),
    responses(
        (status = 200, description = "Audio downloaded and tagged", body = DownloadResponse),
        (status = 400, description = "Missing id parameter"),
        (status = 500, description = "Local I/O or transcoder failure"),
        (status = 502, description = "Stream acquisition failed"),
        (status = 504, description = "Stream acquisition timed out")
    )
)]
#[get("/download")]
pub async fn download(
    state: web::Data<AppState>,
    query: web::Query<DownloadQuery>,
) -> impl Responder {
    let request = match MediaRequest::new(query.id.as_deref(), query.musicbrainzid.as_deref()) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "download rejected");
            return err.into_response();
        }
    };
    tracing::info!(
        id = %request.source_id,
        musicbrainz_id = ?request.metadata_id,
        "download requested"
    );

    let cancel = CancellationToken::new();
    // actix drops this future when the client disconnects; the guard then
    // stops the pipeline at its next acquisition checkpoint.
    let _disconnect = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let task = actix_web::rt::spawn(async move { pipeline.run(&request, &cancel).await });

    match task.await {
        Ok(Ok(outcome)) => {
            let response = outcome.to_response();
            if query.wants_json() {
                HttpResponse::Ok().json(response)
            } else {
                HttpResponse::Ok()
                    .content_type("text/plain; charset=utf-8")
                    .body(response.summary())
            }
        }
        Ok(Err(err)) => err.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "download task aborted");
            HttpResponse::InternalServerError().body("download task aborted")
        }
    }
}
