use anyhow::{Context, Result};
use audio_fetch_types::DownloadResponse;

/// Call `/download` and decode the JSON form of the result.
///
/// The request blocks until the server has finished transcoding, so no
/// client-side timeout is applied.
pub(crate) fn download(
    server: &str,
    id: &str,
    musicbrainz_id: Option<&str>,
) -> Result<DownloadResponse> {
    let url = download_url(server, id, musicbrainz_id);
    tracing::debug!(url = %url, "requesting download");
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into();
    let mut resp = agent.get(&url).call().context("request /download")?;
    let status = resp.status();
    let body = resp
        .body_mut()
        .read_to_string()
        .context("read /download response body")?;
    if !status.is_success() {
        return Err(anyhow::anyhow!(
            "download failed with {}: {}",
            status,
            body.trim()
        ));
    }
    serde_json::from_str(&body).context("decode /download response")
}

fn download_url(server: &str, id: &str, musicbrainz_id: Option<&str>) -> String {
    let mut url = format!(
        "{}/download?id={}&format=json",
        server.trim_end_matches('/'),
        urlencoding::encode(id)
    );
    if let Some(mbid) = musicbrainz_id.map(str::trim).filter(|mbid| !mbid.is_empty()) {
        url.push_str("&musicbrainzid=");
        url.push_str(&urlencoding::encode(mbid));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_encodes_parameters() {
        assert_eq!(
            download_url("http://host:3333/", "https://youtu.be/abc?t=1", None),
            "http://host:3333/download?id=https%3A%2F%2Fyoutu.be%2Fabc%3Ft%3D1&format=json"
        );
        assert_eq!(
            download_url("http://host:3333", "abc", Some(" mbid-1 ")),
            "http://host:3333/download?id=abc&format=json&musicbrainzid=mbid-1"
        );
        assert_eq!(
            download_url("http://host:3333", "abc", Some("  ")),
            "http://host:3333/download?id=abc&format=json"
        );
    }
}
