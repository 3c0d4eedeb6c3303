//! Normalized tag record built from a MusicBrainz recording.

use std::collections::HashSet;

use crate::musicbrainz::{ArtistCredit, Recording, TagName};

/// Descriptive and provenance tags attached to a transcoded file.
///
/// Every field is trimmed; blank values are stored as `None` so the transcoder
/// never writes empty frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagRecord {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
    pub recording_id: Option<String>,
    pub release_id: Option<String>,
    pub release_group_id: Option<String>,
    pub artist_ids: Vec<String>,
}

impl TagRecord {
    /// Build the record for a single recording lookup.
    pub fn from_recording(rec: &Recording) -> Self {
        let first_release = rec.releases.first();

        let date = first_release
            .and_then(|release| release.date.as_deref().and_then(non_empty))
            .or_else(|| rec.first_release_date.as_deref().and_then(non_empty));

        let mut genres: Vec<&str> = Vec::new();
        collect_names(&mut genres, &rec.genres);
        collect_names(&mut genres, &rec.tags);
        for release in &rec.releases {
            collect_names(&mut genres, &release.genres);
            collect_names(&mut genres, &release.tags);
        }
        let genres = unique_non_empty(genres, |item| item.to_lowercase());

        let artist_ids = unique_non_empty(
            rec.artist_credit
                .iter()
                .filter_map(|credit| credit.artist.as_ref())
                .map(|artist| artist.id.as_str()),
            |item| item.to_string(),
        );

        Self {
            title: non_empty(&rec.title),
            artist: non_empty(&artist_credit_string(&rec.artist_credit)),
            album: first_release.and_then(|release| non_empty(&release.title)),
            date,
            genre: (!genres.is_empty()).then(|| genres.join(", ")),
            recording_id: non_empty(&rec.id),
            release_id: first_release.and_then(|release| non_empty(&release.id)),
            release_group_id: first_release
                .and_then(|release| release.release_group.as_ref())
                .and_then(|group| non_empty(&group.id)),
            artist_ids,
        }
    }

    /// True when no field would produce a tag.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Join credited artist names with their join phrases.
///
/// The credit's own name wins over the artist's canonical name; credits with
/// neither are skipped.
pub fn artist_credit_string(credits: &[ArtistCredit]) -> String {
    let mut out = String::new();
    for credit in credits {
        let name = credit
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| {
                credit
                    .artist
                    .as_ref()
                    .map(|artist| artist.name.as_str())
                    .filter(|name| !name.is_empty())
            });
        let Some(name) = name else {
            continue;
        };
        out.push_str(name);
        out.push_str(credit.joinphrase.as_deref().unwrap_or(""));
    }
    out.trim().to_string()
}

fn collect_names<'a>(out: &mut Vec<&'a str>, items: &'a [TagName]) {
    out.extend(items.iter().map(|item| item.name.as_str()));
}

/// Trim, drop blanks, and keep the first occurrence of each key.
///
/// The caller picks the comparison through `key`: genres compare by their
/// lowercased text, so "Rock" and "rock" collapse and the first spelling is
/// kept; artist ids compare exactly.
fn unique_non_empty<'a, I, K>(items: I, key: K) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
    K: Fn(&str) -> String,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.trim();
        if item.is_empty() || !seen.insert(key(item)) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
