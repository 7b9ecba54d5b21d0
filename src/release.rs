use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

/// One Bandcamp release notification scraped from a Gmail message.
///
/// The canonical release URL (query and fragment stripped) is the natural
/// key; every other field is best-effort. Records without a parseable
/// `date` are returned to callers but never written to the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_track: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
}

impl Release {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.title.is_none()
            && self.page_name.is_none()
            && self.date.is_none()
            && self.url.is_none()
            && self.release_id.is_none()
            && self.is_track.is_none()
            && self.img_url.is_none()
    }
}

/// Strip query parameters and fragment so the same release mailed twice
/// (with different tracking parameters) compares equal. Input that does
/// not parse as a URL is kept verbatim rather than discarded.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            Some(url.to_string())
        }
        Err(_) => Some(raw.to_owned()),
    }
}

/// Single dedup pass keyed by release URL: the first occurrence wins and
/// keeps its position. Records without a URL are placeholders and are
/// always retained.
pub fn dedupe_by_url<I>(items: I) -> Vec<Release>
where
    I: IntoIterator<Item = Release>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if let Some(url) = item.url.as_deref() {
            if !seen.insert(url.to_owned()) {
                continue;
            }
        }
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(url: Option<&str>, page: &str) -> Release {
        Release {
            page_name: Some(page.to_owned()),
            url: url.map(str::to_owned),
            ..Release::default()
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let a = rel(Some("https://x.bandcamp.com/album/a"), "First Page");
        let b = rel(Some("https://x.bandcamp.com/album/a"), "FIRST PAGE");
        let c = rel(Some("https://x.bandcamp.com/album/c"), "Other");

        let out = dedupe_by_url([a.clone(), b, c.clone()]);
        assert_eq!(out, vec![a, c]);
    }

    #[test]
    fn dedupe_retains_records_without_url() {
        let out = dedupe_by_url([rel(None, "one"), rel(None, "two")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn normalize_url_strips_query_and_fragment() {
        let url = normalize_url("https://x.bandcamp.com/album/a?from=email#player");
        assert_eq!(url.as_deref(), Some("https://x.bandcamp.com/album/a"));
    }

    #[test]
    fn normalize_url_keeps_unparseable_input() {
        assert_eq!(normalize_url("not a url").as_deref(), Some("not a url"));
        assert_eq!(normalize_url("   "), None);
    }
}
