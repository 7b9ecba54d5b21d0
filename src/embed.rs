use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{read_json_lenient, write_json_atomic};

pub const EMBED_FILE: &str = "embed_cache.json";

const PLAYER_BASE: &str = "https://bandcamp.com/EmbeddedPlayer";

/// Embed-player metadata scraped from one Bandcamp release page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedInfo {
    pub release_id: Option<u64>,
    pub is_track: Option<bool>,
    pub embed_url: Option<String>,
}

impl EmbedInfo {
    /// Complete entries never need another page fetch.
    pub fn is_complete(&self) -> bool {
        self.release_id.is_some() && self.is_track.is_some() && self.embed_url.is_some()
    }
}

/// Cache of embed metadata keyed by canonical release URL.
///
/// An explicit instance, passed to whoever renders players; callers that
/// share a data directory with another process call `reload` before
/// reading.
#[derive(Debug)]
pub struct EmbedCache {
    path: PathBuf,
    entries: HashMap<String, EmbedInfo>,
}

impl EmbedCache {
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(EMBED_FILE);
        let entries = read_json_lenient(&path).unwrap_or_default();
        Self { path, entries }
    }

    pub fn reload(&mut self) {
        self.entries = read_json_lenient(&self.path).unwrap_or_default();
    }

    pub fn get(&self, url: &str) -> Option<&EmbedInfo> {
        self.entries.get(url)
    }

    /// Field-wise merge: a known value is never clobbered by an absent
    /// one, so repeated partial scrapes only ever add information.
    pub fn merge(&mut self, url: &str, meta: EmbedInfo) -> &EmbedInfo {
        let entry = self.entries.entry(url.to_owned()).or_default();
        if meta.release_id.is_some() {
            entry.release_id = meta.release_id;
        }
        if meta.is_track.is_some() {
            entry.is_track = meta.is_track;
        }
        if meta.embed_url.is_some() {
            entry.embed_url = meta.embed_url;
        }
        entry
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.entries)
    }
}

pub fn build_embed_url(release_id: u64, is_track: bool) -> String {
    let kind = if is_track { "track" } else { "album" };
    format!(
        "{PLAYER_BASE}/{kind}={release_id}/size=large/bgcol=ffffff/linkcol=0687f5/tracklist=true/artwork=small/transparent=true/"
    )
}

pub fn guess_is_track(release_url: &str) -> bool {
    release_url.contains("/track/")
}

/// Scrape a release page for the numeric item id and type. Network or
/// markup misses degrade to whatever the URL itself tells us.
pub async fn fetch_embed_metadata(
    client: &reqwest::Client,
    release_url: &str,
) -> anyhow::Result<EmbedInfo> {
    let response = client
        .get(release_url)
        .header(reqwest::header::USER_AGENT, "bcfeed/0.1")
        .send()
        .await
        .with_context(|| format!("GET {release_url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("fetch {release_url}: status {}", response.status());
    }
    let html = response.text().await.context("read release page body")?;

    let mut info = EmbedInfo {
        is_track: Some(guess_is_track(release_url)),
        ..EmbedInfo::default()
    };
    let Some(props) = extract_page_properties(&html) else {
        return Ok(info);
    };

    info.release_id = props.get("item_id").and_then(|v| v.as_u64());
    if let Some(item_type) = props.get("item_type").and_then(|v| v.as_str())
        && !item_type.is_empty()
    {
        info.is_track = Some(item_type == "track" || item_type == "t");
    }
    if let (Some(id), Some(is_track)) = (info.release_id, info.is_track) {
        info.embed_url = Some(build_embed_url(id, is_track));
    }

    Ok(info)
}

/// Pull the JSON out of `<meta name="bc-page-properties" content="…">`.
/// The attribute value is HTML-escaped and occasionally single-quoted.
pub fn extract_page_properties(html: &str) -> Option<serde_json::Value> {
    let marker = html.find("bc-page-properties")?;
    let rest = &html[marker..];
    let content_start = rest.find("content=\"")? + "content=\"".len();
    let rest = &rest[content_start..];
    let content_end = rest.find('"')?;

    let raw = unescape_html(&rest[..content_end]);
    serde_json::from_str(&raw)
        .ok()
        .or_else(|| serde_json::from_str(&raw.replace('\'', "\"")).ok())
}

fn unescape_html(input: &str) -> String {
    input
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
