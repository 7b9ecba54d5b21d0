use chrono::NaiveDate;
use mailparse::MailHeaderMap as _;

use crate::release::{Release, normalize_url};

const SUBJECT_PREFIX: &str = "New release from ";

/// Pull release fields out of one raw Gmail message.
///
/// Bandcamp notification markup changes without notice, so everything in
/// here is best-effort string scanning: each field is extracted
/// independently and a miss leaves the field `None`. Only a message that
/// yields no field at all (or does not parse as mail) is rejected; the
/// caller skips it with a warning.
pub fn extract_release(raw: &[u8]) -> Option<Release> {
    let mail = mailparse::parse_mail(raw).ok()?;

    let page_name = mail
        .headers
        .get_first_value("Subject")
        .and_then(|subject| page_name_from_subject(&subject));
    let date = mail
        .headers
        .get_first_value("Date")
        .and_then(|value| date_from_header(&value));

    let html = html_body(&mail).unwrap_or_default();
    let url = release_url(&html);
    let is_track = url.as_deref().map(|u| u.contains("/track/"));
    let img_url = image_url(&html);
    let (title, artist) = title_and_artist(&html);

    let release = Release {
        artist,
        title,
        page_name,
        date,
        url,
        release_id: None,
        is_track,
        img_url,
    };
    if release.is_empty() {
        return None;
    }
    Some(release)
}

fn page_name_from_subject(subject: &str) -> Option<String> {
    let name = subject.trim().strip_prefix(SUBJECT_PREFIX)?;
    let name = name.trim().trim_matches('"').trim();
    if name.is_empty() {
        return None;
    }
    Some(name.to_owned())
}

fn date_from_header(value: &str) -> Option<NaiveDate> {
    let secs = mailparse::dateparse(value).ok()?;
    let stamp = chrono::DateTime::from_timestamp(secs, 0)?;
    Some(stamp.date_naive())
}

/// First text/html part, depth first; a single-part message falls back
/// to its own body.
fn html_body(mail: &mailparse::ParsedMail<'_>) -> Option<String> {
    if mail.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        return mail.get_body().ok();
    }
    for part in &mail.subparts {
        if let Some(body) = html_body(part) {
            return Some(body);
        }
    }
    if mail.subparts.is_empty() {
        return mail.get_body().ok();
    }
    None
}

/// The first https anchor in the notification body is the release link;
/// tracking query parameters are stripped to form the natural key.
fn release_url(html: &str) -> Option<String> {
    let start = html.find("href=\"https://")? + "href=\"".len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    normalize_url(&rest[..end])
}

/// First `http…jpg` span, the way the cover art is inlined.
fn image_url(html: &str) -> Option<String> {
    let end = html.find(".jpg")? + ".jpg".len();
    let start = html[..end].rfind("http")?;
    if start >= end {
        return None;
    }
    Some(html[start..end].to_owned())
}

/// The release anchor's text is the title; the "by <artist>" line that
/// follows names the artist.
fn title_and_artist(html: &str) -> (Option<String>, Option<String>) {
    let anchor_start = match html.find("href=\"https://") {
        Some(idx) => idx,
        None => return (None, None),
    };
    let rest = &html[anchor_start..];

    let title = text_after(rest, ">").filter(|t| !t.is_empty());
    let artist = rest
        .find(">by ")
        .or_else(|| rest.find("\nby "))
        .and_then(|idx| text_at(&rest[idx + 1..], "by ".len()))
        .filter(|a| !a.is_empty());

    (title, artist)
}

fn text_after(s: &str, open: &str) -> Option<String> {
    let start = s.find(open)? + open.len();
    text_at(&s[start..], 0)
}

fn text_at(s: &str, skip: usize) -> Option<String> {
    let s = s.get(skip..)?;
    let end = s
        .find(|c| c == '<' || c == '\r' || c == '\n')
        .unwrap_or(s.len());
    Some(s[..end].trim().to_owned())
}
