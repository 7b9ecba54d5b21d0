use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use crate::cli::DashboardArgs;
use crate::embed::{EmbedCache, EmbedInfo, build_embed_url, fetch_embed_metadata};
use crate::ranges::parse_cli_date;
use crate::release::Release;
use crate::store::ReleaseStore;

/// One row of the dashboard: the release plus whatever embed metadata is
/// already cached, so the page only asks the relay for the rest.
#[derive(Debug, Serialize)]
struct DashboardEntry {
    #[serde(flatten)]
    release: Release,
    #[serde(skip_serializing_if = "Option::is_none")]
    embed_url: Option<String>,
}

fn entries(releases: &[Release], embeds: &EmbedCache) -> Vec<DashboardEntry> {
    releases
        .iter()
        .map(|release| {
            let cached = release
                .url
                .as_deref()
                .and_then(|url| embeds.get(url))
                .cloned()
                .unwrap_or_default();

            let mut release = release.clone();
            release.release_id = release.release_id.or(cached.release_id);
            release.is_track = release.is_track.or(cached.is_track);
            let embed_url = cached.embed_url.or_else(|| {
                release
                    .release_id
                    .map(|id| build_embed_url(id, release.is_track.unwrap_or(false)))
            });

            DashboardEntry { release, embed_url }
        })
        .collect()
}

/// Render cached releases into paginated HTML pages. Each page embeds
/// its releases as JSON and a script that does sorting, label filtering,
/// lazy player loading via the relay's `/embed-meta`, and viewed marking
/// via `/viewed-state`.
pub fn render_dashboard_pages(
    releases: &[Release],
    embeds: &EmbedCache,
    per_page: usize,
    relay_url: &str,
) -> Vec<String> {
    let per_page = per_page.max(1);
    let total_pages = releases.len().div_ceil(per_page).max(1);

    releases
        .chunks(per_page)
        .enumerate()
        .map(|(index, chunk)| {
            render_page(&entries(chunk, embeds), relay_url, index + 1, total_pages)
        })
        .collect()
}

pub fn write_dashboard(out_dir: &Path, pages: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create dashboard dir: {}", out_dir.display()))?;

    let mut paths = Vec::with_capacity(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let path = out_dir.join(format!("page_{}.html", index + 1));
        std::fs::write(&path, page)
            .with_context(|| format!("write dashboard page: {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}

fn render_page(
    entries: &[DashboardEntry],
    relay_url: &str,
    page: usize,
    total_pages: usize,
) -> String {
    // `</` would terminate the inline JSON block early.
    let data_json = serde_json::to_string(entries)
        .unwrap_or_else(|_| "[]".to_owned())
        .replace("</", "<\\/");
    let relay_json =
        serde_json::to_string(relay_url.trim_end_matches('/')).unwrap_or_else(|_| "\"\"".to_owned());

    let mut doc = String::from(PAGE_HEAD);
    doc.push_str("<main>\n");
    doc.push_str(
        "<aside class=\"filters\"><div class=\"filter-title\">Filter by Label/Page</div>\n\
         <div id=\"label-filters\" class=\"filter-list\"></div></aside>\n",
    );
    doc.push_str(
        "<table>\n<thead><tr>\
         <th data-sort=\"page_name\">Label/Page <span class=\"sort-indicator\"></span></th>\
         <th data-sort=\"artist\">Artist <span class=\"sort-indicator\"></span></th>\
         <th data-sort=\"title\">Title <span class=\"sort-indicator\"></span></th>\
         <th data-sort=\"date\">Date <span class=\"sort-indicator\"></span></th>\
         <th>Viewed</th>\
         </tr></thead>\n<tbody id=\"release-rows\"></tbody>\n</table>\n",
    );
    doc.push_str(
        "<div id=\"empty-state\" style=\"display: none;\">No releases match the current filter.</div>\n",
    );
    doc.push_str("<p class=\"pager\">");
    doc.push_str(&page_links(page, total_pages));
    doc.push_str("</p>\n</main>\n");

    doc.push_str("<script id=\"release-data\" type=\"application/json\">");
    doc.push_str(&data_json);
    doc.push_str("</script>\n<script>\nconst RELAY_BASE = ");
    doc.push_str(&relay_json);
    doc.push_str(";\n");
    doc.push_str(APP_JS);
    doc.push_str("</script>\n</body>\n</html>\n");
    doc
}

fn page_links(current: usize, total: usize) -> String {
    let mut out = String::new();
    if current > 1 {
        out.push_str(&format!("<a href=\"page_{}.html\">&lt;</a> ", current - 1));
    }
    for page in 1..=total {
        if page == current {
            out.push_str(&format!("<b>{page}</b> "));
        } else {
            out.push_str(&format!("<a href=\"page_{page}.html\">{page}</a> "));
        }
    }
    if current < total {
        out.push_str(&format!("<a href=\"page_{}.html\">&gt;</a>", current + 1));
    }
    out
}

const PAGE_HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8" />
<meta name="viewport" content="width=device-width, initial-scale=1" />
<title>Bandcamp releases</title>
<style>
  body { margin: 0; font-family: system-ui, sans-serif; background: #0f1116; color: #f4f6fb; }
  main { max-width: 960px; margin: 0 auto; padding: 24px; }
  table { width: 100%; border-collapse: collapse; }
  th, td { padding: 8px 10px; border-bottom: 1px solid #222735; text-align: left; }
  th[data-sort] { cursor: pointer; color: #a8b0c2; }
  a.link { color: #52d0ff; text-decoration: none; }
  tr.data-row { cursor: pointer; }
  tr.data-row.viewed td { color: #a8b0c2; }
  tr.detail-row td { background: #181b22; }
  .filters { margin-bottom: 16px; }
  .filter-title { color: #a8b0c2; margin-bottom: 6px; }
  .filter-item { display: inline-block; margin-right: 12px; }
  .pager { margin-top: 16px; }
  .pager a { color: #52d0ff; }
  #empty-state { color: #a8b0c2; padding: 16px 0; }
  button.viewed-toggle { background: #181b22; color: #f4f6fb; border: 1px solid #222735; border-radius: 6px; cursor: pointer; padding: 4px 8px; }
</style>
</head>
<body>
"#;

const APP_JS: &str = r##"const releases = JSON.parse(document.getElementById("release-data").textContent);
const state = {
  sortKey: "date",
  direction: "desc",
  activeLabels: new Set(),
  viewed: new Set(),
};

function formatDate(value) {
  if (!value) return "";
  const parsed = new Date(value);
  if (isNaN(parsed.getTime())) return value;
  return parsed.toLocaleDateString(undefined, { year: "numeric", month: "short", day: "numeric" });
}

function buildEmbedUrl(id, isTrack) {
  if (!id) return null;
  const kind = isTrack ? "track" : "album";
  return `https://bandcamp.com/EmbeddedPlayer/${kind}=${id}/size=large/bgcol=ffffff/linkcol=0687f5/tracklist=true/artwork=small/transparent=true/`;
}

async function ensureEmbed(release) {
  if (release.embed_url) return release.embed_url;
  if (!release.url) return null;
  try {
    const response = await fetch(`${RELAY_BASE}/embed-meta?url=${encodeURIComponent(release.url)}`);
    if (!response.ok) return null;
    const meta = await response.json();
    release.release_id = meta.release_id;
    release.is_track = meta.is_track;
    release.embed_url = meta.embed_url || buildEmbedUrl(meta.release_id, meta.is_track);
    return release.embed_url;
  } catch (err) {
    console.warn("embed lookup failed", err);
    return null;
  }
}

function getEmbedPromise(release) {
  if (!release._embedPromise) {
    release._embedPromise = ensureEmbed(release);
  }
  return release._embedPromise;
}

async function loadViewedState() {
  try {
    const response = await fetch(`${RELAY_BASE}/viewed-state`);
    if (response.ok) {
      const body = await response.json();
      state.viewed = new Set(body.viewed || []);
    }
  } catch (err) {
    console.warn("viewed-state unavailable", err);
  }
  renderRows();
}

async function toggleViewed(release) {
  if (!release.url) return;
  if (state.viewed.has(release.url)) {
    state.viewed.delete(release.url);
  } else {
    state.viewed.add(release.url);
  }
  renderRows();
  try {
    await fetch(`${RELAY_BASE}/viewed-state`, {
      method: "POST",
      headers: { "content-type": "application/json" },
      body: JSON.stringify({ viewed: [...state.viewed] }),
    });
  } catch (err) {
    console.warn("viewed-state save failed", err);
  }
}

function renderFilters() {
  const labels = [...new Set(releases.map(r => r.page_name).filter(Boolean))].sort();
  const container = document.getElementById("label-filters");
  container.innerHTML = "";
  labels.forEach(label => {
    const wrapper = document.createElement("label");
    wrapper.className = "filter-item";
    const input = document.createElement("input");
    input.type = "checkbox";
    input.addEventListener("change", () => {
      if (input.checked) state.activeLabels.add(label);
      else state.activeLabels.delete(label);
      renderRows();
    });
    wrapper.appendChild(input);
    wrapper.appendChild(document.createTextNode(" " + label));
    container.appendChild(wrapper);
  });
}

function sortData(items) {
  const { sortKey, direction } = state;
  const factor = direction === "asc" ? 1 : -1;
  return items.slice().sort((a, b) => {
    const av = (a[sortKey] || "").toString().toLowerCase();
    const bv = (b[sortKey] || "").toString().toLowerCase();
    if (av < bv) return -1 * factor;
    if (av > bv) return 1 * factor;
    return 0;
  });
}

function closeOpenDetailRows() {
  document.querySelectorAll("tr.detail-row").forEach(row => row.remove());
  document.querySelectorAll("tr.expanded").forEach(row => row.classList.remove("expanded"));
}

function createDetailRow(release) {
  const detail = document.createElement("tr");
  detail.className = "detail-row";
  detail.innerHTML = `<td colspan="5"><div data-embed-target>Loading player…</div></td>`;
  return detail;
}

function renderRows() {
  const tbody = document.getElementById("release-rows");
  tbody.innerHTML = "";

  const filtered = releases.filter(r => {
    if (!state.activeLabels.size) return true;
    return state.activeLabels.has(r.page_name);
  });
  const sorted = sortData(filtered);
  document.getElementById("empty-state").style.display = sorted.length ? "none" : "block";

  sorted.forEach(release => {
    const tr = document.createElement("tr");
    tr.className = "data-row";
    if (release.url && state.viewed.has(release.url)) tr.classList.add("viewed");

    const cell = (text) => {
      const td = document.createElement("td");
      td.textContent = text || "";
      return td;
    };
    const linkCell = (text, href) => {
      const td = document.createElement("td");
      const a = document.createElement("a");
      a.className = "link";
      a.textContent = text || "";
      a.href = href || "#";
      a.target = "_blank";
      a.rel = "noopener";
      a.addEventListener("click", e => e.stopPropagation());
      td.appendChild(a);
      return td;
    };

    tr.appendChild(cell(release.page_name));
    tr.appendChild(cell(release.artist));
    tr.appendChild(linkCell(release.title || release.url, release.url));
    tr.appendChild(cell(formatDate(release.date)));

    const actions = document.createElement("td");
    const button = document.createElement("button");
    button.className = "viewed-toggle";
    button.textContent = release.url && state.viewed.has(release.url) ? "Viewed" : "Mark viewed";
    button.addEventListener("click", e => {
      e.stopPropagation();
      toggleViewed(release);
    });
    actions.appendChild(button);
    tr.appendChild(actions);

    tr.addEventListener("click", () => {
      const existing = tr.nextElementSibling;
      const wasOpen = existing && existing.classList.contains("detail-row");
      closeOpenDetailRows();
      if (wasOpen) return;

      const detail = createDetailRow(release);
      tr.after(detail);
      tr.classList.add("expanded");

      const target = detail.querySelector("[data-embed-target]");
      getEmbedPromise(release).then(embedUrl => {
        if (!embedUrl) {
          target.textContent = "No embed available.";
          return;
        }
        const height = release.is_track ? 320 : 480;
        target.innerHTML = `<iframe title="Bandcamp player" style="border:0; width:100%; height:${height}px;" src="${embedUrl}" seamless></iframe>`;
      });
    });
    tr.addEventListener("mouseenter", () => {
      getEmbedPromise(release);
    });

    tbody.appendChild(tr);
  });
  refreshSortIndicators();
}

function refreshSortIndicators() {
  document.querySelectorAll("th[data-sort]").forEach(th => {
    const indicator = th.querySelector(".sort-indicator");
    indicator.textContent = state.sortKey === th.dataset.sort
      ? (state.direction === "asc" ? "▲" : "▼")
      : "";
  });
}

document.querySelectorAll("th[data-sort]").forEach(th => {
  th.addEventListener("click", () => {
    const key = th.dataset.sort;
    if (state.sortKey === key) {
      state.direction = state.direction === "asc" ? "desc" : "asc";
    } else {
      state.sortKey = key;
      state.direction = key === "date" ? "desc" : "asc";
    }
    renderRows();
  });
});

renderFilters();
renderRows();
loadViewedState();
"##;

pub async fn run(args: DashboardArgs) -> anyhow::Result<()> {
    let start = parse_cli_date(&args.after).context("parse --after")?;
    let end = parse_cli_date(&args.before).context("parse --before")?;
    if start > end {
        anyhow::bail!("--after must be on or before --before");
    }

    let store = ReleaseStore::new(&args.data_dir);
    let (mut releases, missing) = store.releases_for_range(start, end);
    if !missing.is_empty() {
        tracing::warn!(
            days = missing.len(),
            "range has uncached days; run `bcfeed gather` first to fill them"
        );
    }
    if args.max_results > 0 {
        releases.truncate(args.max_results);
    }

    let mut embeds = EmbedCache::open(&args.data_dir);
    if args.fetch_embeds {
        fetch_missing_embeds(&mut embeds, &releases).await?;
    }

    let pages = render_dashboard_pages(&releases, &embeds, args.per_page, &args.relay_url);
    let paths = write_dashboard(&args.out, &pages)?;
    tracing::info!(
        releases = releases.len(),
        pages = paths.len(),
        out = %args.out.display(),
        "dashboard written"
    );
    Ok(())
}

async fn fetch_missing_embeds(embeds: &mut EmbedCache, releases: &[Release]) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("build embed http client")?;

    let total = releases.len();
    for (index, release) in releases.iter().enumerate() {
        let Some(url) = release.url.as_deref() else {
            continue;
        };
        if embeds.get(url).is_some_and(EmbedInfo::is_complete) {
            continue;
        }

        tracing::info!(progress = %format!("{}/{total}", index + 1), url, "fetching embed metadata");
        match fetch_embed_metadata(&client, url).await {
            Ok(meta) => {
                embeds.merge(url, meta);
            }
            Err(err) => tracing::warn!(url, %err, "embed metadata fetch failed; leaving a plain link"),
        }
    }

    embeds.persist().context("persist embed cache")?;
    Ok(())
}
