use anyhow::Context as _;
use chrono::Local;

use crate::cli::GatherArgs;
use crate::error::GatherError;
use crate::extract::extract_release;
use crate::gmail::{GmailClient, Provider};
use crate::ranges::{DateRange, collapse_date_ranges, parse_cli_date};
use crate::release::{Release, dedupe_by_url};
use crate::store::ReleaseStore;

#[derive(Debug, Clone)]
pub struct GatherOptions {
    /// Earliest date, `YYYY/MM/DD`.
    pub after: String,
    /// Latest date, `YYYY/MM/DD`.
    pub before: String,
    /// Ceiling on the total number of returned releases; zero means no
    /// cap. Once cached results alone reach it, no provider query is
    /// issued at all.
    pub max_results: usize,
    /// Message download chunk size.
    pub batch_size: usize,
    /// Keep today's date out of both caches; that day is still
    /// receiving mail.
    pub exclude_today: bool,
}

/// Reconcile the requested range against the cache, fetch only the
/// missing spans from the provider, feed results back into the cache,
/// and return one deduplicated list capped at `max_results`.
///
/// A provider failure aborts the call, but day buckets persisted before
/// the failure stay valid and the next run re-fetches only what is still
/// missing.
pub async fn gather_releases<P: Provider + ?Sized>(
    store: &ReleaseStore,
    provider: &P,
    opts: &GatherOptions,
) -> Result<Vec<Release>, GatherError> {
    let start = parse_cli_date(&opts.after)?;
    let end = parse_cli_date(&opts.before)?;
    if start > end {
        return Err(GatherError::InvalidRange { start, end });
    }

    let (cached, missing_days) = store.releases_for_range(start, end);
    let missing_ranges = collapse_date_ranges(missing_days);
    let mut releases = cached;

    if missing_ranges.is_empty() {
        tracing::info!(
            cached = releases.len(),
            "cache covers the requested range; no gmail download needed"
        );
    } else {
        tracing::info!(
            cached = releases.len(),
            spans = missing_ranges.len(),
            "missing date spans will be fetched from gmail"
        );
        for range in &missing_ranges {
            tracing::info!("  {} to {}", range.start, range.end);
        }
    }

    let cap = if opts.max_results == 0 {
        usize::MAX
    } else {
        opts.max_results
    };
    let mut cap_reached = false;
    let mut remaining = cap.saturating_sub(releases.len());
    if remaining == 0 {
        tracing::info!(
            max_results = opts.max_results,
            "result cap already satisfied by cache; skipping gmail entirely"
        );
        cap_reached = true;
    } else {
        for range in &missing_ranges {
            if remaining == 0 {
                tracing::info!(
                    max_results = opts.max_results,
                    "reached result cap; stopping further gmail downloads"
                );
                break;
            }

            let query = bandcamp_query(range);
            tracing::info!(after = %range.start, before = %range.end, remaining, "querying gmail");
            let ids = provider.search(&query, remaining).await?;
            if ids.is_empty() {
                tracing::info!(after = %range.start, before = %range.end, "no messages found");
                store.record_empty_range(*range, opts.exclude_today)?;
                continue;
            }

            tracing::info!(count = ids.len(), "found messages");
            let payloads = provider.fetch(&ids, opts.batch_size).await?;
            let new = extract_releases(&payloads);
            tracing::info!(parsed = new.len(), "parsed releases from gmail");

            store.persist_releases(&new, opts.exclude_today)?;
            releases.extend(new);
            remaining = cap.saturating_sub(releases.len());
        }
    }

    // Cache-first global dedup across everything this run touched, then
    // persist the merged list; already-cached records merge as no-ops.
    let mut merged = dedupe_by_url(releases);
    store.persist_releases(&merged, opts.exclude_today)?;

    if cap_reached {
        tracing::info!(
            total = merged.len().min(cap),
            max_results = opts.max_results,
            "final unique releases (capped, cache only)"
        );
    } else {
        tracing::info!(
            total = merged.len().min(cap),
            "final unique releases after combining cache and gmail"
        );
    }

    merged.truncate(cap);
    Ok(merged)
}

/// Parse raw messages best-effort: unreadable messages are skipped with
/// a warning, and duplicates within the batch are dropped up front.
pub fn extract_releases(payloads: &[Vec<u8>]) -> Vec<Release> {
    let mut out = Vec::new();
    for (index, payload) in payloads.iter().enumerate() {
        match extract_release(payload) {
            Some(release) => out.push(release),
            None => {
                tracing::warn!(index, "skipping message with no extractable release fields");
            }
        }
    }
    dedupe_by_url(out)
}

fn bandcamp_query(range: &DateRange) -> String {
    format!(
        "from:noreply@bandcamp.com subject:'New release from' before:{} after:{}",
        range.end.format("%Y/%m/%d"),
        range.start.format("%Y/%m/%d"),
    )
}

pub async fn run(args: GatherArgs) -> anyhow::Result<()> {
    let before = args
        .before
        .clone()
        .unwrap_or_else(|| Local::now().date_naive().format("%Y/%m/%d").to_string());

    let store = ReleaseStore::new(&args.data_dir);
    let client = GmailClient::from_env(args.token_file.as_deref()).context("build gmail client")?;
    let opts = GatherOptions {
        after: args.after.clone(),
        before,
        max_results: args.max_results,
        batch_size: args.batch_size,
        exclude_today: true,
    };

    let releases = gather_releases(&store, &client, &opts).await?;

    let json = serde_json::to_string_pretty(&releases).context("serialize releases")?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("write releases: {}", path.display()))?;
            tracing::info!(count = releases.len(), out = %path.display(), "wrote releases");
        }
        None => println!("{json}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use super::*;
    use crate::error::ProviderError;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn email(page: &str, date: &str, url: &str) -> Vec<u8> {
        let rfc_date = d(date).format("%a, %d %b %Y 12:00:00 +0000");
        format!(
            "Subject: New release from {page}\r\n\
             Date: {rfc_date}\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             \r\n\
             <a href=\"{url}?from=email\">Some Title</a><p>by Someone</p>\r\n"
        )
        .into_bytes()
    }

    /// In-memory provider keyed by the `after:` date of the query.
    /// Counts searches so tests can assert that the cache short-circuits
    /// network access.
    #[derive(Default)]
    struct FakeProvider {
        by_after_date: HashMap<String, Vec<Vec<u8>>>,
        searches: Mutex<Vec<String>>,
        fail_from_search: Option<usize>,
    }

    impl FakeProvider {
        fn insert(&mut self, after: &str, payloads: Vec<Vec<u8>>) {
            self.by_after_date.insert(after.to_owned(), payloads);
        }

        fn search_count(&self) -> usize {
            self.searches.lock().unwrap().len()
        }

        fn payloads_for(&self, query: &str) -> Vec<Vec<u8>> {
            let after = query.rsplit("after:").next().unwrap_or_default().trim();
            self.by_after_date.get(after).cloned().unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl Provider for FakeProvider {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
        ) -> Result<Vec<String>, ProviderError> {
            let mut searches = self.searches.lock().unwrap();
            if self.fail_from_search.is_some_and(|n| searches.len() >= n) {
                return Err(ProviderError::Status {
                    status: 500,
                    context: "synthetic failure".to_owned(),
                });
            }
            searches.push(query.to_owned());

            let count = self.payloads_for(query).len().min(max_results);
            Ok((0..count).map(|i| format!("msg-{i}")).collect())
        }

        async fn fetch(
            &self,
            ids: &[String],
            _batch_size: usize,
        ) -> Result<Vec<Vec<u8>>, ProviderError> {
            let query = self.searches.lock().unwrap().last().cloned().unwrap_or_default();
            let mut payloads = self.payloads_for(&query);
            payloads.truncate(ids.len());
            Ok(payloads)
        }
    }

    fn opts(after: &str, before: &str, max_results: usize) -> GatherOptions {
        GatherOptions {
            after: after.to_owned(),
            before: before.to_owned(),
            max_results,
            batch_size: 10,
            exclude_today: true,
        }
    }

    #[tokio::test]
    async fn invalid_range_is_rejected_before_any_io() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let provider = FakeProvider::default();

        let err = gather_releases(&store, &provider, &opts("2024/02/05", "2024/02/01", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, GatherError::InvalidRange { .. }));
        assert_eq!(provider.search_count(), 0);
    }

    #[tokio::test]
    async fn malformed_date_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let provider = FakeProvider::default();

        let err = gather_releases(&store, &provider, &opts("2024-02-01", "2024/02/05", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, GatherError::InvalidDate { .. }));
    }

    #[tokio::test]
    async fn fetches_persist_and_memoize_empty_spans() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let mut provider = FakeProvider::default();
        provider.insert(
            "2024/02/01",
            vec![
                email("Label A", "2024-02-01", "https://a.bandcamp.com/album/one"),
                email("Label B", "2024-02-02", "https://b.bandcamp.com/album/two"),
            ],
        );

        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/03", 10))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(provider.search_count(), 1);

        // Days that produced records are cached; 02-03 came back in the
        // same span but without mail of its own, so it stays missing and
        // gets re-queried (this time alone) and memoized as empty.
        let (cached, missing) = store.releases_for_range(d("2024-02-01"), d("2024-02-03"));
        assert_eq!(cached.len(), 2);
        assert_eq!(missing, vec![d("2024-02-03")]);

        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/03", 10))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(provider.search_count(), 2);

        // Third run: everything cached or memoized, zero provider calls.
        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/03", 10))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(provider.search_count(), 2);
    }

    #[tokio::test]
    async fn budget_is_respected_and_cache_satisfied_runs_skip_network() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let mut provider = FakeProvider::default();
        provider.insert(
            "2024/02/01",
            (0..5)
                .map(|i| {
                    email(
                        "Label",
                        "2024-02-01",
                        &format!("https://l.bandcamp.com/album/r{i}"),
                    )
                })
                .collect(),
        );

        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/01", 3))
            .await
            .unwrap();
        assert_eq!(out.len(), 3);

        // Cache alone now reaches the cap; no further provider query.
        let searches_before = provider.search_count();
        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/01", 3))
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(provider.search_count(), searches_before);
    }

    #[tokio::test]
    async fn max_results_zero_means_no_cap() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let mut provider = FakeProvider::default();
        provider.insert(
            "2024/02/01",
            (0..5)
                .map(|i| {
                    email(
                        "Label",
                        "2024-02-01",
                        &format!("https://l.bandcamp.com/album/r{i}"),
                    )
                })
                .collect(),
        );

        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/01", 0))
            .await
            .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(store.load_cache()[&d("2024-02-01")].len(), 5);
    }

    #[tokio::test]
    async fn provider_failure_keeps_earlier_merges() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let mut provider = FakeProvider::default();
        provider.insert(
            "2024/02/01",
            vec![email("Label A", "2024-02-01", "https://a.bandcamp.com/album/one")],
        );
        provider.insert(
            "2024/02/05",
            vec![email("Label C", "2024-02-05", "https://c.bandcamp.com/album/three")],
        );
        provider.fail_from_search = Some(1);

        // Seed the gap between the two spans so two ranges are fetched.
        store
            .record_empty_range(
                DateRange {
                    start: d("2024-02-02"),
                    end: d("2024-02-04"),
                },
                false,
            )
            .unwrap();

        let err = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/05", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, GatherError::Provider(_)));

        // The first span's merge survived the abort.
        let (cached, missing) = store.releases_for_range(d("2024-02-01"), d("2024-02-05"));
        assert_eq!(cached.len(), 1);
        assert_eq!(missing, vec![d("2024-02-05")]);
    }

    #[tokio::test]
    async fn undated_records_pass_through_without_persisting() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ReleaseStore::new(temp.path());
        let mut provider = FakeProvider::default();
        provider.insert(
            "2024/02/01",
            vec![
                "Subject: New release from Dateless Label\r\n\
                 Content-Type: text/html\r\n\
                 \r\n\
                 <a href=\"https://d.bandcamp.com/album/one\">One</a>\r\n"
                    .as_bytes()
                    .to_vec(),
            ],
        );

        let out = gather_releases(&store, &provider, &opts("2024/02/01", "2024/02/01", 10))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].date.is_none());
        assert!(store.load_cache().is_empty());
    }
}
