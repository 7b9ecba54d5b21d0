use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::NaiveDate;

use crate::cli::ResetArgs;
use crate::error::StoreError;
use crate::ranges::DateRange;
use crate::release::{Release, dedupe_by_url};

pub const CACHE_FILE: &str = "release_cache.json";
pub const EMPTY_FILE: &str = "no_results_dates.json";

/// Durable per-day release buckets plus the set of dates known to have no
/// provider results. Two independent JSON documents under the data
/// directory, each written via temp-file-then-rename.
///
/// Concurrency: the rename keeps individual files intact, but two
/// processes merging into the same data directory can still lose one
/// another's read-modify-write. Callers serialize externally.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    data_dir: PathBuf,
}

impl ReleaseStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    fn empty_path(&self) -> PathBuf {
        self.data_dir.join(EMPTY_FILE)
    }

    /// Day buckets keyed by date. Missing or malformed file means a cold
    /// start, never an error.
    pub fn load_cache(&self) -> BTreeMap<NaiveDate, Vec<Release>> {
        read_json_lenient(&self.cache_path()).unwrap_or_default()
    }

    pub fn load_empty_dates(&self) -> BTreeSet<NaiveDate> {
        read_json_lenient(&self.empty_path()).unwrap_or_default()
    }

    fn save_cache(&self, cache: &BTreeMap<NaiveDate, Vec<Release>>) -> Result<(), StoreError> {
        write_json_atomic(&self.cache_path(), cache)
    }

    fn save_empty_dates(&self, dates: &BTreeSet<NaiveDate>) -> Result<(), StoreError> {
        write_json_atomic(&self.empty_path(), dates)
    }

    /// Merge releases into their own day buckets, deduplicating by URL
    /// within each day (existing entries win). A day that gains content
    /// is retracted from the empty-date set. Undated releases are never
    /// persisted; today's releases are skipped while `exclude_today` is
    /// set, since that day is still receiving mail.
    pub fn persist_releases(
        &self,
        releases: &[Release],
        exclude_today: bool,
    ) -> Result<(), StoreError> {
        let mut cache = self.load_cache();
        let mut empty_dates = self.load_empty_dates();
        let today = chrono::Local::now().date_naive();

        for release in releases {
            let Some(day) = release.date else {
                continue;
            };
            if exclude_today && day == today {
                continue;
            }

            let existing = cache.remove(&day).unwrap_or_default();
            let combined =
                dedupe_by_url(existing.into_iter().chain(std::iter::once(release.clone())));
            cache.insert(day, combined);
            empty_dates.remove(&day);
        }

        self.save_cache(&cache)?;
        self.save_empty_dates(&empty_dates)
    }

    /// Memoize a contiguous span that produced zero provider results so
    /// it is never queried again. Today is skipped while `exclude_today`
    /// is set.
    pub fn record_empty_range(
        &self,
        range: DateRange,
        exclude_today: bool,
    ) -> Result<(), StoreError> {
        if range.start > range.end {
            return Ok(());
        }

        let mut empty_dates = self.load_empty_dates();
        let today = chrono::Local::now().date_naive();
        for day in range.days() {
            if exclude_today && day == today {
                continue;
            }
            empty_dates.insert(day);
        }
        self.save_empty_dates(&empty_dates)
    }

    /// Answer "what must be fetched" for the inclusive range: cached
    /// releases (deduped by URL across days, day order preserved) plus
    /// the days with neither a bucket nor an empty marker.
    pub fn releases_for_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> (Vec<Release>, Vec<NaiveDate>) {
        let cache = self.load_cache();
        let empty_dates = self.load_empty_dates();

        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for day in (DateRange { start, end }).days() {
            match cache.get(&day) {
                Some(bucket) if !bucket.is_empty() => cached.extend(bucket.iter().cloned()),
                _ if empty_dates.contains(&day) => {}
                _ => missing.push(day),
            }
        }

        (dedupe_by_url(cached), missing)
    }

    /// Remove either backing file. Missing files are fine; reset is
    /// idempotent.
    pub fn reset(&self, clear_cache: bool, clear_empty: bool) -> Result<(), StoreError> {
        if clear_cache {
            remove_file_if_exists(&self.cache_path())?;
        }
        if clear_empty {
            remove_file_if_exists(&self.empty_path())?;
        }
        Ok(())
    }
}

pub fn run_reset(args: ResetArgs) -> anyhow::Result<()> {
    let clear_cache = args.cache || args.all;
    let clear_empty = args.empty || args.all;
    if !clear_cache && !clear_empty {
        anyhow::bail!("nothing to reset: pass --cache, --empty or --all");
    }

    let store = ReleaseStore::new(&args.data_dir);
    store.reset(clear_cache, clear_empty).context("reset store")?;
    tracing::info!(
        data_dir = %args.data_dir.display(),
        clear_cache,
        clear_empty,
        "reset complete"
    );
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::Write {
            path: path.to_owned(),
            source: err,
        }),
    }
}

/// Read a JSON document, treating a missing or unreadable or malformed
/// file as absent. Corruption is logged, not surfaced.
pub(crate) fn read_json_lenient<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "cache file unreadable; treating as empty");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "cache file malformed; treating as empty");
            None
        }
    }
}

/// Serialize to a temp file next to the target, then rename over it, so a
/// crash mid-write never leaves a truncated document. Write failures
/// propagate; a failed persist must not look like success.
pub(crate) fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|err| StoreError::Write {
            path: parent.to_owned(),
            source: err,
        })?;
    }

    let data = serde_json::to_vec_pretty(value).map_err(|err| StoreError::Serialize {
        path: path.to_owned(),
        source: err,
    })?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp_path, &data).map_err(|err| StoreError::Write {
        path: tmp_path.clone(),
        source: err,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|err| StoreError::Write {
        path: path.to_owned(),
        source: err,
    })
}
