use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::cache::{CacheEntry, ResultCache};
use crate::client::{PageClient, PageRequest, PageResponse};
use crate::domain::{AdvancedFilters, Query, Row, SortState};
use crate::error::ArpError;

pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const LARGE_RESULT_THRESHOLD: u64 = 50_000;

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub page_size: u32,
    /// Page requests in flight per wave.
    pub concurrency: usize,
    /// Result sizes above this need [`LoadPrompt::confirm_large`].
    pub large_result_threshold: u64,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            large_result_threshold: LARGE_RESULT_THRESHOLD,
        }
    }
}

/// The two decisions a bulk load hands back to the user.
pub trait LoadPrompt {
    /// A non-empty cached set exists for the keyword; `true` reuses it.
    fn use_cached(&self, entry: &CacheEntry) -> bool;
    /// `total` rows matched, above the large-result threshold.
    fn confirm_large(&self, total: u64) -> bool;
}

/// Accepts every prompt except reusing the cache.
pub struct AlwaysFetch;

impl LoadPrompt for AlwaysFetch {
    fn use_cached(&self, _entry: &CacheEntry) -> bool {
        false
    }

    fn confirm_large(&self, _total: u64) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Every page arrived; the rows were written through to the cache.
    Loaded {
        rows: Vec<Row>,
        saved_at: DateTime<Utc>,
    },
    /// The caller chose the existing cache entry; nothing was fetched.
    Cached(CacheEntry),
    /// Stopped at a wave boundary. Nothing was cached and `partial` is
    /// not meant to be kept.
    Cancelled { partial: Vec<Row> },
    /// The large-result confirmation was declined.
    Declined { total: u64 },
}

impl LoadOutcome {
    /// Rows the caller may treat as the active dataset.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            LoadOutcome::Loaded { rows, .. } => Some(rows),
            LoadOutcome::Cached(entry) => Some(&entry.rows),
            LoadOutcome::Cancelled { .. } | LoadOutcome::Declined { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchProgress {
    pub percent: u8,
    pub cancelled: bool,
}

/// Cooperative stop flag, checked between waves.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub fn total_pages(total_filtered: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total_filtered.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

pub fn percent_of(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = f64::from(done.min(total)) / f64::from(total);
    (ratio * 100.0).round() as u8
}

/// Materializes every page of a keyword search, one run at a time.
pub struct BulkFetchOrchestrator<C: PageClient> {
    client: C,
    cache: ResultCache,
    options: BulkOptions,
    keyword_column: String,
    running: AtomicBool,
    percent: AtomicU8,
    cancel: CancelToken,
}

impl<C: PageClient> BulkFetchOrchestrator<C> {
    pub fn new(client: C, cache: ResultCache, options: BulkOptions) -> Self {
        Self {
            client,
            cache,
            options,
            keyword_column: crate::domain::DEFAULT_KEYWORD_COLUMN.to_string(),
            running: AtomicBool::new(false),
            percent: AtomicU8::new(0),
            cancel: CancelToken::default(),
        }
    }

    pub fn with_keyword_column(mut self, column: impl Into<String>) -> Self {
        self.keyword_column = column.into();
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> FetchProgress {
        FetchProgress {
            percent: self.percent.load(Ordering::SeqCst),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    pub fn load_all(
        &self,
        query: &Query,
        prompt: &dyn LoadPrompt,
        sink: &dyn ProgressSink,
    ) -> Result<LoadOutcome, ArpError> {
        if query.is_blank() {
            return Err(ArpError::EmptyQuery);
        }
        let _run = RunGuard::acquire(self)?;
        let key = query.cache_key();

        match self.cache.get(key) {
            Ok(Some(entry)) if !entry.rows.is_empty() => {
                sink.event(ProgressEvent::message(format!(
                    "cache holds {} rows for \"{key}\"",
                    entry.rows.len()
                )));
                if prompt.use_cached(&entry) {
                    return Ok(LoadOutcome::Cached(entry));
                }
            }
            Ok(_) => {}
            Err(err) => warn!(key, error = %err, "cache.read_failed"),
        }

        let started = Instant::now();
        let page_size = self.options.page_size.max(1);
        let concurrency = u32::try_from(self.options.concurrency.max(1)).unwrap_or(u32::MAX);

        let first = self.client.fetch_page(&self.page_request(query, 1))?;
        let total = first.total_filtered;
        let pages = total_pages(total, page_size);
        info!(key, total, pages, "bulk.start");

        if total > self.options.large_result_threshold && !prompt.confirm_large(total) {
            info!(key, total, "bulk.declined");
            return Ok(LoadOutcome::Declined { total });
        }

        let mut rows = first.rows;
        self.report(sink, 1, pages, started);

        let mut next = 2u32;
        while next <= pages {
            if self.cancel.is_cancelled() {
                info!(key, rows = rows.len(), "bulk.cancelled");
                return Ok(LoadOutcome::Cancelled { partial: rows });
            }
            let last = next.saturating_add(concurrency - 1).min(pages);
            debug!(first = next, last, "bulk.wave");
            for page in self.fetch_wave(query, next..=last)? {
                rows.extend(page.rows);
            }
            self.report(sink, last, pages, started);
            next = next.saturating_add(concurrency);
        }

        if self.cancel.is_cancelled() {
            info!(key, rows = rows.len(), "bulk.cancelled");
            return Ok(LoadOutcome::Cancelled { partial: rows });
        }

        let saved_at = self.cache.put(key, &rows)?;
        info!(
            key,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk.done"
        );
        Ok(LoadOutcome::Loaded { rows, saved_at })
    }

    fn page_request(&self, query: &Query, page: u32) -> PageRequest {
        PageRequest {
            page,
            page_size: self.options.page_size.max(1),
            keyword_column: self.keyword_column.clone(),
            keyword: query.keyword.clone(),
            sort: SortState::default(),
            filters: AdvancedFilters::bulk(),
        }
    }

    /// Issues the wave's pages concurrently and returns them in page order,
    /// whatever order they completed in. The first failure by page order
    /// wins; every request is joined before returning.
    fn fetch_wave(
        &self,
        query: &Query,
        pages: RangeInclusive<u32>,
    ) -> Result<Vec<PageResponse>, ArpError> {
        let client = &self.client;
        let requests: Vec<PageRequest> = pages
            .map(|page| self.page_request(query, page))
            .collect();
        thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || client.fetch_page(request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err(worker_panicked())))
                .collect()
        })
    }

    fn report(&self, sink: &dyn ProgressSink, done: u32, pages: u32, started: Instant) {
        let percent = percent_of(done, pages);
        self.percent.store(percent, Ordering::SeqCst);
        sink.event(ProgressEvent {
            message: format!("page {done}/{pages}"),
            percent: Some(percent),
            elapsed: Some(started.elapsed()),
        });
    }
}

fn worker_panicked() -> ArpError {
    ArpError::Http("page worker panicked".to_string())
}

/// Marks a run active; dropping it clears progress and the cancel flag
/// on every exit path.
struct RunGuard<'a, C: PageClient> {
    owner: &'a BulkFetchOrchestrator<C>,
}

impl<'a, C: PageClient> RunGuard<'a, C> {
    fn acquire(owner: &'a BulkFetchOrchestrator<C>) -> Result<Self, ArpError> {
        owner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ArpError::RunInProgress)?;
        owner.cancel.reset();
        owner.percent.store(0, Ordering::SeqCst);
        Ok(Self { owner })
    }
}

impl<C: PageClient> Drop for RunGuard<'_, C> {
    fn drop(&mut self) {
        self.owner.percent.store(0, Ordering::SeqCst);
        self.owner.cancel.reset();
        self.owner.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up_and_never_drops_to_zero() {
        assert_eq!(total_pages(0, 1000), 1);
        assert_eq!(total_pages(1000, 1000), 1);
        assert_eq!(total_pages(1001, 1000), 2);
        assert_eq!(total_pages(12_345, 1000), 13);
    }

    #[test]
    fn percent_rounds_like_the_progress_bar() {
        assert_eq!(percent_of(1, 3), 33);
        assert_eq!(percent_of(2, 3), 67);
        assert_eq!(percent_of(6, 13), 46);
        assert_eq!(percent_of(20, 13), 100);
    }
}
