use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheEntry, ResultCache};
use crate::catalog::LookupClient;
use crate::client::{PageClient, PageRequest};
use crate::config::ResolvedConfig;
use crate::domain::{Query, Row, SortState};
use crate::engine::{LocalFilter, LocalQueryEngine};
use crate::error::ArpError;
use crate::orchestrator::{BulkFetchOrchestrator, LoadOutcome, LoadPrompt};
use crate::suggest::{SuggestionCandidate, SuggestionPages, SuggestionRanker};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub percent: Option<u8>,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            percent: None,
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy)]
pub struct PageOptions {
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub sort: SortState,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            sort: SortState::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub keyword: String,
    pub page: usize,
    pub page_size: usize,
    pub sort: SortState,
    /// Matches reported by the server for the whole query.
    pub total: u64,
    pub total_pages: usize,
    /// Rows of this page that survived the local filters.
    pub filtered: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub keyword: String,
    pub action: String,
    pub rows: usize,
    pub total: Option<u64>,
    pub saved_at: Option<String>,
}

impl LoadResult {
    pub fn from_outcome(keyword: &str, outcome: &LoadOutcome) -> Self {
        let (action, rows, total, saved_at) = match outcome {
            LoadOutcome::Loaded { rows, saved_at } => {
                ("fetched", rows.len(), None, Some(saved_at.to_rfc3339()))
            }
            LoadOutcome::Cached(entry) => (
                "cache",
                entry.rows.len(),
                None,
                Some(entry.saved_at.to_rfc3339()),
            ),
            LoadOutcome::Cancelled { partial } => ("cancelled", partial.len(), None, None),
            LoadOutcome::Declined { total } => ("declined", 0, Some(*total), None),
        };
        Self {
            keyword: keyword.to_string(),
            action: action.to_string(),
            rows,
            total,
            saved_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewResult {
    pub keyword: String,
    pub saved_at: String,
    pub cached_rows: usize,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestResult {
    pub query: String,
    pub pages: usize,
    pub suggestions: Vec<SuggestionCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub keyword: String,
    pub rows: usize,
    pub saved_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: usize,
}

/// The entry points the presentation layer talks to.
pub struct App<C: PageClient, L: LookupClient> {
    orchestrator: BulkFetchOrchestrator<C>,
    ranker: SuggestionRanker<L>,
    keyword_column: String,
}

impl<C: PageClient, L: LookupClient> App<C, L> {
    pub fn new(orchestrator: BulkFetchOrchestrator<C>, ranker: SuggestionRanker<L>) -> Self {
        Self {
            orchestrator,
            ranker,
            keyword_column: crate::domain::DEFAULT_KEYWORD_COLUMN.to_string(),
        }
    }

    pub fn from_config(config: &ResolvedConfig, client: C, lookup: L) -> Result<Self, ArpError> {
        let cache = match &config.cache_dir {
            Some(dir) => ResultCache::new_with_root(dir.clone()),
            None => ResultCache::new()?,
        };
        let orchestrator = BulkFetchOrchestrator::new(client, cache, config.bulk.clone())
            .with_keyword_column(config.keyword_column.clone());
        Ok(Self {
            orchestrator,
            ranker: SuggestionRanker::new(lookup),
            keyword_column: config.keyword_column.clone(),
        })
    }

    pub fn orchestrator(&self) -> &BulkFetchOrchestrator<C> {
        &self.orchestrator
    }

    pub fn ranker(&self) -> &SuggestionRanker<L> {
        &self.ranker
    }

    /// Interactive mode: one server page, narrowed by the local filters.
    /// Paging totals come from the server count.
    pub fn search(
        &self,
        query: &Query,
        options: PageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SearchResult, ArpError> {
        if query.is_blank() {
            return Err(ArpError::EmptyQuery);
        }
        let page = options.page.max(1);
        let page_size = options.page_size.max(1);
        let request = PageRequest {
            page: u32::try_from(page).unwrap_or(u32::MAX),
            page_size: u32::try_from(page_size).unwrap_or(u32::MAX),
            keyword_column: self.keyword_column.clone(),
            keyword: query.keyword.clone(),
            sort: options.sort,
            filters: query.filters.clone(),
        };
        sink.event(ProgressEvent::message(format!(
            "requesting page {page} for \"{}\"",
            query.keyword
        )));
        let response = self.orchestrator.client().fetch_page(&request)?;

        let filter = LocalFilter::from_filters(&query.filters);
        let rows: Vec<Row> = LocalQueryEngine::filter(&response.rows, &filter)
            .into_iter()
            .cloned()
            .collect();
        let total_pages = LocalQueryEngine::total_pages(
            usize::try_from(response.total_filtered).unwrap_or(usize::MAX),
            page_size,
        );

        Ok(SearchResult {
            keyword: query.keyword.clone(),
            page,
            page_size,
            sort: options.sort,
            total: response.total_filtered,
            total_pages,
            filtered: rows.len(),
            rows,
        })
    }

    pub fn load_all(
        &self,
        query: &Query,
        prompt: &dyn LoadPrompt,
        sink: &dyn ProgressSink,
    ) -> Result<LoadOutcome, ArpError> {
        self.orchestrator.load_all(query, prompt, sink)
    }

    pub fn cached(&self, keyword: &str) -> Result<Option<CacheEntry>, ArpError> {
        self.orchestrator.cache().get(keyword)
    }

    pub fn cache_info(&self, keyword: &str) -> Result<CacheInfo, ArpError> {
        let entry = self
            .cached(keyword)?
            .ok_or_else(|| ArpError::NotCached(keyword.to_string()))?;
        Ok(CacheInfo {
            keyword: entry.key,
            rows: entry.rows.len(),
            saved_at: entry.saved_at.to_rfc3339(),
        })
    }

    pub fn clear_cache(&self, sink: &dyn ProgressSink) -> Result<ClearResult, ArpError> {
        sink.event(ProgressEvent::message("clearing result cache"));
        let cleared = self.orchestrator.cache().clear_all()?;
        Ok(ClearResult { cleared })
    }

    pub fn suggest(&self, raw_query: &str) -> SuggestResult {
        let suggestions = self.ranker.suggest(raw_query);
        SuggestResult {
            query: raw_query.to_string(),
            pages: SuggestionPages::new(&suggestions).page_count(),
            suggestions,
        }
    }

    /// Cache mode: filter, optionally sort, then page the full cached set.
    pub fn view(
        &self,
        keyword: &str,
        filter: &LocalFilter,
        sort: Option<SortState>,
        options: PageOptions,
    ) -> Result<ViewResult, ArpError> {
        let entry = self
            .cached(keyword)?
            .ok_or_else(|| ArpError::NotCached(keyword.to_string()))?;
        let view = match sort {
            Some(sort) => LocalQueryEngine::view_sorted(
                &entry.rows,
                filter,
                sort,
                options.page,
                options.page_size,
            ),
            None => LocalQueryEngine::view(&entry.rows, filter, options.page, options.page_size),
        };
        Ok(ViewResult {
            keyword: keyword.to_string(),
            saved_at: entry.saved_at.to_rfc3339(),
            cached_rows: entry.rows.len(),
            page: view.page,
            page_size: options.page_size.max(1),
            total: view.total,
            total_pages: view.total_pages,
            rows: view.rows.into_iter().cloned().collect(),
        })
    }
}
