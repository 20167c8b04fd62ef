use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::Value;

use arp_harvester::app::{App, LoadResult, PageOptions, ProgressEvent, ProgressSink};
use arp_harvester::catalog::{LookupCandidate, LookupClient};
use arp_harvester::client::{PageClient, PageRequest, PageResponse};
use arp_harvester::config::{Config, ConfigLoader};
use arp_harvester::domain::{AdvancedFilters, COLUMNS, Query, Row, SortDirection, SortState};
use arp_harvester::engine::LocalFilter;
use arp_harvester::error::ArpError;
use arp_harvester::orchestrator::{AlwaysFetch, LoadOutcome};

struct MockListing {
    rows: Vec<Row>,
    requests: Mutex<Vec<PageRequest>>,
}

impl MockListing {
    fn new() -> Self {
        let rows: Vec<Row> = [
            ("ABC123", "Caneta azul"),
            ("XYZ456", "Borracha"),
            ("QQQ789", "Apontador"),
            ("ABC1234", "Caneta preta"),
        ]
        .into_iter()
        .map(|(code, descricao)| {
            [
                ("codigo_pdm", Value::from(code)),
                ("descricaodetalhada", Value::from(descricao)),
            ]
            .into_iter()
            .collect::<Row>()
        })
        .collect();
        Self {
            rows,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl PageClient for MockListing {
    fn fetch_page(&self, request: &PageRequest) -> Result<PageResponse, ArpError> {
        self.requests.lock().unwrap().push(request.clone());
        let start = usize::try_from(request.offset()).unwrap().min(self.rows.len());
        let end = (start + request.page_size as usize).min(self.rows.len());
        Ok(PageResponse {
            rows: self.rows[start..end].to_vec(),
            records_total: self.rows.len() as u64,
            total_filtered: self.rows.len() as u64,
        })
    }
}

struct MockCatalog;

impl LookupClient for MockCatalog {
    fn lookup(&self, _raw_query: &str) -> Result<Vec<LookupCandidate>, ArpError> {
        Ok((0..10)
            .map(|idx| LookupCandidate {
                code: idx.to_string(),
                name: format!("Caneta {idx}"),
                class_name: None,
            })
            .collect())
    }
}

#[derive(Default)]
struct Messages(Mutex<Vec<String>>);

impl ProgressSink for Messages {
    fn event(&self, event: ProgressEvent) {
        self.0.lock().unwrap().push(event.message);
    }
}

fn app_in(temp: &tempfile::TempDir) -> App<MockListing, MockCatalog> {
    let config = ConfigLoader::resolve_config(Config {
        cache_dir: Some(temp.path().join("results").to_string_lossy().into_owned()),
        page_size: Some(3),
        ..Config::default()
    })
    .unwrap();
    App::from_config(&config, MockListing::new(), MockCatalog).unwrap()
}

#[test]
fn search_filters_the_server_page_but_pages_by_server_total() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);
    let query = Query::new("caneta").with_filters(AdvancedFilters {
        codigo_pdm: Some("123".to_string()),
        ..AdvancedFilters::default()
    });
    let options = PageOptions {
        page_size: 3,
        ..PageOptions::default()
    };

    let result = app.search(&query, options, &Messages::default()).unwrap();

    assert_eq!(result.total, 4);
    assert_eq!(result.total_pages, 2);
    assert_eq!(result.filtered, 1);
    let requests = app.orchestrator().client().requests.lock().unwrap();
    assert_eq!(requests[0].page, 1);
    assert_eq!(requests[0].filters.codigo_pdm.as_deref(), Some("123"));
}

#[test]
fn blank_search_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);
    let err = app
        .search(&Query::new(""), PageOptions::default(), &Messages::default())
        .unwrap_err();
    assert_matches!(err, ArpError::EmptyQuery);
    assert!(app.orchestrator().client().requests.lock().unwrap().is_empty());
}

#[test]
fn view_requires_a_cached_set() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);
    let err = app
        .view("caneta", &LocalFilter::default(), None, PageOptions::default())
        .unwrap_err();
    assert_matches!(err, ArpError::NotCached(ref keyword) if keyword == "caneta");
}

#[test]
fn load_then_view_filters_sorts_and_pages_the_full_set() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);

    let outcome = app
        .load_all(&Query::new("caneta"), &AlwaysFetch, &Messages::default())
        .unwrap();
    let summary = LoadResult::from_outcome("caneta", &outcome);
    assert_eq!(summary.action, "fetched");
    assert_eq!(summary.rows, 4);
    assert_matches!(outcome, LoadOutcome::Loaded { .. });

    let descricao = COLUMNS
        .iter()
        .position(|name| *name == "descricaodetalhada")
        .unwrap();
    let filter = LocalFilter::default().with_codes("123, 456");
    let view = app
        .view(
            "caneta",
            &filter,
            Some(SortState::new(descricao, SortDirection::Asc)),
            PageOptions {
                page: 1,
                page_size: 2,
                ..PageOptions::default()
            },
        )
        .unwrap();

    assert_eq!(view.cached_rows, 4);
    assert_eq!(view.total, 3);
    assert_eq!(view.total_pages, 2);
    let names: Vec<String> = view
        .rows
        .iter()
        .map(|row| row.text("descricaodetalhada").unwrap().into_owned())
        .collect();
    assert_eq!(names, vec!["Borracha", "Caneta azul"]);

    let info = app.cache_info("caneta").unwrap();
    assert_eq!(info.rows, 4);
}

#[test]
fn clear_cache_reports_removed_entries() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);
    app.load_all(&Query::new("caneta"), &AlwaysFetch, &Messages::default())
        .unwrap();
    app.load_all(&Query::new("lapis"), &AlwaysFetch, &Messages::default())
        .unwrap();

    let result = app.clear_cache(&Messages::default()).unwrap();

    assert_eq!(result.cleared, 2);
    assert!(app.cached("caneta").unwrap().is_none());
}

#[test]
fn suggest_reports_page_count() {
    let temp = tempfile::tempdir().unwrap();
    let app = app_in(&temp);
    let result = app.suggest("caneta");
    assert_eq!(result.suggestions.len(), 10);
    assert_eq!(result.pages, 2);
    assert!(app.suggest(" ").suggestions.is_empty());
}
