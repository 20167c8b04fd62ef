use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::{AdvancedFilters, COLUMNS, Row, SortState, UNORDERABLE_COLUMN};
use crate::error::ArpError;

pub const ITEM_LISTING_PATH: &str = "/transparencia/transparencia/arp-item";

/// One page of the remote listing. Equal requests address the same
/// server page, so this doubles as the interactive per-page query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    pub keyword_column: String,
    pub keyword: String,
    pub sort: SortState,
    pub filters: AdvancedFilters,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// Form body in the DataTables shape the listing endpoint parses.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("start".to_string(), self.offset().to_string()),
            ("length".to_string(), self.page_size.to_string()),
            ("search[value]".to_string(), String::new()),
            ("search[regex]".to_string(), "false".to_string()),
        ];

        for (idx, column) in COLUMNS.iter().enumerate() {
            let orderable = idx != UNORDERABLE_COLUMN;
            fields.push((format!("columns[{idx}][data]"), column.to_string()));
            fields.push((format!("columns[{idx}][name]"), column.to_string()));
            fields.push((format!("columns[{idx}][searchable]"), "true".to_string()));
            fields.push((format!("columns[{idx}][orderable]"), orderable.to_string()));
            fields.push((format!("columns[{idx}][search][value]"), String::new()));
            fields.push((format!("columns[{idx}][search][regex]"), "false".to_string()));
        }

        fields.push(("order[0][column]".to_string(), self.sort.column.to_string()));
        fields.push((
            "order[0][dir]".to_string(),
            self.sort.direction.to_string(),
        ));

        let mut filter_index = 0usize;
        if !self.keyword.is_empty() {
            fields.push((
                format!("camposFiltro[{filter_index}][name]"),
                self.keyword_column.clone(),
            ));
            fields.push((
                format!("camposFiltro[{filter_index}][value]"),
                self.keyword.clone(),
            ));
            filter_index += 1;
        }
        for (name, value) in self.filters.wire_pairs() {
            fields.push((
                format!("camposFiltro[{filter_index}][name]"),
                name.to_string(),
            ));
            fields.push((
                format!("camposFiltro[{filter_index}][value]"),
                value.to_string(),
            ));
            filter_index += 1;
        }
        fields
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageResponse {
    #[serde(rename = "data", default)]
    pub rows: Vec<Row>,
    #[serde(rename = "recordsTotal", default)]
    pub records_total: u64,
    #[serde(rename = "recordsFiltered")]
    pub total_filtered: u64,
}

/// Issues a single page request. Implementations must fail with an error
/// (never an empty page) when the remote is unreachable or answers with a
/// non-success status.
pub trait PageClient: Send + Sync {
    fn fetch_page(&self, request: &PageRequest) -> Result<PageResponse, ArpError>;
}

#[derive(Clone)]
pub struct ArpHttpClient {
    client: Client,
    base_url: String,
}

impl ArpHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ArpError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("arp-harvester/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArpError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ArpError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn listing_url(&self) -> String {
        format!("{}{ITEM_LISTING_PATH}", self.base_url)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ArpError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "listing request failed".to_string());
        Err(ArpError::Status { status, message })
    }
}

impl PageClient for ArpHttpClient {
    fn fetch_page(&self, request: &PageRequest) -> Result<PageResponse, ArpError> {
        debug!(page = request.page, size = request.page_size, "listing.request");
        let response = self
            .client
            .post(self.listing_url())
            .form(&request.form_fields())
            .send()
            .map_err(|err| ArpError::Http(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json::<PageResponse>()
            .map_err(|err| ArpError::Decode(err.to_string()))
    }
}
