use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ArpError;

pub const WORD_LOOKUP_PATH: &str = "/cnbs-api/material/v1/palavra";

/// A raw catalog entry (PDM) returned for a typed word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupCandidate {
    pub code: String,
    pub name: String,
    pub class_name: Option<String>,
}

pub trait LookupClient: Send + Sync {
    fn lookup(&self, raw_query: &str) -> Result<Vec<LookupCandidate>, ArpError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
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

    pub fn lookup_url(&self) -> String {
        format!("{}{WORD_LOOKUP_PATH}", self.base_url)
    }
}

impl LookupClient for CatalogHttpClient {
    fn lookup(&self, raw_query: &str) -> Result<Vec<LookupCandidate>, ArpError> {
        debug!(query = raw_query, "catalog.request");
        let response = self
            .client
            .get(self.lookup_url())
            .query(&[("palavra", raw_query)])
            .send()
            .map_err(|err| ArpError::Http(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog lookup failed".to_string());
            return Err(ArpError::Status { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| ArpError::Decode(err.to_string()))?;
        Ok(extract_candidates(&body))
    }
}

/// Reads candidates out of a lookup body. Anything but a JSON array
/// yields no candidates.
pub fn extract_candidates(body: &Value) -> Vec<LookupCandidate> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| LookupCandidate {
            code: item.get("codigoPdm").map(scalar_text).unwrap_or_default(),
            name: ["nomePdm", "descricaoPDM"]
                .iter()
                .filter_map(|field| item.get(*field).map(scalar_text))
                .find(|name| !name.is_empty())
                .unwrap_or_default(),
            class_name: item
                .get("nomeClasse")
                .map(scalar_text)
                .filter(|name| !name.is_empty()),
        })
        .collect()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_code_name_and_class() {
        let body = json!([
            { "codigoPdm": 5130, "nomePdm": "CAFÉ", "nomeClasse": "GÊNEROS ALIMENTÍCIOS" },
            { "codigoPdm": "77", "nomePdm": "", "descricaoPDM": "CAFETEIRA" },
            { "nomePdm": null }
        ]);
        let candidates = extract_candidates(&body);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].code, "5130");
        assert_eq!(candidates[0].class_name.as_deref(), Some("GÊNEROS ALIMENTÍCIOS"));
        assert_eq!(candidates[1].name, "CAFETEIRA");
        assert_eq!(candidates[2].name, "");
    }

    #[test]
    fn non_array_body_is_empty() {
        assert!(extract_candidates(&json!({ "error": "x" })).is_empty());
    }
}
