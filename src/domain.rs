use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ArpError;

pub const DEFAULT_KEYWORD_COLUMN: &str = "palavra_chave";

/// Status sent when the caller leaves it unset; the listing hides expired
/// registrations unless asked otherwise.
pub const DEFAULT_STATUS: &str = "vigente";

/// Column layout of the ARP item listing, indexed the way the remote
/// `order[0][column]` parameter expects. Blank slots are placeholders.
pub const COLUMNS: [&str; 17] = [
    "numero",
    "unidade_gerenciadora",
    "numero_item_compra",
    "codigo_pdm",
    "descricaodetalhada",
    "unidade_federacao",
    "fornecedor",
    "quantidade_registrada",
    "saldo_adesao",
    "vigencia_inicial",
    "vigencia_final",
    "acao",
    "",
    "",
    "",
    "",
    "descricaoPdm",
];

/// Index of the only column the remote refuses to order by.
pub const UNORDERABLE_COLUMN: usize = 16;

/// Attribute the multi-value code filter looks at.
pub const PDM_CODE_ATTRIBUTE: &str = "codigo_pdm";

/// One remote record. Field order is kept exactly as the server sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Textual form of an attribute; `null` and missing attributes are `None`.
    pub fn text(&self, name: &str) -> Option<Cow<'_, str>> {
        match self.0.get(name)? {
            Value::Null => None,
            Value::String(value) => Some(Cow::Borrowed(value.as_str())),
            Value::Number(value) => Some(Cow::Owned(value.to_string())),
            Value::Bool(value) => Some(Cow::Owned(value.to_string())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Row {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Named optional constraints forwarded to the remote listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codigo_unidade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalidade_compra: Option<String>,
    #[serde(
        default,
        rename = "descricaodetalhada",
        skip_serializing_if = "Option::is_none"
    )]
    pub descricao_detalhada: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_fim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_ata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_compra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ano_compra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codigo_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descricao_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero_item_compra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esfera: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codigo_pdm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descricao_pdm: Option<String>,
}

impl AdvancedFilters {
    /// Filters used for every page of a bulk load.
    pub fn bulk() -> Self {
        Self {
            status: Some(DEFAULT_STATUS.to_string()),
            ..Self::default()
        }
    }

    /// Filter name/value pairs in the order the remote expects them.
    /// Unset filters are sent as empty strings; an unset status falls back
    /// to [`DEFAULT_STATUS`].
    pub fn wire_pairs(&self) -> [(&'static str, &str); 16] {
        [
            (
                "status",
                self.status
                    .as_deref()
                    .filter(|status| !status.is_empty())
                    .unwrap_or(DEFAULT_STATUS),
            ),
            ("codigoUnidade", or_empty(&self.codigo_unidade)),
            ("modalidadeCompra", or_empty(&self.modalidade_compra)),
            ("descricaodetalhada", or_empty(&self.descricao_detalhada)),
            ("dataFim", or_empty(&self.data_fim)),
            ("numeroAta", or_empty(&self.numero_ata)),
            ("numeroCompra", or_empty(&self.numero_compra)),
            ("anoCompra", or_empty(&self.ano_compra)),
            ("codigoItem", or_empty(&self.codigo_item)),
            ("descricaoItem", or_empty(&self.descricao_item)),
            ("numeroItemCompra", or_empty(&self.numero_item_compra)),
            ("esfera", or_empty(&self.esfera)),
            ("uf", or_empty(&self.uf)),
            ("municipio", or_empty(&self.municipio)),
            ("codigoPdm", or_empty(&self.codigo_pdm)),
            ("descricaoPdm", or_empty(&self.descricao_pdm)),
        ]
    }
}

fn or_empty(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("")
}

/// A keyword search. Only `keyword` identifies a bulk result set; the
/// advanced filters are re-applied locally once rows are resident.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub keyword_column: String,
    pub keyword: String,
    pub filters: AdvancedFilters,
}

impl Query {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword_column: DEFAULT_KEYWORD_COLUMN.to_string(),
            keyword: keyword.into(),
            filters: AdvancedFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: AdvancedFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Raw, untrimmed keyword as typed. Two loads share a cache entry only
    /// when these strings are byte-identical.
    pub fn cache_key(&self) -> &str {
        &self.keyword
    }

    pub fn is_blank(&self) -> bool {
        self.keyword.trim().is_empty()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = ArpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(ArpError::InvalidSortDirection(value.to_string())),
        }
    }
}

/// Sort column (an index into [`COLUMNS`]) and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortState {
    pub column: usize,
    pub direction: SortDirection,
}

impl SortState {
    pub const DEFAULT_COLUMN: usize = 3;

    pub fn new(column: usize, direction: SortDirection) -> Self {
        Self { column, direction }
    }

    /// Header click: the same column flips direction, another column
    /// starts ascending.
    pub fn select(&mut self, column: usize) {
        if self.column == column {
            self.direction = self.direction.flipped();
        } else {
            self.column = column;
            self.direction = SortDirection::Asc;
        }
    }

    /// Attribute name behind the column index, if the slot is populated.
    pub fn attribute(&self) -> Option<&'static str> {
        COLUMNS
            .get(self.column)
            .copied()
            .filter(|name| !name.is_empty())
    }
}

impl Default for SortState {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COLUMN, SortDirection::Asc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_untrimmed() {
        let query = Query::new(" cafe ");
        assert_eq!(query.cache_key(), " cafe ");
        assert!(!query.is_blank());
        assert!(Query::new(" \t").is_blank());
    }

    #[test]
    fn row_text_formats_numbers() {
        let row: Row = [("id", Value::from(42)), ("nome", Value::from("x"))]
            .into_iter()
            .collect();
        assert_eq!(row.text("id").as_deref(), Some("42"));
        assert_eq!(row.text("nome").as_deref(), Some("x"));
        assert_eq!(row.text("missing"), None);
    }

    #[test]
    fn wire_pairs_default_status() {
        let filters = AdvancedFilters::default();
        let pairs = filters.wire_pairs();
        assert_eq!(pairs[0], ("status", DEFAULT_STATUS));
        assert_eq!(pairs[14], ("codigoPdm", ""));
    }
}
