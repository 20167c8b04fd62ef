//! Filtering, sorting and paging over whichever rows are resident: one
//! server page in interactive mode, or a whole cached result set.

use std::cmp::Ordering;

use chrono::NaiveDate;
use clap::ValueEnum;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::{AdvancedFilters, PDM_CODE_ATTRIBUTE, Row, SortDirection, SortState};
use crate::error::ArpError;
use crate::normalize::normalize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    #[default]
    Contains,
    Equals,
    StartsWith,
    /// Whole words only: "cone" does not match "microfone".
    Word,
    /// Case-insensitive pattern over the raw value.
    Regex,
}

/// A single-column predicate.
#[derive(Debug, Clone)]
pub struct ColumnFilter {
    column: String,
    mode: MatchMode,
    needle: String,
    pattern: Option<Regex>,
}

impl ColumnFilter {
    pub fn new(column: &str, mode: MatchMode, value: &str) -> Result<Self, ArpError> {
        let needle = normalize(value);
        let pattern = match mode {
            _ if value.is_empty() => None,
            MatchMode::Word => Some(
                Regex::new(&format!(r"\b{}\b", regex::escape(&needle)))
                    .map_err(|err| ArpError::InvalidPattern(err.to_string()))?,
            ),
            MatchMode::Regex => Some(
                RegexBuilder::new(value)
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| ArpError::InvalidPattern(err.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self {
            column: column.to_string(),
            mode,
            needle,
            pattern,
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn matches(&self, row: &Row) -> bool {
        if self.needle.is_empty() && self.pattern.is_none() {
            return true;
        }
        let raw = row.text(&self.column).unwrap_or_default();
        if self.mode == MatchMode::Regex {
            return self
                .pattern
                .as_ref()
                .map(|pattern| pattern.is_match(&raw))
                .unwrap_or(true);
        }
        let value = normalize(&raw);
        match self.mode {
            MatchMode::Equals => value == self.needle,
            MatchMode::StartsWith => value.starts_with(&self.needle),
            MatchMode::Word => self
                .pattern
                .as_ref()
                .map(|pattern| pattern.is_match(&value))
                .unwrap_or(true),
            MatchMode::Contains | MatchMode::Regex => value.contains(&self.needle),
        }
    }
}

/// Splits a comma-separated code list, trimming and dropping blanks.
pub fn split_codes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

/// Everything applied to resident rows before paging.
#[derive(Debug, Clone, Default)]
pub struct LocalFilter {
    codes: Vec<String>,
    column: Option<ColumnFilter>,
}

impl LocalFilter {
    pub fn from_filters(filters: &AdvancedFilters) -> Self {
        Self {
            codes: filters
                .codigo_pdm
                .as_deref()
                .map(split_codes)
                .unwrap_or_default(),
            column: None,
        }
    }

    pub fn with_codes(mut self, raw: &str) -> Self {
        self.codes = split_codes(raw);
        self
    }

    pub fn with_column(mut self, filter: ColumnFilter) -> Self {
        self.column = Some(filter);
        self
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.column.is_none()
    }

    pub fn matches(&self, row: &Row) -> bool {
        if !self.codes.is_empty() {
            let Some(value) = row.text(PDM_CODE_ATTRIBUTE) else {
                return false;
            };
            if !self.codes.iter().any(|code| value.contains(code.as_str())) {
                return false;
            }
        }
        self.column
            .as_ref()
            .map(|filter| filter.matches(row))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewPage<'a> {
    pub rows: Vec<&'a Row>,
    /// Rows that passed the filter, across all pages.
    pub total: usize,
    /// At least 1, even when `total` is 0.
    pub total_pages: usize,
    pub page: usize,
}

pub struct LocalQueryEngine;

impl LocalQueryEngine {
    pub fn filter<'a>(rows: &'a [Row], filter: &LocalFilter) -> Vec<&'a Row> {
        rows.iter().filter(|row| filter.matches(row)).collect()
    }

    pub fn total_pages(total: usize, page_size: usize) -> usize {
        total.div_ceil(page_size.max(1)).max(1)
    }

    /// Rows `[(page-1)*page_size, page*page_size)` of the filtered set.
    /// Pages past the end come back empty; page 0 reads as page 1.
    pub fn view<'a>(
        rows: &'a [Row],
        filter: &LocalFilter,
        page: usize,
        page_size: usize,
    ) -> ViewPage<'a> {
        Self::paginate(Self::filter(rows, filter), page, page_size)
    }

    pub fn view_sorted<'a>(
        rows: &'a [Row],
        filter: &LocalFilter,
        sort: SortState,
        page: usize,
        page_size: usize,
    ) -> ViewPage<'a> {
        let mut keyed: Vec<(Option<SortKey>, &Row)> = Self::filter(rows, filter)
            .into_iter()
            .map(|row| (SortKey::of_row(row, sort), row))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a.as_ref(), b.as_ref(), sort.direction));
        Self::paginate(keyed.into_iter().map(|(_, row)| row).collect(), page, page_size)
    }

    fn paginate(filtered: Vec<&Row>, page: usize, page_size: usize) -> ViewPage<'_> {
        let page_size = page_size.max(1);
        let page = page.max(1);
        let total = filtered.len();
        let start = (page - 1).saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        ViewPage {
            rows: filtered[start..end].to_vec(),
            total,
            total_pages: Self::total_pages(total, page_size),
            page,
        }
    }

    /// Orders two rows by the sort column. Numbers sort before
    /// `dd/mm/yyyy` dates, dates before any other text; within a kind,
    /// numbers compare numerically, dates chronologically and text by its
    /// normalized form. Rows missing the attribute sort last in both
    /// directions.
    pub fn compare(a: &Row, b: &Row, sort: SortState) -> Ordering {
        compare_keys(
            SortKey::of_row(a, sort).as_ref(),
            SortKey::of_row(b, sort).as_ref(),
            sort.direction,
        )
    }
}

/// A cell value classified once, so every comparison uses the same kind.
#[derive(Debug, Clone)]
enum SortKey {
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl SortKey {
    fn of_row(row: &Row, sort: SortState) -> Option<Self> {
        let attribute = sort.attribute()?;
        row.text(attribute).map(|value| Self::of(&value))
    }

    fn of(value: &str) -> Self {
        let trimmed = value.trim();
        if let Some(number) = trimmed.parse::<f64>().ok().filter(|n| n.is_finite()) {
            return SortKey::Number(number);
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
            return SortKey::Date(date);
        }
        SortKey::Text(normalize(value))
    }

    fn kind(&self) -> u8 {
        match self {
            SortKey::Number(_) => 0,
            SortKey::Date(_) => 1,
            SortKey::Text(_) => 2,
        }
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Date(a), SortKey::Date(b)) => a.cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

fn compare_keys(a: Option<&SortKey>, b: Option<&SortKey>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => match direction {
            SortDirection::Asc => left.cmp(right),
            SortDirection::Desc => left.cmp(right).reverse(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_codes_drops_blanks() {
        assert_eq!(split_codes(" 123, ,456,, "), vec!["123", "456"]);
        assert!(split_codes(" , ").is_empty());
    }

    #[test]
    fn word_mode_respects_boundaries() {
        let filter = ColumnFilter::new("nome", MatchMode::Word, "Cone").unwrap();
        let cone: Row = [("nome", "CONE de sinalização")].into_iter().collect();
        let microfone: Row = [("nome", "Microfone")].into_iter().collect();
        assert!(filter.matches(&cone));
        assert!(!filter.matches(&microfone));
    }

    #[test]
    fn values_compare_within_their_kind() {
        assert_eq!(SortKey::of("9").cmp(&SortKey::of("10")), Ordering::Less);
        assert_eq!(
            SortKey::of("01/02/2024").cmp(&SortKey::of("15/01/2024")),
            Ordering::Greater
        );
        assert_eq!(SortKey::of("Água").cmp(&SortKey::of("agua")), Ordering::Equal);
    }

    #[test]
    fn kinds_order_numbers_then_dates_then_text() {
        let two = SortKey::of("2");
        let ten = SortKey::of("10");
        let code = SortKey::of("1a");
        assert!(two < ten);
        assert!(ten < code);
        assert!(two < code);
        assert!(SortKey::of("999") < SortKey::of("01/01/2000"));
        assert!(SortKey::of("31/12/2099") < SortKey::of("abc"));
        assert!(matches!(SortKey::of("NaN"), SortKey::Text(_)));
    }
}
