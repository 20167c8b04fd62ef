use assert_matches::assert_matches;
use serde_json::Value;

use arp_harvester::domain::{AdvancedFilters, COLUMNS, Row, SortDirection, SortState};
use arp_harvester::engine::{ColumnFilter, LocalFilter, LocalQueryEngine, MatchMode};
use arp_harvester::error::ArpError;

fn row(code: &str, descricao: &str) -> Row {
    [
        ("codigo_pdm", Value::from(code)),
        ("descricaodetalhada", Value::from(descricao)),
    ]
    .into_iter()
    .collect()
}

fn numbered(count: usize) -> Vec<Row> {
    (0..count)
        .map(|idx| [("seq", Value::from(idx))].into_iter().collect::<Row>())
        .collect()
}

fn codes(rows: &[&Row]) -> Vec<String> {
    rows.iter()
        .map(|row| row.text("codigo_pdm").unwrap_or_default().into_owned())
        .collect()
}

fn sort_column(attribute: &str) -> usize {
    COLUMNS.iter().position(|name| *name == attribute).unwrap()
}

#[test]
fn code_list_keeps_rows_containing_any_code() {
    let rows = vec![row("ABC123", "a"), row("XYZ456", "b"), row("QQQ789", "c")];
    let filter = LocalFilter::default().with_codes("123, 456");

    let kept = LocalQueryEngine::filter(&rows, &filter);

    assert_eq!(codes(&kept), vec!["ABC123", "XYZ456"]);
}

#[test]
fn blank_code_list_keeps_everything() {
    let rows = vec![row("1", "a"), row("2", "b")];
    let filter = LocalFilter::default().with_codes(" , ,");
    assert!(filter.is_empty());
    assert_eq!(LocalQueryEngine::filter(&rows, &filter).len(), 2);
}

#[test]
fn code_filter_drops_rows_without_a_code() {
    let rows = vec![row("123", "a"), [("descricaodetalhada", "b")].into_iter().collect::<Row>()];
    let filter = LocalFilter::default().with_codes("123");
    assert_eq!(LocalQueryEngine::filter(&rows, &filter).len(), 1);
}

#[test]
fn numeric_codes_match_as_text() {
    let rows = vec![[("codigo_pdm", Value::from(51230))].into_iter().collect::<Row>()];
    let filter = LocalFilter::from_filters(&AdvancedFilters {
        codigo_pdm: Some("123".to_string()),
        ..AdvancedFilters::default()
    });
    assert_eq!(LocalQueryEngine::filter(&rows, &filter).len(), 1);
}

#[test]
fn pages_cover_every_filtered_row_once() {
    for (count, page_size) in [(0, 10), (1, 10), (10, 10), (23, 5), (24, 7), (100, 1)] {
        let rows = numbered(count);
        let filter = LocalFilter::default();
        let pages = LocalQueryEngine::total_pages(count, page_size);
        assert_eq!(pages, count.div_ceil(page_size).max(1));

        let mut seen = Vec::new();
        for page in 1..=pages {
            let view = LocalQueryEngine::view(&rows, &filter, page, page_size);
            assert_eq!(view.total, count);
            assert_eq!(view.total_pages, pages);
            assert!(view.rows.len() <= page_size);
            seen.extend(
                view.rows
                    .iter()
                    .map(|row| row.get("seq").and_then(Value::as_u64).unwrap()),
            );
        }
        assert_eq!(seen, (0..count as u64).collect::<Vec<_>>());
    }
}

#[test]
fn page_past_the_end_is_empty() {
    let rows = numbered(3);
    let view = LocalQueryEngine::view(&rows, &LocalFilter::default(), 5, 10);
    assert!(view.rows.is_empty());
    assert_eq!(view.total, 3);
    assert_eq!(view.total_pages, 1);
}

#[test]
fn empty_result_still_reports_one_page() {
    let view = LocalQueryEngine::view(&[], &LocalFilter::default(), 1, 10);
    assert_eq!(view.total, 0);
    assert_eq!(view.total_pages, 1);
}

#[test]
fn totals_count_filtered_rows() {
    let rows = vec![row("123", "a"), row("456", "b"), row("1234", "c")];
    let filter = LocalFilter::default().with_codes("123");
    let view = LocalQueryEngine::view(&rows, &filter, 1, 1);
    assert_eq!(view.total, 2);
    assert_eq!(view.total_pages, 2);
}

#[test]
fn sort_toggle_follows_header_clicks() {
    let mut sort = SortState::default();
    assert_eq!(sort, SortState::new(3, SortDirection::Asc));

    sort.select(3);
    assert_eq!(sort.direction, SortDirection::Desc);
    sort.select(3);
    assert_eq!(sort.direction, SortDirection::Asc);
    sort.select(3);
    sort.select(5);
    assert_eq!(sort, SortState::new(5, SortDirection::Asc));
}

#[test]
fn sorted_view_orders_text_numbers_and_dates() {
    let descricao = sort_column("descricaodetalhada");
    let rows = vec![row("1", "Caneta"), row("2", "Água"), row("3", "borracha")];
    let view = LocalQueryEngine::view_sorted(
        &rows,
        &LocalFilter::default(),
        SortState::new(descricao, SortDirection::Asc),
        1,
        10,
    );
    assert_eq!(codes(&view.rows), vec!["2", "3", "1"]);

    let desc = LocalQueryEngine::view_sorted(
        &rows,
        &LocalFilter::default(),
        SortState::new(descricao, SortDirection::Desc),
        1,
        10,
    );
    assert_eq!(codes(&desc.rows), vec!["1", "3", "2"]);
}

#[test]
fn rows_missing_the_sort_attribute_sort_last() {
    let descricao = sort_column("descricaodetalhada");
    let rows = vec![
        [("codigo_pdm", "blank")].into_iter().collect::<Row>(),
        row("b", "Zinco"),
        row("a", "Alumínio"),
    ];
    for direction in [SortDirection::Asc, SortDirection::Desc] {
        let view = LocalQueryEngine::view_sorted(
            &rows,
            &LocalFilter::default(),
            SortState::new(descricao, direction),
            1,
            10,
        );
        assert_eq!(codes(&view.rows).last().map(String::as_str), Some("blank"));
    }
}

#[test]
fn column_filter_modes() {
    let rows = vec![
        row("1", "Microfone sem fio"),
        row("2", "Cone de sinalização"),
        row("3", "Conector RJ45"),
    ];
    let matching = |mode: MatchMode, value: &str| {
        let filter = LocalFilter::default()
            .with_column(ColumnFilter::new("descricaodetalhada", mode, value).unwrap());
        codes(&LocalQueryEngine::filter(&rows, &filter))
    };

    assert_eq!(matching(MatchMode::Contains, "CONE"), vec!["2", "3"]);
    assert_eq!(matching(MatchMode::Word, "cone"), vec!["2"]);
    assert_eq!(matching(MatchMode::StartsWith, "con"), vec!["2", "3"]);
    assert_eq!(matching(MatchMode::Equals, "conector rj45"), vec!["3"]);
    assert_eq!(matching(MatchMode::Regex, r"rj\d+$"), vec!["3"]);
    assert_eq!(matching(MatchMode::Contains, "sinalizacao"), vec!["2"]);
}

#[test]
fn invalid_regex_is_rejected() {
    let err = ColumnFilter::new("descricaodetalhada", MatchMode::Regex, "(").unwrap_err();
    assert_matches!(err, ArpError::InvalidPattern(_));
}

#[test]
fn mixed_numeric_and_code_column_sorts_totally() {
    let numero = sort_column("numero");
    let values = [
        "2", "10", "1a", "3", "20", "1b", "5", "x", "100", "1c", "9", "30a", "4", "05/03/2024",
    ];
    // Deterministic shuffle so the run does not depend on input order.
    let mut state = 0x2545_f491_u64;
    let rows: Vec<Row> = (0..200)
        .map(|_| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let value = values[(state >> 33) as usize % values.len()];
            [("numero", value)].into_iter().collect::<Row>()
        })
        .collect();

    for direction in [SortDirection::Asc, SortDirection::Desc] {
        let sort = SortState::new(numero, direction);
        let view = LocalQueryEngine::view_sorted(&rows, &LocalFilter::default(), sort, 1, 10_000);
        assert_eq!(view.rows.len(), 200);
        for pair in view.rows.windows(2) {
            assert_ne!(
                LocalQueryEngine::compare(pair[0], pair[1], sort),
                std::cmp::Ordering::Greater
            );
        }
    }

    let asc = LocalQueryEngine::view_sorted(
        &rows,
        &LocalFilter::default(),
        SortState::new(numero, SortDirection::Asc),
        1,
        10_000,
    );
    let ordered: Vec<String> = asc
        .rows
        .iter()
        .map(|row| row.text("numero").unwrap().into_owned())
        .collect();
    let first_text = ordered
        .iter()
        .position(|value| value.parse::<f64>().is_err())
        .unwrap();
    assert!(ordered[first_text..].iter().all(|value| value.parse::<f64>().is_err()));
    let numbers: Vec<f64> = ordered[..first_text]
        .iter()
        .map(|value| value.parse().unwrap())
        .collect();
    assert!(numbers.windows(2).all(|pair| pair[0] <= pair[1]));
}
