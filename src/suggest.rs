//! Ranked catalog suggestions for the keyword box.
//!
//! Scoring is a flat list of independent rules whose weights add up; no
//! rule short-circuits another. Exact and near-exact names therefore land
//! far above loose substring hits, and the word-level rules let
//! multi-word queries match reordered or partial names.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{LookupCandidate, LookupClient};
use crate::normalize::normalize;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
/// Lookup results considered for ranking.
pub const MAX_CANDIDATES: usize = 50;
/// Ranked suggestions returned.
pub const MAX_SUGGESTIONS: usize = 18;
pub const SUGGESTIONS_PER_PAGE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestionCandidate {
    pub code: String,
    pub display_name: String,
    pub class_name: Option<String>,
    pub score: i64,
}

struct ScoreInput<'a> {
    query: &'a str,
    name: &'a str,
    length_diff: usize,
    query_words: Vec<&'a str>,
    name_words: Vec<&'a str>,
}

impl<'a> ScoreInput<'a> {
    fn new(query: &'a str, name: &'a str) -> Self {
        Self {
            query,
            name,
            length_diff: name.chars().count().abs_diff(query.chars().count()),
            query_words: query
                .split(' ')
                .filter(|word| word.chars().count() > 1)
                .collect(),
            name_words: name.split(' ').collect(),
        }
    }

    fn word_pairs(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.query_words.iter().flat_map(|query_word| {
            self.name_words
                .iter()
                .map(move |name_word| (*query_word, *name_word))
        })
    }
}

struct ScoreRule {
    name: &'static str,
    apply: fn(&ScoreInput<'_>) -> i64,
}

const RULES: &[ScoreRule] = &[
    ScoreRule {
        name: "exact",
        apply: exact_name,
    },
    ScoreRule {
        name: "near_length_contains",
        apply: near_length_contains,
    },
    ScoreRule {
        name: "prefix",
        apply: name_prefix,
    },
    ScoreRule {
        name: "contains",
        apply: name_contains,
    },
    ScoreRule {
        name: "word_equal",
        apply: word_equal,
    },
    ScoreRule {
        name: "word_prefix",
        apply: word_prefix,
    },
    ScoreRule {
        name: "word_contains",
        apply: word_contains,
    },
    ScoreRule {
        name: "whole_query_is_word",
        apply: whole_query_is_word,
    },
];

fn exact_name(input: &ScoreInput<'_>) -> i64 {
    if input.name == input.query { 10_000 } else { 0 }
}

fn near_length_contains(input: &ScoreInput<'_>) -> i64 {
    if input.length_diff <= 2 && input.name.contains(input.query) {
        5_000
    } else {
        0
    }
}

fn name_prefix(input: &ScoreInput<'_>) -> i64 {
    match input.name.starts_with(input.query) {
        true if input.length_diff <= 3 => 1_500,
        true => 1_000,
        false => 0,
    }
}

fn name_contains(input: &ScoreInput<'_>) -> i64 {
    if input.name.contains(input.query) { 200 } else { 0 }
}

fn word_equal(input: &ScoreInput<'_>) -> i64 {
    input
        .word_pairs()
        .filter(|(query_word, name_word)| query_word == name_word)
        .count() as i64
        * 800
}

fn word_prefix(input: &ScoreInput<'_>) -> i64 {
    input
        .word_pairs()
        .filter(|(query_word, name_word)| name_word.starts_with(query_word))
        .map(|(query_word, name_word)| {
            if name_word.chars().count().abs_diff(query_word.chars().count()) <= 2 {
                400
            } else {
                100
            }
        })
        .sum()
}

fn word_contains(input: &ScoreInput<'_>) -> i64 {
    input
        .word_pairs()
        .filter(|(query_word, name_word)| name_word.contains(query_word))
        .count() as i64
        * 50
}

fn whole_query_is_word(input: &ScoreInput<'_>) -> i64 {
    if input.name_words.iter().any(|word| *word == input.query) {
        3_000
    } else {
        0
    }
}

/// Total score of an already-normalized name against a normalized query.
pub fn score(query: &str, name: &str) -> i64 {
    let input = ScoreInput::new(query, name);
    RULES.iter().map(|rule| (rule.apply)(&input)).sum()
}

/// Per-rule contributions, omitting rules that did not fire.
pub fn score_breakdown(query: &str, name: &str) -> Vec<(&'static str, i64)> {
    let input = ScoreInput::new(query, name);
    RULES
        .iter()
        .map(|rule| (rule.name, (rule.apply)(&input)))
        .filter(|(_, points)| *points != 0)
        .collect()
}

/// Scores the first [`MAX_CANDIDATES`] candidates and keeps the best
/// [`MAX_SUGGESTIONS`]. Ties keep lookup order.
pub fn rank(raw_query: &str, candidates: Vec<LookupCandidate>) -> Vec<SuggestionCandidate> {
    let query = normalize(raw_query);
    let mut scored: Vec<SuggestionCandidate> = candidates
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|candidate| SuggestionCandidate {
            score: score(&query, &normalize(&candidate.name)),
            code: candidate.code,
            display_name: candidate.name,
            class_name: candidate.class_name,
        })
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(MAX_SUGGESTIONS);
    scored
}

pub struct SuggestionRanker<L: LookupClient> {
    lookup: L,
}

impl<L: LookupClient> SuggestionRanker<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    pub fn lookup_client(&self) -> &L {
        &self.lookup
    }

    /// Best-effort: lookup failures come back as an empty list.
    pub fn suggest(&self, raw_query: &str) -> Vec<SuggestionCandidate> {
        if raw_query.trim().is_empty() {
            return Vec::new();
        }
        match self.lookup.lookup(raw_query) {
            Ok(candidates) => rank(raw_query, candidates),
            Err(err) => {
                warn!(query = raw_query, error = %err, "catalog.lookup_failed");
                Vec::new()
            }
        }
    }
}

/// Display slices of a ranked list, six per page.
pub struct SuggestionPages<'a> {
    items: &'a [SuggestionCandidate],
}

impl<'a> SuggestionPages<'a> {
    pub fn new(items: &'a [SuggestionCandidate]) -> Self {
        Self { items }
    }

    pub fn page_count(&self) -> usize {
        self.items
            .len()
            .div_ceil(SUGGESTIONS_PER_PAGE)
            .min(MAX_SUGGESTIONS / SUGGESTIONS_PER_PAGE)
    }

    /// Zero-based page; out-of-range indices clip to the last page.
    pub fn page(&self, index: usize) -> &'a [SuggestionCandidate] {
        let count = self.page_count();
        if count == 0 {
            return &[];
        }
        let index = index.min(count - 1);
        let start = index * SUGGESTIONS_PER_PAGE;
        let end = (start + SUGGESTIONS_PER_PAGE).min(self.items.len());
        &self.items[start..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionBatch {
    pub query: String,
    pub suggestions: Vec<SuggestionCandidate>,
}

#[derive(Default)]
struct Slot {
    pending: Option<(String, Instant)>,
    generation: u64,
    shutdown: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
}

/// Runs [`SuggestionRanker::suggest`] once input has been quiet for the
/// debounce delay.
///
/// There is exactly one pending slot: each [`input`](Self::input)
/// replaces it and restarts the timer. A lookup that finishes after a
/// newer input arrived is dropped, so only the latest query is answered.
pub struct SuggestionDebouncer {
    shared: Arc<Shared>,
    results: Sender<SuggestionBatch>,
    worker: Option<JoinHandle<()>>,
}

impl SuggestionDebouncer {
    pub fn spawn<L: LookupClient + 'static>(
        ranker: SuggestionRanker<L>,
        delay: Duration,
    ) -> (Self, Receiver<SuggestionBatch>) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            thread::spawn(move || run_worker(&shared, &ranker, delay, &tx))
        };
        (
            Self {
                shared,
                results: tx,
                worker: Some(worker),
            },
            rx,
        )
    }

    pub fn input(&self, raw_query: &str) {
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.generation += 1;
        if raw_query.trim().is_empty() {
            slot.pending = None;
            drop(slot);
            let _ = self.results.send(SuggestionBatch {
                query: raw_query.to_string(),
                suggestions: Vec::new(),
            });
            return;
        }
        slot.pending = Some((raw_query.to_string(), Instant::now()));
        self.shared.wake.notify_one();
    }
}

impl Drop for SuggestionDebouncer {
    fn drop(&mut self) {
        {
            let mut slot = self
                .shared
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.shutdown = true;
            slot.pending = None;
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<L: LookupClient>(
    shared: &Shared,
    ranker: &SuggestionRanker<L>,
    delay: Duration,
    results: &Sender<SuggestionBatch>,
) {
    let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if slot.shutdown {
            return;
        }
        let Some((query, touched)) = slot.pending.clone() else {
            slot = shared.wake.wait(slot).unwrap_or_else(PoisonError::into_inner);
            continue;
        };
        let due = touched + delay;
        let now = Instant::now();
        if now < due {
            slot = shared
                .wake
                .wait_timeout(slot, due - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let generation = slot.generation;
        slot.pending = None;
        drop(slot);

        debug!(query = %query, "suggest.lookup");
        let suggestions = ranker.suggest(&query);

        slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.shutdown {
            return;
        }
        if slot.generation != generation {
            debug!(query = %query, "suggest.stale");
            continue;
        }
        if results.send(SuggestionBatch { query, suggestions }).is_err() {
            return;
        }
    }
}
