use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CacheInfo, ClearResult, LoadResult, ProgressEvent, ProgressSink, SearchResult, SuggestResult,
    ViewResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_load(result: &LoadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_view(result: &ViewResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_suggest(result: &SuggestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cache(result: &CacheInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
