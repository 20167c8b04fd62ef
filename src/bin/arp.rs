use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use arp_harvester::app::{App, LoadResult, PageOptions, ProgressEvent, ProgressSink};
use arp_harvester::cache::CacheEntry;
use arp_harvester::catalog::CatalogHttpClient;
use arp_harvester::client::ArpHttpClient;
use arp_harvester::config::{ConfigLoader, ResolvedConfig};
use arp_harvester::domain::{AdvancedFilters, Query, Row, SortDirection, SortState};
use arp_harvester::engine::{ColumnFilter, LocalFilter, MatchMode};
use arp_harvester::error::ArpError;
use arp_harvester::normalize::normalize;
use arp_harvester::orchestrator::{CancelToken, LoadOutcome, LoadPrompt};
use arp_harvester::output::{JsonOutput, OutputMode};
use arp_harvester::suggest::{
    SuggestionCandidate, SuggestionDebouncer, SuggestionPages, SuggestionRanker, score_breakdown,
};

type HttpApp = App<ArpHttpClient, CatalogHttpClient>;

/// Attributes shown per row in human output.
const SUMMARY_COLUMNS: [&str; 5] = [
    "numero",
    "codigo_pdm",
    "descricaodetalhada",
    "fornecedor",
    "unidade_federacao",
];

#[derive(Parser)]
#[command(name = "arp")]
#[command(about = "Search the ARP item listing, harvest full result sets and browse them offline")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch one server page for a keyword")]
    Search(SearchArgs),
    #[command(about = "Fetch every page for a keyword and cache the result set")]
    Load(LoadArgs),
    #[command(about = "Filter, sort and page a cached result set")]
    View(ViewArgs),
    #[command(about = "Rank catalog suggestions for a partial keyword")]
    Suggest(SuggestArgs),
    #[command(about = "Inspect or clear the result cache")]
    Cache(CacheArgs),
}

#[derive(Args, Clone)]
struct PagingArgs {
    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long, default_value_t = 10)]
    page_size: usize,

    #[arg(long)]
    sort_column: Option<usize>,

    #[arg(long)]
    desc: bool,

    /// Comma-separated PDM codes; a row passes when its code contains any.
    #[arg(long)]
    pdm: Option<String>,
}

impl PagingArgs {
    fn sort(&self) -> Option<SortState> {
        let direction = if self.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        match (self.sort_column, self.desc) {
            (Some(column), _) => Some(SortState::new(column, direction)),
            (None, true) => Some(SortState::new(SortState::DEFAULT_COLUMN, direction)),
            (None, false) => None,
        }
    }

    fn page_options(&self) -> PageOptions {
        PageOptions {
            page: self.page,
            page_size: self.page_size,
            sort: self.sort().unwrap_or_default(),
        }
    }
}

#[derive(Args)]
struct SearchArgs {
    keyword: String,

    #[command(flatten)]
    paging: PagingArgs,

    #[arg(long)]
    status: Option<String>,

    #[arg(long)]
    uf: Option<String>,

    #[arg(long)]
    supplier_unit: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    keyword: String,

    /// Ignore an existing cache entry and fetch again.
    #[arg(long)]
    refresh: bool,

    /// Answer yes to the cache and large-result prompts.
    #[arg(long)]
    yes: bool,
}

#[derive(Args)]
struct ViewArgs {
    keyword: String,

    #[command(flatten)]
    paging: PagingArgs,

    #[arg(long, requires = "value")]
    column: Option<String>,

    #[arg(long, value_enum, default_value_t = MatchMode::Contains)]
    mode: MatchMode,

    #[arg(long)]
    value: Option<String>,
}

#[derive(Args)]
struct SuggestArgs {
    #[arg(required_unless_present = "watch")]
    query: Option<String>,

    /// Zero-based suggestion page to print.
    #[arg(long, default_value_t = 0)]
    page: usize,

    /// Print the scoring rules that fired for each suggestion.
    #[arg(long)]
    explain: bool,

    /// Read one query per stdin line and answer once typing pauses.
    #[arg(long)]
    watch: bool,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Show the cached entry for a keyword")]
    Show { keyword: String },
    #[command(about = "Remove every cached result set")]
    Clear,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ArpError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArpError) -> u8 {
    match error {
        ArpError::EmptyQuery | ArpError::NotCached(_) | ArpError::InvalidPattern(_) => 2,
        err if err.is_transport() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(&config)?;

    match cli.command {
        Commands::Search(args) => run_search(args, &app, output_mode),
        Commands::Load(args) => run_load(args, &app, output_mode),
        Commands::View(args) => run_view(args, &app, output_mode),
        Commands::Suggest(args) if args.watch => run_watch(&config),
        Commands::Suggest(args) => run_suggest(args, &app, output_mode),
        Commands::Cache(args) => run_cache(args, &app, output_mode),
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<HttpApp> {
    let client = ArpHttpClient::new(&config.api_base_url, config.timeout)?;
    let lookup = CatalogHttpClient::new(&config.lookup_base_url, config.timeout)?;
    Ok(App::from_config(config, client, lookup)?)
}

fn run_search(args: SearchArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let filters = AdvancedFilters {
        status: args.status,
        uf: args.uf,
        codigo_unidade: args.supplier_unit,
        codigo_pdm: args.paging.pdm.clone(),
        ..AdvancedFilters::default()
    };
    let query = Query::new(args.keyword).with_filters(filters);
    let options = args.paging.page_options();

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.search(&query, options, &JsonOutput)?;
            JsonOutput::print_search(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let sink = BarSink::spinner();
            let result = app.search(&query, options, &sink);
            sink.finish();
            let result = result?;
            println!(
                "page {}/{} ({} matches on server, {} shown after local filters)",
                result.page, result.total_pages, result.total, result.filtered
            );
            print_rows(&result.rows);
            Ok(())
        }
    }
}

fn run_load(args: LoadArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let query = Query::new(args.keyword.clone());
    let prompt = StdinPrompt {
        reuse_cache: !args.refresh,
        assume_yes: args.yes || matches!(output_mode, OutputMode::NonInteractive),
    };

    let interrupt = InterruptCancel::install(app.orchestrator().cancel_token())?;
    let outcome = match output_mode {
        OutputMode::NonInteractive => app.load_all(&query, &prompt, &JsonOutput),
        OutputMode::Interactive => {
            let sink = BarSink::percent();
            let outcome = app.load_all(&query, &prompt, &sink);
            sink.finish();
            outcome
        }
    };
    drop(interrupt);
    let outcome = outcome?;

    let result = LoadResult::from_outcome(&args.keyword, &outcome);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_load(&result).into_diagnostic(),
        OutputMode::Interactive => {
            match &outcome {
                LoadOutcome::Loaded { rows, .. } => {
                    println!("{} rows loaded and cached for \"{}\"", rows.len(), args.keyword)
                }
                LoadOutcome::Cached(entry) => println!(
                    "using {} cached rows saved at {}",
                    entry.rows.len(),
                    entry.saved_at.to_rfc3339()
                ),
                LoadOutcome::Cancelled { .. } => println!("load cancelled, nothing cached"),
                LoadOutcome::Declined { total } => {
                    println!("load of {total} rows declined, nothing fetched")
                }
            }
            Ok(())
        }
    }
}

fn run_view(args: ViewArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let mut filter = LocalFilter::default();
    if let Some(codes) = args.paging.pdm.as_deref() {
        filter = filter.with_codes(codes);
    }
    if let (Some(column), Some(value)) = (args.column.as_deref(), args.value.as_deref()) {
        filter = filter.with_column(ColumnFilter::new(column, args.mode, value)?);
    }

    let result = app.view(
        &args.keyword,
        &filter,
        args.paging.sort(),
        args.paging.page_options(),
    )?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_view(&result).into_diagnostic(),
        OutputMode::Interactive => {
            println!(
                "cache of {} rows from {} | filtered: {} | page {}/{}",
                result.cached_rows, result.saved_at, result.total, result.page, result.total_pages
            );
            print_rows(&result.rows);
            Ok(())
        }
    }
}

fn run_suggest(args: SuggestArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let query = args.query.unwrap_or_default();
    let result = app.suggest(&query);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_suggest(&result).into_diagnostic(),
        OutputMode::Interactive => {
            if result.suggestions.is_empty() {
                println!("no suggestions for \"{query}\"");
                return Ok(());
            }
            let pages = SuggestionPages::new(&result.suggestions);
            let index = args.page.min(pages.page_count().saturating_sub(1));
            println!("suggestions page {}/{}", index + 1, pages.page_count());
            for item in pages.page(index) {
                print_suggestion(item);
                if args.explain {
                    let folded = normalize(&query);
                    for (rule, points) in score_breakdown(&folded, &normalize(&item.display_name)) {
                        println!("          {rule:<22} +{points}");
                    }
                }
            }
            Ok(())
        }
    }
}

fn run_watch(config: &ResolvedConfig) -> miette::Result<()> {
    let lookup = CatalogHttpClient::new(&config.lookup_base_url, config.timeout)?;
    let (debouncer, batches) =
        SuggestionDebouncer::spawn(SuggestionRanker::new(lookup), config.debounce);

    let printer = thread::spawn(move || {
        for batch in batches {
            println!("-- {} suggestions for \"{}\"", batch.suggestions.len(), batch.query);
            for item in SuggestionPages::new(&batch.suggestions).page(0) {
                print_suggestion(item);
            }
        }
    });

    for line in io::stdin().lock().lines() {
        debouncer.input(&line.into_diagnostic()?);
    }
    // Give the last query its quiet period before shutting down.
    thread::sleep(config.debounce + Duration::from_secs(1));
    drop(debouncer);
    let _ = printer.join();
    Ok(())
}

fn print_suggestion(item: &SuggestionCandidate) {
    match &item.class_name {
        Some(class) => println!(
            "{:>8}  {}  ({class}) [{}]",
            item.code, item.display_name, item.score
        ),
        None => println!("{:>8}  {} [{}]", item.code, item.display_name, item.score),
    }
}

fn run_cache(args: CacheArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    match args.command {
        CacheCommand::Show { keyword } => {
            let info = app.cache_info(&keyword)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_cache(&info).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "\"{}\": {} rows saved at {}",
                        info.keyword, info.rows, info.saved_at
                    );
                    Ok(())
                }
            }
        }
        CacheCommand::Clear => match output_mode {
            OutputMode::NonInteractive => {
                let result = app.clear_cache(&JsonOutput)?;
                JsonOutput::print_clear(&result).into_diagnostic()
            }
            OutputMode::Interactive => {
                if !ask("Clear every cached result set?")? {
                    return Ok(());
                }
                let sink = BarSink::spinner();
                let result = app.clear_cache(&sink);
                sink.finish();
                let result = result?;
                println!("cache cleared ({} entries)", result.cleared);
                Ok(())
            }
        },
    }
}

fn print_rows(rows: &[Row]) {
    for row in rows {
        let cells: Vec<String> = SUMMARY_COLUMNS
            .iter()
            .map(|column| {
                row.text(column)
                    .map(|value| value.into_owned())
                    .unwrap_or_else(|| "-".to_string())
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
}

fn ask(question: &str) -> miette::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{question} [y/N] ").into_diagnostic()?;
    stderr.flush().into_diagnostic()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).into_diagnostic()?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "s" | "sim"))
}

struct StdinPrompt {
    reuse_cache: bool,
    assume_yes: bool,
}

impl LoadPrompt for StdinPrompt {
    fn use_cached(&self, entry: &CacheEntry) -> bool {
        if !self.reuse_cache {
            return false;
        }
        if self.assume_yes {
            return true;
        }
        ask(&format!(
            "Found {} cached rows for \"{}\". Use the cache?",
            entry.rows.len(),
            entry.key
        ))
        .unwrap_or(false)
    }

    fn confirm_large(&self, total: u64) -> bool {
        if self.assume_yes {
            return true;
        }
        ask(&format!("{total} rows matched; this can take minutes. Continue?")).unwrap_or(false)
    }
}

/// While alive, the first Ctrl-C requests a cooperative stop at the next
/// wave boundary; a second one exits immediately.
#[cfg(unix)]
struct InterruptCancel {
    handle: signal_hook::iterator::Handle,
    listener: Option<thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl InterruptCancel {
    fn install(token: CancelToken) -> miette::Result<Self> {
        use signal_hook::consts::signal::SIGINT;

        let mut signals = signal_hook::iterator::Signals::new([SIGINT]).into_diagnostic()?;
        let handle = signals.handle();
        let listener = thread::spawn(move || {
            let mut interrupted = false;
            for _ in signals.forever() {
                if interrupted {
                    std::process::exit(130);
                }
                interrupted = true;
                eprintln!("interrupt received, stopping after the current wave");
                token.cancel();
            }
        });
        Ok(Self {
            handle,
            listener: Some(listener),
        })
    }
}

#[cfg(unix)]
impl Drop for InterruptCancel {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}

#[cfg(not(unix))]
struct InterruptCancel;

#[cfg(not(unix))]
impl InterruptCancel {
    fn install(_token: CancelToken) -> miette::Result<Self> {
        Ok(Self)
    }
}

struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn percent() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.green/white} {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    fn spinner() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn event(&self, event: ProgressEvent) {
        if let Some(percent) = event.percent {
            self.bar.set_position(u64::from(percent));
        }
        self.bar.set_message(event.message);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use signal_hook::consts::signal::SIGINT;

    use super::*;

    #[test]
    fn first_interrupt_cancels_the_load() {
        let token = CancelToken::default();
        let interrupt = InterruptCancel::install(token.clone()).unwrap();

        signal_hook::low_level::raise(SIGINT).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !token.is_cancelled() {
            assert!(Instant::now() < deadline, "interrupt never reached the token");
            thread::sleep(Duration::from_millis(5));
        }
        drop(interrupt);
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(map_exit_code(&ArpError::EmptyQuery), 2);
        assert_eq!(map_exit_code(&ArpError::NotCached("cafe".to_string())), 2);
        assert_eq!(map_exit_code(&ArpError::Http("reset".to_string())), 3);
        assert_eq!(map_exit_code(&ArpError::RunInProgress), 1);
    }
}
