use std::error::Error;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use sheetsearch_rs::highlight::CARD_FIELD_LIMIT;
use sheetsearch_rs::ingest::{JsonTableDecoder, ingest_paths};
use sheetsearch_rs::sample::{self, SAMPLE_SHEET_ID};
use sheetsearch_rs::{
    AppStore, LiveSearch, SearchEngine, SearchResult, SearchSettings, SearchState, SettingsPatch,
    Sheet, SheetFilter, SheetSource, Span, annotate, group_results, matching_fields, now_ms,
};
use termimad::{FmtText, MadSkin, terminal_size};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_STATE_FILE: &str = "sheetsearch-state.json";

#[derive(Parser, Debug)]
#[command(name = "sheetsearch", about = "Fuzzy search across spreadsheet rows", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// State file holding sheets, search history and settings.
    #[arg(long, global = true, default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load JSON tables into the workspace.
    Import {
        /// Files to load; each becomes one sheet per worksheet.
        files: Vec<PathBuf>,
        /// Where the files came from.
        #[arg(long, default_value_t = SheetSource::Upload)]
        source: SheetSource,
        /// Also load the built-in Studio Video Database.
        #[arg(long)]
        sample: bool,
    },
    /// Search every row of the loaded sheets.
    Search(SearchArgs),
    /// Read queries from stdin, one per line, and search as they arrive.
    Live {
        /// Restrict results to one sheet (id or name).
        #[arg(long)]
        sheet: Option<String>,
        /// Search the built-in sample instead of the state file.
        #[arg(long)]
        demo: bool,
    },
    /// List loaded sheets.
    Sheets {
        /// Remove the sheet with this id or name.
        #[arg(long, value_name = "SHEET")]
        remove: Option<String>,
    },
    /// Show recent searches.
    History {
        /// Forget all recorded searches.
        #[arg(long)]
        clear: bool,
        /// Maximum number of entries to show.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Summarize the workspace.
    Stats,
    /// Replace the tags on a row.
    Tag {
        /// Sheet id or name.
        sheet: String,
        /// 1-based row number as shown in results.
        row: usize,
        /// New tags; none clears them.
        tags: Vec<String>,
    },
    /// Set metadata fields on a row.
    Meta {
        /// Sheet id or name.
        sheet: String,
        /// 1-based row number as shown in results.
        row: usize,
        /// Fields as key=value; values that parse as JSON keep their type.
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Show or change search settings.
    Settings(SettingsArgs),
    /// Manage saved searches.
    #[command(subcommand)]
    Saved(SavedCommand),
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Query text; multiple words are joined with spaces.
    #[arg(required = true)]
    query: Vec<String>,
    /// Restrict results to one sheet (id or name).
    #[arg(long)]
    sheet: Option<String>,
    /// Maximum number of results for this run.
    #[arg(short, long)]
    limit: Option<usize>,
    /// Fuzzy threshold for this run (0.0 exact, 1.0 anything).
    #[arg(long)]
    threshold: Option<f64>,
    /// Leave row tags out of the searchable text.
    #[arg(long)]
    no_tags: bool,
    /// Leave row metadata out of the searchable text.
    #[arg(long)]
    no_metadata: bool,
    /// Do not mark matching terms.
    #[arg(long)]
    no_highlight: bool,
    /// Search the built-in sample instead of the state file.
    #[arg(long)]
    demo: bool,
}

#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    max_results: Option<usize>,
    #[arg(long, value_name = "BOOL")]
    search_tags: Option<bool>,
    #[arg(long, value_name = "BOOL")]
    search_metadata: Option<bool>,
    #[arg(long, value_name = "BOOL")]
    highlight: Option<bool>,
}

#[derive(Subcommand, Debug)]
enum SavedCommand {
    /// List saved searches.
    List,
    /// Save a query under a name.
    Add {
        name: String,
        query: String,
        /// Restrict the saved search to one sheet (id or name).
        #[arg(long)]
        sheet: Option<String>,
    },
    /// Delete a saved search.
    Remove { id: String },
    /// Run a saved search by id or name.
    Run { id: String },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();
    let as_json = cli.json;
    let open = |demo: bool| -> Result<AppStore, Box<dyn Error>> {
        if demo {
            Ok(AppStore::with_sheets(sample::sample_sheets()))
        } else {
            Ok(AppStore::load(&cli.state)?)
        }
    };

    match cli.command {
        Command::Import {
            files,
            source,
            sample,
        } => handle_import(&open(false)?, files, source, sample, as_json),
        Command::Search(args) => handle_search(&open(args.demo)?, args, as_json),
        Command::Live { sheet, demo } => handle_live(open(demo)?, sheet, as_json),
        Command::Sheets { remove } => handle_sheets(&open(false)?, remove, as_json),
        Command::History { clear, limit } => handle_history(&open(false)?, clear, limit, as_json),
        Command::Stats => handle_stats(&open(false)?, as_json),
        Command::Tag { sheet, row, tags } => handle_tag(&open(false)?, &sheet, row, tags, as_json),
        Command::Meta { sheet, row, fields } => {
            handle_meta(&open(false)?, &sheet, row, fields, as_json)
        }
        Command::Settings(args) => handle_settings(&open(false)?, args, as_json),
        Command::Saved(command) => handle_saved(&open(false)?, command, as_json),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn handle_import(
    store: &AppStore,
    files: Vec<PathBuf>,
    source: SheetSource,
    with_sample: bool,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if files.is_empty() && !with_sample {
        return Err("Nothing to import; pass one or more files or --sample".into());
    }
    let mut report = ingest_paths(&JsonTableDecoder, &files, source);
    let mut sample_added = false;
    if with_sample && store.sheet(SAMPLE_SHEET_ID).is_none() {
        report.sheets.push(sample::sample_video_database());
        sample_added = true;
    }
    let names: Vec<String> = report.sheets.iter().map(|sheet| sheet.name.clone()).collect();
    store.add_sheets(std::mem::take(&mut report.sheets));

    if as_json {
        let outcomes: Vec<_> = report
            .outcomes
            .iter()
            .map(|outcome| match &outcome.result {
                Ok(sheets) => json!({ "file": outcome.file, "sheets": sheets }),
                Err(err) => json!({ "file": outcome.file, "error": err.to_string() }),
            })
            .collect();
        let payload = json!({
            "imported": names,
            "sample": sample_added,
            "files": outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(sheets) => println!("loaded {}: {}", outcome.file, sheets.join(", ")),
            Err(err) => println!("skipped {}: {err}", outcome.file),
        }
    }
    if with_sample {
        if sample_added {
            println!("loaded sample: {}", sample::SAMPLE_SHEET_NAME);
        } else {
            println!("sample already loaded");
        }
    }
    println!("{} sheet(s) imported.", names.len());
    Ok(())
}

fn handle_search(store: &AppStore, args: SearchArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let query = args.query.join(" ");
    if query.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let filter = resolve_filter(store, args.sheet.as_deref())?;
    let mut settings = store.settings();
    settings.apply(&SettingsPatch {
        fuzzy_threshold: args.threshold,
        search_in_tags: args.no_tags.then_some(false),
        search_in_metadata: args.no_metadata.then_some(false),
        max_results: args.limit,
        highlight_results: args.no_highlight.then_some(false),
    });

    let engine = SearchEngine::new(store.clone());
    let results = engine.search_with(&query, &filter, &settings);
    print_results(&query, &filter, &results, &store.sheets(), &settings, as_json)
}

fn handle_live(store: AppStore, sheet: Option<String>, as_json: bool) -> Result<(), Box<dyn Error>> {
    let filter = resolve_filter(&store, sheet.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let live = LiveSearch::new(Arc::new(SearchEngine::new(store.clone())));
        let mut updates = live.subscribe();
        let (lines_tx, mut lines) = mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            for line in io::stdin().lock().lines().map_while(Result::ok) {
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        live.perform_search(&line, filter.clone());
                    }
                    None => break,
                },
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = updates.borrow_and_update().clone();
                    print_live_state(&state, &filter, &store, as_json)?;
                }
            }
        }

        live.settle().await;
        if updates.has_changed().unwrap_or(false) {
            let state = updates.borrow_and_update().clone();
            print_live_state(&state, &filter, &store, as_json)?;
        }
        Ok::<(), Box<dyn Error>>(())
    })
}

fn print_live_state(
    state: &SearchState,
    filter: &SheetFilter,
    store: &AppStore,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if state.is_searching || state.query.trim().is_empty() {
        return Ok(());
    }
    let settings = store.settings();
    print_results(&state.query, filter, &state.results, &store.sheets(), &settings, as_json)
}

fn print_results(
    query: &str,
    filter: &SheetFilter,
    results: &[SearchResult],
    sheets: &[Sheet],
    settings: &SearchSettings,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if as_json {
        let payload = json!({
            "query": query,
            "filter": filter,
            "total": results.len(),
            "groups": group_results(results, sheets),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        render_markdown(&results_markdown(query, results, sheets, settings.highlight_results));
    }
    Ok(())
}

fn handle_sheets(store: &AppStore, remove: Option<String>, as_json: bool) -> Result<(), Box<dyn Error>> {
    if let Some(needle) = remove {
        let id = resolve_sheet(store, &needle)?;
        store.remove_sheet(&id);
        if as_json {
            println!("{}", serde_json::to_string_pretty(&json!({ "removed": id }))?);
        } else {
            println!("Removed sheet {id}.");
        }
        return Ok(());
    }

    let sheets = store.sheets();
    if as_json {
        let payload: Vec<_> = sheets
            .iter()
            .map(|sheet| {
                json!({
                    "id": sheet.id,
                    "name": sheet.name,
                    "source": sheet.source,
                    "rows": sheet.row_count(),
                    "tags": sheet.tag_count(),
                    "filename": sheet.filename,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    if sheets.is_empty() {
        println!("No sheets loaded. Try `sheetsearch import --sample`.");
        return Ok(());
    }
    let id_width = column_width(sheets.iter().map(|sheet| sheet.id.as_str()), "ID");
    let name_width = column_width(sheets.iter().map(|sheet| sheet.name.as_str()), "NAME");
    println!(
        "{:<id_width$}  {:<name_width$}  {:<19}  {:>6}  {:>5}",
        "ID", "NAME", "SOURCE", "ROWS", "TAGS"
    );
    println!(
        "{:-<id_width$}  {:-<name_width$}  {:-<19}  {:->6}  {:->5}",
        "", "", "", "", ""
    );
    for sheet in &sheets {
        println!(
            "{:<id_width$}  {:<name_width$}  {:<19}  {:>6}  {:>5}",
            sheet.id,
            sheet.name,
            sheet.source.label(),
            sheet.row_count(),
            sheet.tag_count()
        );
    }
    Ok(())
}

fn handle_history(store: &AppStore, clear: bool, limit: usize, as_json: bool) -> Result<(), Box<dyn Error>> {
    if clear {
        store.clear_history();
        if as_json {
            println!("{}", serde_json::to_string_pretty(&json!({ "cleared": true }))?);
        } else {
            println!("Search history cleared.");
        }
        return Ok(());
    }

    let entries: Vec<_> = store.history().into_iter().take(limit.max(1)).collect();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No searches recorded yet.");
        return Ok(());
    }
    let width = column_width(entries.iter().map(|entry| entry.query.as_str()), "QUERY");
    println!("{:<width$}  {:>7}  {}", "QUERY", "RESULTS", "WHEN");
    println!("{:-<width$}  {:->7}  {}", "", "", "--------");
    let now = now_ms();
    for entry in &entries {
        println!(
            "{:<width$}  {:>7}  {}",
            entry.query,
            entry.results_count,
            age_label(now.saturating_sub(entry.timestamp))
        );
    }
    Ok(())
}

fn handle_stats(store: &AppStore, as_json: bool) -> Result<(), Box<dyn Error>> {
    let summary = store.summary();
    let recent = store.recent_searches();
    if as_json {
        let payload = json!({ "summary": summary, "recentSearches": recent });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let mut text = format!(
        "# Workspace\n\n* Sheets: {}\n* Rows: {}\n* Tags: {}\n* Searches recorded: {}\n* Saved searches: {}\n",
        summary.sheets,
        summary.total_rows,
        summary.total_tags,
        summary.history_entries,
        summary.saved_searches
    );
    if !recent.is_empty() {
        text.push_str("\n## Recent searches\n\n");
        for entry in &recent {
            text.push_str(&format!(
                "* {} ({} result{})\n",
                entry.query,
                entry.results_count,
                plural(entry.results_count)
            ));
        }
    }
    render_markdown(&text);
    Ok(())
}

fn handle_tag(
    store: &AppStore,
    sheet: &str,
    row: usize,
    tags: Vec<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let (id, index) = resolve_row(store, sheet, row)?;
    let tags: Vec<String> = tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    store.update_row_tags(&id, index, tags.clone());
    if as_json {
        let payload = json!({ "sheet": id, "row": row, "tags": tags });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if tags.is_empty() {
        println!("Cleared tags on row {row} of {id}.");
    } else {
        println!("Tagged row {row} of {id}: {}", tags.join(", "));
    }
    Ok(())
}

fn handle_meta(
    store: &AppStore,
    sheet: &str,
    row: usize,
    fields: Vec<String>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let (id, index) = resolve_row(store, sheet, row)?;
    let mut metadata: Map<String, Value> = store
        .sheet(&id)
        .and_then(|sheet| sheet.row_metadata(index).cloned())
        .unwrap_or_default();
    for field in fields {
        let (key, raw) = field
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got {field:?}"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.trim().to_string(), value);
    }
    store.update_row_metadata(&id, index, metadata.clone());
    if as_json {
        let payload = json!({ "sheet": id, "row": row, "metadata": metadata });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Updated metadata on row {row} of {id}.");
    }
    Ok(())
}

fn handle_settings(store: &AppStore, args: SettingsArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let patch = SettingsPatch {
        fuzzy_threshold: args.threshold,
        search_in_tags: args.search_tags,
        search_in_metadata: args.search_metadata,
        max_results: args.max_results,
        highlight_results: args.highlight,
    };
    let settings = if patch == SettingsPatch::default() {
        store.settings()
    } else {
        store.update_settings(&patch)
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        println!("fuzzy threshold     {:.2}", settings.fuzzy_threshold);
        println!("search in tags      {}", settings.search_in_tags);
        println!("search in metadata  {}", settings.search_in_metadata);
        println!("max results         {}", settings.max_results);
        println!("highlight results   {}", settings.highlight_results);
    }
    Ok(())
}

fn handle_saved(store: &AppStore, command: SavedCommand, as_json: bool) -> Result<(), Box<dyn Error>> {
    match command {
        SavedCommand::List => {
            let saved = store.saved_searches();
            if as_json {
                println!("{}", serde_json::to_string_pretty(&saved)?);
            } else if saved.is_empty() {
                println!("No saved searches.");
            } else {
                let width = column_width(saved.iter().map(|search| search.name.as_str()), "NAME");
                println!("{:<16}  {:<width$}  {}", "ID", "NAME", "QUERY");
                println!("{:-<16}  {:-<width$}  {}", "", "", "-----");
                for search in &saved {
                    println!("{:<16}  {:<width$}  {} [{}]", search.id, search.name, search.query, search.filter);
                }
            }
        }
        SavedCommand::Add { name, query, sheet } => {
            if query.trim().is_empty() {
                return Err("Saved query cannot be empty".into());
            }
            let filter = resolve_filter(store, sheet.as_deref())?;
            let saved = store.save_search(&name, &query, filter);
            if as_json {
                println!("{}", serde_json::to_string_pretty(&saved)?);
            } else {
                println!("Saved {:?} as {}.", saved.name, saved.id);
            }
        }
        SavedCommand::Remove { id } => {
            if !store.remove_saved_search(&id) {
                return Err(format!("No saved search with id {id:?}").into());
            }
            if as_json {
                println!("{}", serde_json::to_string_pretty(&json!({ "removed": id }))?);
            } else {
                println!("Removed saved search {id}.");
            }
        }
        SavedCommand::Run { id } => {
            let saved = store
                .saved_searches()
                .into_iter()
                .find(|search| search.id == id || search.name.eq_ignore_ascii_case(&id))
                .ok_or_else(|| format!("No saved search matches {id:?}"))?;
            let engine = SearchEngine::new(store.clone());
            let settings = store.settings();
            let results = engine.search_with(&saved.query, &saved.filter, &settings);
            print_results(&saved.query, &saved.filter, &results, &store.sheets(), &settings, as_json)?;
        }
    }
    Ok(())
}

fn resolve_sheet(store: &AppStore, needle: &str) -> Result<String, Box<dyn Error>> {
    if let Some(id) = store.resolve_sheet_id(needle) {
        return Ok(id);
    }
    let message = match store.suggest_sheet_name(needle) {
        Some(name) => format!("No sheet matches {needle:?}; did you mean {name:?}?"),
        None => format!("No sheet matches {needle:?}"),
    };
    Err(message.into())
}

fn resolve_filter(store: &AppStore, sheet: Option<&str>) -> Result<SheetFilter, Box<dyn Error>> {
    match sheet {
        None | Some("all") => Ok(SheetFilter::All),
        Some(needle) => Ok(SheetFilter::Sheet(resolve_sheet(store, needle)?)),
    }
}

/// Maps a 1-based display row to the sheet id and 0-based row index.
fn resolve_row(store: &AppStore, sheet: &str, row: usize) -> Result<(String, usize), Box<dyn Error>> {
    let id = resolve_sheet(store, sheet)?;
    let rows = store.sheet(&id).map(|sheet| sheet.row_count()).unwrap_or(0);
    if row == 0 || row > rows {
        return Err(format!("Row {row} is out of range; {id} has {rows} row(s)").into());
    }
    Ok((id, row - 1))
}

fn results_markdown(query: &str, results: &[SearchResult], sheets: &[Sheet], highlight: bool) -> String {
    if results.is_empty() {
        return format!("No rows match \"{query}\".");
    }
    let mut text = format!(
        "# {} result{} for \"{query}\"\n",
        results.len(),
        plural(results.len())
    );
    for group in group_results(results, sheets) {
        let source = group
            .sheet
            .source
            .map(|source| source.label())
            .unwrap_or("unknown source");
        text.push_str(&format!(
            "\n## {} ({source}), {} match{}\n",
            group.sheet.name,
            group.results.len(),
            if group.results.len() == 1 { "" } else { "es" }
        ));
        if let Some(url) = &group.sheet.original_url {
            text.push_str(&format!("Open original: {}\n", render_spans(&annotate(url, "", false))));
        }
        for result in group.results {
            text.push_str(&result_card(result, query, highlight));
        }
    }
    text
}

fn result_card(result: &SearchResult, query: &str, highlight: bool) -> String {
    let mut card = format!(
        "\n**Row {}** · {}% match",
        result.display_row(),
        result.match_percent()
    );
    if !result.tags.is_empty() {
        card.push_str(&format!(" · tags: {}", result.tags.join(", ")));
    }
    card.push('\n');

    let matched = matching_fields(&result.data, query);
    let hidden = matched.len().saturating_sub(CARD_FIELD_LIMIT);
    let fields: Vec<_> = if matched.is_empty() {
        // fuzzy-only hit: show the leading non-empty fields instead
        result
            .data
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .take(CARD_FIELD_LIMIT)
            .collect()
    } else {
        matched.into_iter().take(CARD_FIELD_LIMIT).collect()
    };
    for (name, value) in fields {
        let spans = annotate(&value.to_string(), query, highlight);
        card.push_str(&format!("* {name}: {}\n", render_spans(&spans)));
    }
    if hidden > 0 {
        card.push_str(&format!("* +{hidden} more matching field{}\n", plural(hidden)));
    }
    card
}

fn render_spans(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Span::Text { text } => text.clone(),
            Span::Highlight { text } => format!("**{text}**"),
            Span::Link { url, label } if label == url => url.clone(),
            Span::Link { url, label } => format!("{label} <{url}>"),
        })
        .collect()
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>, header: &str) -> usize {
    values
        .map(|value| value.chars().count())
        .max()
        .unwrap_or(0)
        .max(header.len())
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn age_label(elapsed_ms: u64) -> String {
    let seconds = elapsed_ms / 1000;
    match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3599 => format!("{}m ago", seconds / 60),
        3600..=86_399 => format!("{}h ago", seconds / 3600),
        _ => format!("{}d ago", seconds / 86_400),
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown(text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
