//! Terminal explorer: mines the signal feed into a proof-of-work chain and
//! renders it while it grows.
use std::{io, path::PathBuf, time::Duration};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::Parser;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use explorer_core::{
    chain::{verify_chain, TransactionSource},
    constants::{DEFAULT_CHUNK_SIZE, DEFAULT_DIFFICULTY, YIELD_EVERY_ATTEMPTS},
    pow, search, Block as ChainBlock, BlockHasher, BuildConfig, BuildSession, BuildStatus,
    ChainBuilder, ChainState, Sha256Hasher, Transaction,
};
use explorer_source::{HttpSource, JsonFileSource};
use ratatui::{
    layout::{Constraint, Direction, Flex, Layout, Rect},
    prelude::*,
    widgets::*,
    Frame,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug, Clone)]
#[command(name = "explorer-tui")]
#[command(about = "Mine the signal feed into a proof-of-work chain and explore it")]
struct Args {
    /// JSON feed file (an array of signals)
    #[arg(short, long, default_value = "demos/feed.json")]
    feed: PathBuf,

    /// Feed endpoint returning a JSON array of signals; takes precedence over --feed
    #[arg(short, long)]
    url: Option<String>,

    /// Leading zero hex digits required in every mined hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Transactions per block
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Nonce attempts between cooperative yields
    #[arg(long, default_value_t = YIELD_EVERY_ATTEMPTS)]
    yield_every: u64,

    /// Skip the pacing pauses between blocks
    #[arg(long)]
    no_pause: bool,

    /// Build once, print the chain as JSON and exit
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn config(&self) -> BuildConfig {
        let config = BuildConfig {
            difficulty: self.difficulty,
            chunk_size: self.chunk_size,
            yield_every: self.yield_every,
            ..BuildConfig::default()
        };
        if self.no_pause {
            config.without_pauses()
        } else {
            config
        }
    }

    fn source(&self) -> FeedSource {
        match &self.url {
            Some(url) => FeedSource::Http(HttpSource::new(url.clone())),
            None => FeedSource::File(JsonFileSource::new(&self.feed)),
        }
    }
}

#[derive(Clone, Debug)]
enum FeedSource {
    File(JsonFileSource),
    Http(HttpSource),
}

impl TransactionSource for FeedSource {
    async fn fetch_all(&self) -> Result<Vec<Transaction>> {
        match self {
            FeedSource::File(source) => source.fetch_all().await,
            FeedSource::Http(source) => source.fetch_all().await,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    #[default]
    Explorer,
    HashDemo,
}

impl Tab {
    fn toggle(self) -> Self {
        match self {
            Tab::Explorer => Tab::HashDemo,
            Tab::HashDemo => Tab::Explorer,
        }
    }
}

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
const TICK: Duration = Duration::from_millis(100);

// Each block in the chain table is 1 row high
const ITEM_HEIGHT: usize = 1;

struct App {
    args: Args,
    tab: Tab,
    session: Option<BuildSession>,
    // latest snapshot from the running build
    chain: ChainState,
    verified: Option<bool>,
    spinner: usize,
    // explorer
    search: String,
    chain_cursor: usize,
    chain_state: TableState,
    chain_scroll: ScrollbarState,
    chain_popup: bool,
    // hash demo
    hash_input: String,
    hash_output: String,
    hash_leading_zeros: u32,
}

fn empty_chain() -> ChainState {
    ChainState {
        blocks: Vec::new(),
        status: BuildStatus::Initializing,
        finished: false,
    }
}

impl App {
    fn new(args: Args) -> Self {
        Self {
            args,
            tab: Tab::Explorer,
            session: None,
            chain: empty_chain(),
            verified: None,
            spinner: 0,
            search: String::new(),
            chain_cursor: 0,
            chain_state: TableState::default(),
            chain_scroll: ScrollbarState::default(),
            chain_popup: false,
            hash_input: String::new(),
            hash_output: String::new(),
            hash_leading_zeros: 0,
        }
    }

    /// Drop whatever build is running and start over from genesis.
    fn start_build(&mut self) -> Result<()> {
        if let Some(previous) = self.session.take() {
            previous.cancel();
        }
        let builder = ChainBuilder::new(self.args.source(), self.args.config())?;
        self.session = Some(builder.spawn());
        self.chain = empty_chain();
        self.verified = None;
        self.chain_popup = false;
        self.reset_cursor();
        info!("started a fresh chain build");
        Ok(())
    }

    fn pump(&mut self) {
        let mut received = Vec::new();
        if let Some(session) = self.session.as_mut() {
            while let Some(state) = session.try_next() {
                received.push(state);
            }
        }
        for state in received {
            self.apply(state);
        }
    }

    fn apply(&mut self, state: ChainState) {
        if state.finished && !state.status.is_error() {
            let ok = verify_chain(&state.blocks, self.args.difficulty, &Sha256Hasher).is_ok();
            if !ok {
                warn!("built chain failed verification");
            }
            self.verified = Some(ok);
        }
        self.chain = state;
        self.clamp_cursor();
    }

    fn tick(&mut self) {
        if !self.chain.finished {
            self.spinner = (self.spinner + 1) % SPINNER.len();
        }
    }

    /// Blocks matching the search, newest first.
    fn visible_blocks(&self) -> Vec<&ChainBlock> {
        let mut rows = search::filter_chain(&self.chain.blocks, &self.search);
        rows.reverse();
        rows
    }

    fn select_row(&mut self, i: usize) {
        self.chain_cursor = i;
        self.chain_state.select(Some(i));
        self.chain_scroll = self.chain_scroll.position(i * ITEM_HEIGHT);
    }

    fn reset_cursor(&mut self) {
        self.chain_cursor = 0;
        self.chain_state.select(None);
        self.clamp_cursor();
    }

    fn clamp_cursor(&mut self) {
        let len = self.visible_blocks().len();
        self.chain_scroll = self.chain_scroll.content_length(len * ITEM_HEIGHT);
        if len == 0 {
            self.chain_cursor = 0;
            self.chain_state.select(None);
        } else if self.chain_cursor >= len {
            self.select_row(len - 1);
        }
    }

    fn next_row(&mut self) {
        let len = self.visible_blocks().len();
        if len == 0 {
            return;
        }
        let i = match self.chain_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.select_row(i);
    }

    fn previous_row(&mut self) {
        let len = self.visible_blocks().len();
        if len == 0 {
            return;
        }
        let i = match self.chain_state.selected() {
            Some(0) => len - 1,
            Some(i) => i - 1,
            None => 0,
        };
        self.select_row(i);
    }

    fn push_search(&mut self, c: char) {
        self.search.push(c);
        self.reset_cursor();
    }

    fn pop_search(&mut self) {
        self.search.pop();
        self.reset_cursor();
    }

    fn update_hash_demo(&mut self) {
        self.hash_output = Sha256Hasher
            .hex_digest(self.hash_input.as_bytes())
            .unwrap_or_default();
        self.hash_leading_zeros = pow::count_leading_zero_hex(&self.hash_output);
    }
}

fn format_timestamp(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

#[derive(Serialize)]
struct HeadlessReport<'a> {
    status: String,
    difficulty: u32,
    length: usize,
    verified: bool,
    blocks: &'a [ChainBlock],
}

async fn run_headless(args: &Args) -> Result<()> {
    let mut session = ChainBuilder::new(args.source(), args.config())?.spawn();
    while let Some(state) = session.next().await {
        info!(blocks = state.len(), "{}", state.status);
    }
    let outcome = session.finish().await?;
    verify_chain(&outcome.blocks, args.difficulty, &Sha256Hasher)?;

    let report = HeadlessReport {
        status: outcome.status.to_string(),
        difficulty: args.difficulty,
        length: outcome.blocks.len(),
        verified: true,
        blocks: &outcome.blocks,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // tracing goes to stderr so it never lands on the terminal UI or the JSON report
    let default_level = if args.headless { "info" } else { "error" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if args.headless {
        return run_headless(&args).await;
    }

    let mut app = App::new(args);
    app.start_build()?;
    app.update_hash_demo();

    // terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    // restore
    disable_raw_mode()?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(session) = app.session.take() {
        session.cancel();
    }
    res
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        app.pump();
        terminal.draw(|f| ui(f, app))?;

        if event::poll(TICK)? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(app, key)? {
                    break;
                }
            }
        }
        app.tick();
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => return Ok(true),
        KeyCode::Char('r') if ctrl => app.start_build()?,
        KeyCode::Esc => {
            if app.chain_popup {
                app.chain_popup = false;
            } else {
                return Ok(true);
            }
        }
        KeyCode::Tab | KeyCode::BackTab => app.tab = app.tab.toggle(),
        KeyCode::Down if app.tab == Tab::Explorer => app.next_row(),
        KeyCode::Up if app.tab == Tab::Explorer => app.previous_row(),
        KeyCode::Enter if app.tab == Tab::Explorer => app.chain_popup = !app.chain_popup,
        KeyCode::Char(c) if !ctrl && !c.is_control() => match app.tab {
            Tab::Explorer => app.push_search(c),
            Tab::HashDemo => {
                app.hash_input.push(c);
                app.update_hash_demo();
            }
        },
        KeyCode::Backspace => match app.tab {
            Tab::Explorer => app.pop_search(),
            Tab::HashDemo => {
                app.hash_input.pop();
                app.update_hash_demo();
            }
        },
        _ => {}
    }
    Ok(false)
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(size);

    // Tabs
    let titles = ["Explorer", "HashDemo"]
        .iter()
        .map(|t| Line::from(*t))
        .collect::<Vec<_>>();
    let tabs = Tabs::new(titles)
        .select(app.tab as usize)
        .block(Block::default().borders(Borders::ALL).title("chain explorer"))
        .style(Style::default().fg(Color::Green))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match app.tab {
        Tab::Explorer => render_explorer(f, chunks[1], app),
        Tab::HashDemo => render_hashdemo(f, chunks[1], app),
    }

    // Footer
    let help = Paragraph::new(
        "ESC quit • TAB switch tab • Ctrl+R rebuild • Explorer: type to search hashes, ↑/↓ select, Enter details • HashDemo: type to hash")
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL).title("help"));
    f.render_widget(help, chunks[2]);
}

fn render_explorer(f: &mut Frame, area: Rect, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    render_stats(f, chunks[0], app);

    let search_box = Paragraph::new(app.search.clone()).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Search hash / previous hash"),
    );
    f.render_widget(search_box, chunks[1]);

    render_chain(f, chunks[2], app);
}

fn render_stats(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(60),
        ])
        .split(area);

    let length = Paragraph::new(app.chain.len().to_string())
        .block(Block::default().borders(Borders::ALL).title("Chain length"));
    f.render_widget(length, chunks[0]);

    let difficulty = Paragraph::new(format!(
        "{} ({})",
        app.args.difficulty,
        pow::difficulty_prefix(app.args.difficulty)
    ))
    .block(Block::default().borders(Borders::ALL).title("Difficulty"));
    f.render_widget(difficulty, chunks[1]);

    let status = &app.chain.status;
    let (icon, color) = if !app.chain.finished {
        (SPINNER[app.spinner], Color::Yellow)
    } else if status.is_error() {
        ("✗", Color::Red)
    } else {
        ("✓", Color::Green)
    };
    let verified = match app.verified {
        Some(true) => "  [verified]",
        Some(false) => "  [INVALID]",
        None => "",
    };
    let line = Line::from(vec![
        Span::styled(format!("{icon} {status}"), Style::default().fg(color)),
        Span::styled(verified, Style::default().fg(Color::DarkGray)),
    ]);
    let status = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[2]);
}

fn block_row(block: &ChainBlock, selected: bool, term: &str) -> Row<'static> {
    let base = if selected {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };

    if block.is_mining {
        return Row::new(vec![
            Cell::from(block.index.to_string()),
            Cell::from("-"),
            Cell::from("-"),
            Cell::from(block.transactions.len().to_string()),
            Cell::from(format!("Mining block #{}...", block.index)),
            Cell::from(block.previous_hash.clone()),
        ])
        .style(base.fg(Color::Yellow).add_modifier(Modifier::ITALIC));
    }

    let lit = search::highlight(block, term);
    let marked = |on: bool| {
        if on {
            Style::default().bg(Color::Yellow).fg(Color::Black)
        } else {
            Style::default()
        }
    };
    Row::new(vec![
        Cell::from(block.index.to_string()),
        Cell::from(format_timestamp(block.timestamp)),
        Cell::from(block.nonce.to_string()),
        Cell::from(block.transactions.len().to_string()),
        Cell::from(block.hash.clone()).style(marked(lit.hash)),
        Cell::from(block.previous_hash.clone()).style(marked(lit.previous_hash)),
    ])
    .style(base)
}

fn block_details(block: &ChainBlock) -> Vec<String> {
    let mut lines = vec![
        format!(" Block     : #{}", block.index),
        format!(" Timestamp : {}", format_timestamp(block.timestamp)),
        format!(" Nonce     : {}", block.nonce),
        format!(" Hash      : {}", block.hash),
        format!(" Prev hash : {}", block.previous_hash),
        format!(" Transactions ({})", block.transactions.len()),
    ];
    if block.is_mining {
        lines.push("   mining in progress...".to_string());
    } else if block.transactions.is_empty() {
        lines.push(if block.is_genesis() {
            "   Genesis block - no transactions".to_string()
        } else {
            "   No transactions".to_string()
        });
    }
    for tx in &block.transactions {
        let badge = if tx.author.is_verified { " ✓" } else { "" };
        lines.push(format!(
            "   {}{} {} [{}]",
            tx.author.name,
            badge,
            tx.author.handle,
            tx.kind.label()
        ));
        lines.push(format!("     \"{}\"", tx.display_text()));
    }
    lines
}

fn render_chain(f: &mut Frame, area: Rect, app: &mut App) {
    let term = app.search.clone();
    let (rows, details, empty) = {
        let visible = app.visible_blocks();
        let rows: Vec<Row> = visible
            .iter()
            .enumerate()
            .map(|(i, b)| block_row(b, i == app.chain_cursor, &term))
            .collect();
        let details = visible.get(app.chain_cursor).map(|b| block_details(b));
        (rows, details, visible.is_empty())
    };

    if empty && !term.trim().is_empty() && app.chain.finished {
        let none = Paragraph::new(vec![
            Line::from("No blocks found"),
            Line::from(format!(
                "Your search for \"{term}\" did not match any block hashes."
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title("Chain blocks"));
        f.render_widget(none, area);
        return;
    }

    let table = Table::new(
        rows,
        vec![
            Constraint::Length(6),
            Constraint::Length(25),
            Constraint::Length(8),
            Constraint::Length(4),
            Constraint::Length(66),
            Constraint::Length(66),
        ],
    )
    .header(
        Row::new(vec!["idx", "time", "nonce", "txs", "hash", "prev"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Chain blocks (newest first)"));
    f.render_stateful_widget(table, area, &mut app.chain_state);
    f.render_stateful_widget(
        Scrollbar::new(ScrollbarOrientation::VerticalRight),
        area,
        &mut app.chain_scroll,
    );

    if app.chain_popup {
        // Populate popup with details of the block under the cursor, if any
        let popup = Block::bordered()
            .style(Style::default().bg(Color::Black).fg(Color::Yellow))
            .title("Block details")
            .title_style(Style::new().yellow().bold())
            .border_style(Style::new().red().bold());
        let items = details.unwrap_or_else(|| vec!["No block selected".to_string()]);
        let list = List::new(items).block(popup.clone());
        let popup_area = centered_area(area, 80, 80);
        // clears out any background in the area before rendering the popup
        f.render_widget(Clear, popup_area);
        f.render_widget(popup, popup_area);
        f.render_widget(list, popup_area);
    }
}

fn render_hashdemo(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8),
            Constraint::Length(5),
            Constraint::Min(0),
        ])
        .split(area);

    let input = Paragraph::new(app.hash_input.clone())
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Input"));
    f.render_widget(input, chunks[0]);

    let meets = pow::meets_difficulty(&app.hash_output, app.args.difficulty);
    let out = Paragraph::new(format!(
        "sha256: {}\nleading zero hex digits: {}\nmeets difficulty {}: {}",
        app.hash_output,
        app.hash_leading_zeros,
        app.args.difficulty,
        if meets { "yes" } else { "no" }
    ))
    .block(Block::default().borders(Borders::ALL).title("Output"));
    f.render_widget(out, chunks[1]);

    let help = Paragraph::new(
        "Type to update the hash. Each extra zero digit of difficulty costs ~16x more attempts.",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, chunks[2]);
}

/// Create a centered rect using the given percentage of the available rect
fn centered_area(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    // vertically center a strip that's percent_y tall
    let vertical = Layout::vertical([Constraint::Percentage(percent_y)]).flex(Flex::Center);
    let [area] = vertical.areas(area);

    // horizontally center a strip that's percent_x wide within that strip
    let horizontal = Layout::horizontal([Constraint::Percentage(percent_x)]).flex(Flex::Center);
    let [area] = horizontal.areas(area);

    area
}
