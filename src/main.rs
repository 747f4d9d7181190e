use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{self, disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use logscope::app::{Config, Session, SessionOptions};
use logscope::process::helper;
use logscope::ui;

/// logscope - merge, filter and search log files in the terminal
#[derive(Parser)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log files to open
    files: Vec<PathBuf>,

    /// Commands to run after loading (":cmd", "/search", "|capture", ";sql")
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Run the commands, print the focused view and exit
    #[arg(short = 'n', long)]
    headless: bool,

    /// Do not restore or save the session
    #[arg(long)]
    no_session: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOGSCOPE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Act as the search helper: read lines on stdin, print "N:line" for matches
    #[arg(long, hide = true, value_name = "PATTERN")]
    search_helper: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(pattern) = cli.search_helper.as_deref() {
        std::process::exit(helper::run(pattern));
    }

    let config = Config::load().unwrap_or_default();

    // ログ初期化
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    init_logging(&level)?;

    let mut options = SessionOptions::from_config(&config)?;
    if cli.no_session {
        options.store = None;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    if cli.headless {
        runtime.block_on(run_headless(&cli, options))
    } else {
        runtime.block_on(run_tui(&cli, options))
    }
}

fn init_logging(level: &str) -> Result<()> {
    let log_dir = directories::ProjectDirs::from("", "", "logscope")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("logscope"));

    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("logscope.log"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(log_file).with_ansi(false))
        .init();

    info!("logscope starting");
    Ok(())
}

/// ファイル（と端末でない標準入力）を開いて保存済みセッションを復元
fn open_files(session: &mut Session, files: &[PathBuf]) -> Result<()> {
    for path in files {
        session
            .add_file(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
    }
    // `cmd | logscope` のとき。キー入力はcrosstermが /dev/tty から読む
    if !io::stdin().is_terminal() {
        session
            .add_stdin_source()
            .context("Failed to read standard input")?;
    }
    let summary = session.restore()?;
    if summary.reattached > 0 || !summary.mismatched.is_empty() {
        info!(
            "Restored session: {} files reattached, {} reset",
            summary.reattached,
            summary.mismatched.len()
        );
    }
    Ok(())
}

async fn run_headless(cli: &Cli, options: SessionOptions) -> Result<()> {
    let mut session = Session::new(options)?;
    open_files(&mut session, &cli.files)?;
    // 標準入力を読み切ってからコマンドを実行する
    session.settle().await?;

    let mut result = Ok(());
    for command in &cli.commands {
        if let Err(e) = session.run_prefixed(command) {
            result = Err(anyhow::anyhow!("{}: {}", command, e));
            break;
        }
        // 次のコマンドの前に検索とキャプチャを完了させる
        session.settle().await?;
    }

    if result.is_ok() {
        let kind = session.focused_view();
        let mut stdout = io::stdout().lock();
        for line in session.view_content(kind) {
            writeln!(stdout, "{}", line)?;
        }
    }

    session.shutdown();
    result
}

async fn run_tui(cli: &Cli, options: SessionOptions) -> Result<()> {
    let mut session = Session::new(options)?;
    open_files(&mut session, &cli.files)?;
    for command in &cli.commands {
        if let Err(e) = session.run_prefixed(command) {
            session.report(e);
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut session).await;

    session.shutdown();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut Session,
) -> Result<()> {
    session.attach_terminal()?;
    match terminal::size() {
        Ok((width, height)) => session.resize(width, height),
        Err(e) => warn!("Failed to query terminal size: {}", e),
    }

    loop {
        if session.take_redraw() {
            session.prepare_frame();
            terminal.draw(|frame| {
                ui::render(frame, session);
            })?;
        }
        if session.should_quit() {
            info!("Quit requested");
            return Ok(());
        }
        session.step().await?;
    }
}
