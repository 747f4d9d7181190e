//! セッションオーケストレーター
//!
//! 制御ループは `step()` だけ。マルチプレクサから準備完了イベントを受け取り、
//! 持ち主ごとのハンドラに振り分ける。ビュー・アグリゲーター・ジョブ表を
//! 変更するのはこのループの中だけ。

use anyhow::Context;
use crossterm::event::KeyEvent;
use notify::RecommendedWatcher;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::commands::{self, Command, CommandExecutor, GotoTarget, NoExternalCommands};
use super::config::Config;
use super::events::Action;
use super::mode::{EditOutcome, Mode, ModeMachine};
use super::views::{ViewKind, ViewStack, Views, EXAMPLE_TEXT, HELP_TEXT};
use crate::error::{SessionError, SessionResult};
use crate::logsource::histogram::{level_totals, ZOOM_LEVELS};
use crate::logsource::{
    DefaultLineParser, FileIdentity, FilterKind, Histogram, LogSourceAggregator, PatternFilter, RebuildSummary,
    RecordRef, SourceId, UnknownLevelPolicy,
};
use crate::multiplexer::{self, IoMultiplexer, Owner, Payload, Ready, Token};
use crate::process::piper::STDIN_NAME;
use crate::process::{HighlightJob, JobOutcome, JobSlot, PipedProcess};
use crate::query::{CapturedLine, QueryEngine, RowSet, SqliteEngine};
use crate::store::{self, SessionFile, SessionRecord, SessionStore};

/// ログの内容から作られるビュー
const LOG_DERIVED: [ViewKind; 4] = [ViewKind::Log, ViewKind::Text, ViewKind::Histogram, ViewKind::Graph];

/// セッションの起動オプション
pub struct SessionOptions {
    /// 検索ヘルパーのargv（パターンは末尾に追加）
    pub helper: Vec<String>,
    /// パイプ用シェル
    pub shell: String,
    pub unknown_level: UnknownLevelPolicy,
    /// 定期tickの間隔
    pub tick_interval: Duration,
    pub histogram_zoom: usize,
    /// セッション保存先（Noneなら保存しない）
    pub store: Option<SessionStore>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = if config.session.enabled {
            let dir = match &config.session.dir {
                Some(dir) => dir.clone(),
                None => SessionStore::default_dir().context("Failed to locate session directory")?,
            };
            Some(SessionStore::new(dir))
        } else {
            None
        };
        Ok(Self {
            helper: config.helper_argv(),
            shell: config.pipe.shell.clone(),
            unknown_level: config.filter.unknown_level,
            tick_interval: Duration::from_millis(config.ui.tick_interval_ms.max(10)),
            histogram_zoom: config.ui.histogram_zoom,
            store,
        })
    }
}

/// 状態行のメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
}

/// セッション復元の結果
#[derive(Debug, Default)]
pub struct RestoreSummary {
    /// カーソルを復元したファイル数
    pub reattached: usize,
    /// 一致しなかったファイル（カーソルはリセット）
    pub mismatched: Vec<String>,
}

pub struct Session {
    options: SessionOptions,
    aggregator: LogSourceAggregator,
    mux: IoMultiplexer,
    views: Views,
    stack: ViewStack,
    modes: ModeMachine,
    jobs: HashMap<JobSlot, HighlightJob>,
    pipers: HashMap<SourceId, PipedProcess>,
    watchers: HashMap<SourceId, RecommendedWatcher>,
    file_tokens: HashMap<SourceId, Token>,
    executor: Box<dyn CommandExecutor>,
    engine: Box<dyn QueryEngine>,
    last_rows: Option<RowSet>,
    /// キャプチャ開始時の行ごとの (ソース名, レベル)
    capture_meta: Vec<(String, String)>,
    /// ログビューのマーク（フィルタが変わっても同じレコードに付く）
    log_marks: BTreeSet<RecordRef>,
    histogram_zoom: usize,
    page_size: usize,
    status: Option<StatusMessage>,
    record: Option<SessionRecord>,
    growth_pending: bool,
    redraw: bool,
    quit: bool,
}

impl Session {
    /// 組み込みの協力者（外部コマンドなし・SQLite）で生成
    pub fn new(options: SessionOptions) -> SessionResult<Self> {
        let engine = SqliteEngine::new()?;
        Self::with_collaborators(options, Box::new(NoExternalCommands), Box::new(engine))
    }

    /// tokioランタイム内で呼ぶこと（シグナル監視とtickのタスクを起動する）
    pub fn with_collaborators(
        options: SessionOptions,
        executor: Box<dyn CommandExecutor>,
        engine: Box<dyn QueryEngine>,
    ) -> SessionResult<Self> {
        let aggregator = LogSourceAggregator::new(Arc::new(DefaultLineParser::new()), options.unknown_level);
        let mut mux = IoMultiplexer::new();

        let signals = mux.register(Owner::Signals);
        let signals_token = signals.token();
        match multiplexer::spawn_signal_listener(signals) {
            Ok(task) => mux.attach(signals_token, task)?,
            Err(e) => {
                // tickでの回収に任せる
                warn!("Failed to install signal handlers: {}", e);
                mux.deregister(signals_token);
            }
        }

        let ticker = mux.register(Owner::Ticker);
        let ticker_token = ticker.token();
        mux.attach(ticker_token, multiplexer::spawn_ticker(ticker, options.tick_interval))?;

        let histogram_zoom = options.histogram_zoom.min(ZOOM_LEVELS.len() - 1);
        Ok(Self {
            options,
            aggregator,
            mux,
            views: Views::new(),
            stack: ViewStack::default(),
            modes: ModeMachine::new(),
            jobs: HashMap::new(),
            pipers: HashMap::new(),
            watchers: HashMap::new(),
            file_tokens: HashMap::new(),
            executor,
            engine,
            last_rows: None,
            capture_meta: Vec::new(),
            log_marks: BTreeSet::new(),
            histogram_zoom,
            page_size: 20,
            status: None,
            record: None,
            growth_pending: false,
            redraw: true,
            quit: false,
        })
    }

    /// 制御端末をイベント源として登録
    pub fn attach_terminal(&mut self) -> SessionResult<()> {
        let sender = self.mux.register(Owner::Terminal);
        multiplexer::spawn_terminal_reader(sender)
            .map_err(|e| SessionError::MultiplexerFault(format!("terminal reader: {}", e)))
    }

    // ===== 制御ループ =====

    /// イベントを1バッチ待って処理する。致命的なエラーだけを返す
    pub async fn step(&mut self) -> SessionResult<()> {
        let ready = self.mux.wait().await?;
        for event in ready {
            // 同じバッチ内で先に登録解除されたものは捨てる
            if !self.mux.is_registered(event.token) {
                continue;
            }
            if let Err(e) = self.dispatch(event) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.report(e);
            }
        }
        if std::mem::take(&mut self.growth_pending) {
            self.rebuild_indexes(false);
        }
        Ok(())
    }

    /// 実行中のジョブとパイプがなくなるまでループを回す
    pub async fn settle(&mut self) -> SessionResult<()> {
        while self.has_live_work() && !self.quit {
            self.step().await?;
        }
        Ok(())
    }

    pub fn has_live_work(&self) -> bool {
        !self.jobs.is_empty() || !self.pipers.is_empty()
    }

    fn dispatch(&mut self, event: Ready) -> SessionResult<()> {
        match (event.owner, event.payload) {
            (Owner::LogFile(_), Payload::FileChanged) => self.growth_pending = true,
            (Owner::Job(slot), payload) => self.on_job_event(slot, payload),
            (Owner::Piper(id), payload) => self.on_piper_event(id, payload),
            (Owner::Terminal, Payload::Key(key)) => self.handle_key(key)?,
            (Owner::Terminal, Payload::Resize(width, height)) => self.resize(width, height),
            (Owner::Terminal, Payload::ReadError(e)) => {
                return Err(SessionError::MultiplexerFault(format!("terminal read failed: {}", e)));
            }
            (Owner::Signals, Payload::ChildExited) => self.sweep(),
            (Owner::Signals, Payload::Terminate) => {
                info!("Termination requested");
                self.quit = true;
            }
            (Owner::Ticker, Payload::Tick) => {
                self.growth_pending = true;
                self.sweep();
                self.refresh_stale_searches();
            }
            (owner, payload) => debug!("Ignoring {:?} from {:?}", payload, owner),
        }
        Ok(())
    }

    fn on_job_event(&mut self, slot: JobSlot, payload: Payload) {
        let Some(job) = self.jobs.get_mut(&slot) else {
            return;
        };
        match payload {
            Payload::Lines(lines) => {
                let found = job.apply_lines(&lines);
                if let JobSlot::Search(view) = slot {
                    // 起動後に行が動いていたら行番号は当てにならない
                    if !found.is_empty() && self.search_is_current(view) {
                        self.views.get_mut(view).matches.extend(found);
                        self.redraw = true;
                    }
                }
            }
            Payload::Eof => {
                job.mark_eof();
                self.finish_job(slot);
            }
            Payload::ReadError(e) => {
                warn!("Reading results of {} failed: {}", slot, e);
                job.mark_eof();
                self.finish_job(slot);
            }
            other => debug!("Unexpected job payload {:?}", other),
        }
    }

    fn on_piper_event(&mut self, id: SourceId, payload: Payload) {
        match payload {
            Payload::Bytes(bytes) => {
                if self.aggregator.append_piped(id, &bytes) > 0 {
                    self.on_content_changed();
                }
            }
            Payload::Eof | Payload::ReadError(_) => {
                if let Payload::ReadError(e) = &payload {
                    warn!("Reading piped output of {} failed: {}", id, e);
                }
                if let Some(piper) = self.pipers.get_mut(&id) {
                    piper.mark_eof();
                }
                self.aggregator.seal_piped(id, None);
                self.on_content_changed();
                self.finish_piper(id);
            }
            other => debug!("Unexpected pipe payload {:?}", other),
        }
    }

    /// 終了した子プロセスを回収する
    fn sweep(&mut self) {
        let slots: Vec<JobSlot> = self.jobs.keys().copied().collect();
        for slot in slots {
            self.finish_job(slot);
        }
        let ids: Vec<SourceId> = self.pipers.keys().copied().collect();
        for id in ids {
            self.finish_piper(id);
        }
    }

    fn finish_job(&mut self, slot: JobSlot) {
        let Some(outcome) = self.jobs.get_mut(&slot).and_then(|job| job.poll_finished()) else {
            return;
        };
        let Some(job) = self.jobs.remove(&slot) else {
            return;
        };

        match (outcome, slot) {
            (JobOutcome::Completed, JobSlot::Search(view)) => {
                let current = self.search_is_current(view);
                let descriptor = self.views.get_mut(view);
                descriptor.search_running = false;
                if !current {
                    descriptor.matches.clear();
                    descriptor.search_stale = true;
                }
            }
            (JobOutcome::Completed, JobSlot::Capture) => {
                let captured: Vec<CapturedLine> = job
                    .matched_lines()
                    .into_iter()
                    .map(|(line, text)| {
                        let (source, level) = self
                            .capture_meta
                            .get(line)
                            .cloned()
                            .unwrap_or_else(|| (String::new(), "unknown".to_string()));
                        CapturedLine {
                            line,
                            source,
                            level,
                            text,
                        }
                    })
                    .collect();
                match self.engine.replace_capture(job.pattern(), &captured) {
                    Ok(()) => self.set_status(format!(
                        "Captured {} lines matching '{}'",
                        captured.len(),
                        job.pattern()
                    )),
                    Err(e) => self.report(e),
                }
                self.capture_meta.clear();
                self.views.get_mut(ViewKind::Schema).invalidate_layout();
                self.revalidate_searches(&[ViewKind::Schema]);
            }
            (JobOutcome::Crashed(err), JobSlot::Search(view)) => {
                self.views.get_mut(view).clear_search();
                self.report(err);
            }
            (JobOutcome::Crashed(err), JobSlot::Capture) => {
                self.capture_meta.clear();
                self.report(err);
            }
        }
        job.release(&mut self.mux);
        self.redraw = true;
    }

    fn finish_piper(&mut self, id: SourceId) {
        let Some(code) = self.pipers.get_mut(&id).and_then(|p| p.poll_finished()) else {
            return;
        };
        let Some(piper) = self.pipers.remove(&id) else {
            return;
        };
        if let Some(source) = self.aggregator.source_mut(id) {
            source.set_exit_code(code);
        }
        match code {
            None if piper.is_stdin() => self.set_status("Standard input closed".to_string()),
            Some(0) => self.set_status(format!("'{}' finished", piper.command())),
            Some(code) => self.set_status(format!("'{}' exited with status {}", piper.command(), code)),
            None => self.set_status(format!("'{}' was killed by a signal", piper.command())),
        }
        piper.release(&mut self.mux);
        self.redraw = true;
    }

    /// 端末サイズの変更
    pub fn resize(&mut self, _width: u16, height: u16) {
        // タイトル行・状態行・入力行の分を引く
        self.page_size = (height as usize).saturating_sub(4).max(1);
        self.redraw = true;
    }

    // ===== ログソース =====

    /// ファイルを追跡対象に加える
    pub fn add_file(&mut self, path: &Path) -> SessionResult<SourceId> {
        let id = self.aggregator.add_file(path)?;

        let sender = self.mux.register(Owner::LogFile(id));
        self.file_tokens.insert(id, sender.token());
        match multiplexer::watch_file(path, sender) {
            Ok(watcher) => {
                self.watchers.insert(id, watcher);
            }
            Err(e) => debug!("No change notifications for {} ({}), relying on tick", path.display(), e),
        }

        let summary = self.aggregator.rebuild_indexes(false);
        self.apply_rebuild(summary, false);
        self.refresh_stale_searches();
        self.set_status(format!("Opened {}", path.display()));
        Ok(id)
    }

    /// コマンドの標準出力を仮想ログソースにする
    pub fn add_piped_source(&mut self, command: &str) -> SessionResult<SourceId> {
        let pending = PipedProcess::launch(&self.options.shell, command)?;
        let id = self.aggregator.add_piped(command);
        let piper = pending.start(id, &mut self.mux)?;
        self.pipers.insert(id, piper);
        self.set_status(format!("Reading output of '{}'", command));
        Ok(id)
    }

    /// 標準入力を仮想ログソースにする（端末でないとき用）
    pub fn add_stdin_source(&mut self) -> SessionResult<SourceId> {
        let id = self.aggregator.add_piped(STDIN_NAME);
        match PipedProcess::stdin(id, &mut self.mux) {
            Ok(piper) => {
                self.pipers.insert(id, piper);
                Ok(id)
            }
            Err(e) => {
                self.aggregator.seal_piped(id, None);
                Err(e)
            }
        }
    }

    /// ファイルを再スキャン（`force` なら全体を再インデックス）
    pub fn rebuild_indexes(&mut self, force: bool) -> RebuildSummary {
        let summary = self.aggregator.rebuild_indexes(force);
        self.apply_rebuild(summary, force)
    }

    fn apply_rebuild(&mut self, mut summary: RebuildSummary, force: bool) -> RebuildSummary {
        for err in summary.errors.drain(..) {
            self.report(err);
        }
        if force || summary.has_changes() {
            self.on_content_changed();
        }
        summary
    }

    /// ログ内容が変わった：依存ビューを無効化し、検索を検証し直す
    fn on_content_changed(&mut self) {
        self.invalidate_log_derived();
        self.revalidate_searches(&LOG_DERIVED);
    }

    fn invalidate_log_derived(&mut self) {
        self.views.get_mut(ViewKind::Log).invalidate();
        self.views.get_mut(ViewKind::Text).invalidate();
        self.views.get_mut(ViewKind::Histogram).invalidate_layout();
        self.views.get_mut(ViewKind::Graph).invalidate_layout();
        self.redraw = true;
    }

    /// フィルタ変更後：ログビューの表示位置を保ったまま検索をやり直す
    fn on_filter_changed(&mut self, anchor: Option<(SourceId, usize)>) {
        self.invalidate_log_derived();
        self.refresh_view(ViewKind::Log);
        if let Some(line) = anchor.and_then(|(id, line)| self.aggregator.find_visible(id, line)) {
            self.views.get_mut(ViewKind::Log).scroll_to(line);
        }
        self.revalidate_searches(&LOG_DERIVED);
    }

    /// ビュー内容の並びの版。検索はこれが変わらない間だけ行番号が有効
    fn layout_of(&self, kind: ViewKind) -> u64 {
        match kind {
            ViewKind::Log | ViewKind::Text => self.aggregator.layout_generation(),
            _ => self.views.get(kind).layout(),
        }
    }

    fn search_is_current(&self, kind: ViewKind) -> bool {
        self.views.get(kind).search_layout == self.layout_of(kind)
    }

    /// 行が動いたビューは検索を今すぐやり直し、追記だけなら古い扱いにする
    fn revalidate_searches(&mut self, kinds: &[ViewKind]) {
        for &kind in kinds {
            if self.views.get(kind).last_search.is_empty() {
                continue;
            }
            if self.search_is_current(kind) {
                self.views.get_mut(kind).search_stale = true;
                continue;
            }
            debug!("Rows of {} moved, restarting its search", kind);
            if let Err(e) = self.redo_search(kind) {
                let view = self.views.get_mut(kind);
                view.matches.clear();
                view.search_stale = true;
                self.report(e);
            }
        }
    }

    /// ログビュー先頭行の (ソース, ソース内の行)
    fn log_anchor(&self) -> Option<(SourceId, usize)> {
        let top = self.views.get(ViewKind::Log).top;
        let r = self.aggregator.visible_ref(top)?;
        Some((self.aggregator.sources()[r.source].id(), r.line))
    }

    // ===== ビュー =====

    /// 先頭でなければフォーカスする
    pub fn ensure_view(&mut self, kind: ViewKind) {
        if self.stack.ensure(kind) {
            self.refresh_view(kind);
            self.redraw = true;
        }
    }

    /// 先頭ならpop、そうでなければpush
    pub fn toggle_view(&mut self, kind: ViewKind) {
        if self.stack.toggle(kind) {
            self.refresh_view(kind);
        }
        self.redraw = true;
    }

    fn view_lines(&self, kind: ViewKind) -> Vec<String> {
        let text_lines = |text: &str| -> Vec<String> { text.lines().map(str::to_string).collect() };
        match kind {
            ViewKind::Log => self.aggregator.visible_lines(),
            ViewKind::Text => self.aggregator.raw_lines(),
            ViewKind::Help => text_lines(HELP_TEXT),
            ViewKind::Example => text_lines(EXAMPLE_TEXT),
            ViewKind::Histogram => {
                let lines = Histogram::build(&self.aggregator, self.histogram_zoom).lines();
                if lines.is_empty() {
                    vec!["(no timestamped records)".to_string()]
                } else {
                    lines
                }
            }
            ViewKind::Graph => level_totals(&self.aggregator),
            ViewKind::Db => match &self.last_rows {
                Some(rows) => rows.to_lines(),
                None => vec!["(no query has been run)".to_string()],
            },
            ViewKind::Schema => self.engine.schema(),
        }
    }

    /// キャッシュが無効なら内容を取り直す
    fn refresh_view(&mut self, kind: ViewKind) {
        if self.views.get(kind).is_content_valid() {
            return;
        }
        let lines = self.view_lines(kind);
        self.views.get_mut(kind).set_content(lines);
        if kind == ViewKind::Log {
            let marks = self
                .log_marks
                .iter()
                .filter_map(|r| self.aggregator.visible_index_of(*r))
                .collect();
            self.views.get_mut(kind).marks = marks;
        }
    }

    /// 描画前にフォーカス中のビューを最新化
    pub fn prepare_frame(&mut self) {
        self.refresh_view(self.stack.top());
    }

    // ===== 検索 =====

    /// ビューで検索を開始する。空パターンは検索のクリア
    pub fn execute_search(&mut self, view: ViewKind, pattern: &str) -> SessionResult<()> {
        let slot = JobSlot::Search(view);
        if pattern.is_empty() {
            self.cancel_job(slot);
            self.views.get_mut(view).clear_search();
            self.redraw = true;
            return Ok(());
        }

        self.refresh_view(view);
        let lines = self.views.get(view).content().to_vec();
        // 検証と起動に失敗した場合は以前のハイライトがそのまま残る
        let pending = HighlightJob::launch(&self.options.helper, slot, pattern, lines)?;
        self.cancel_job(slot);
        let job = pending.start(&mut self.mux)?;
        self.jobs.insert(slot, job);

        let layout = self.layout_of(view);
        let descriptor = self.views.get_mut(view);
        descriptor.search_layout = layout;
        descriptor.last_search = pattern.to_string();
        descriptor.search_anchor = descriptor.top;
        descriptor.matches.clear();
        descriptor.search_running = true;
        descriptor.search_stale = false;
        self.redraw = true;
        Ok(())
    }

    /// 保存済みパターンで検索をやり直す（パターンがなければ何もしない）
    pub fn redo_search(&mut self, view: ViewKind) -> SessionResult<()> {
        let pattern = self.views.get(view).last_search.clone();
        if pattern.is_empty() {
            return Ok(());
        }
        self.execute_search(view, &pattern)
    }

    /// 内容が伸びた検索を、ジョブが動いていなければやり直す
    fn refresh_stale_searches(&mut self) {
        let stale: Vec<ViewKind> = self
            .views
            .iter()
            .filter(|v| v.search_stale && !self.jobs.contains_key(&JobSlot::Search(v.kind)))
            .map(|v| v.kind)
            .collect();
        for kind in stale {
            debug!("Refreshing stale search on {}", kind);
            if let Err(e) = self.redo_search(kind) {
                self.report(e);
            }
        }
    }

    /// フォーカス中のビューからマッチ行をキャプチャテーブルへ
    pub fn execute_capture(&mut self, pattern: &str) -> SessionResult<()> {
        if pattern.is_empty() {
            self.cancel_job(JobSlot::Capture);
            self.capture_meta.clear();
            return Ok(());
        }

        let view = self.stack.top();
        self.refresh_view(view);
        let lines = self.views.get(view).content().to_vec();
        let pending = HighlightJob::launch(&self.options.helper, JobSlot::Capture, pattern, lines)?;
        self.cancel_job(JobSlot::Capture);
        let job = pending.start(&mut self.mux)?;
        self.jobs.insert(JobSlot::Capture, job);

        self.capture_meta = if view == ViewKind::Log {
            self.aggregator
                .visible_records()
                .map(|r| {
                    let source = self
                        .aggregator
                        .source(r.source)
                        .map(|s| s.display_name().to_string())
                        .unwrap_or_default();
                    (source, r.level.name().to_string())
                })
                .collect()
        } else {
            Vec::new()
        };
        self.set_status(format!("Capturing '{}' from the {} view", pattern, view));
        Ok(())
    }

    fn cancel_job(&mut self, slot: JobSlot) {
        if let Some(job) = self.jobs.remove(&slot) {
            job.cancel(&mut self.mux);
            if let JobSlot::Search(view) = slot {
                self.views.get_mut(view).search_running = false;
            }
        }
    }

    /// ジョブが動いているか
    pub fn job_running(&self, slot: JobSlot) -> bool {
        self.jobs.contains_key(&slot)
    }

    /// 動いているジョブのトークン
    pub fn job_token(&self, slot: JobSlot) -> Option<Token> {
        self.jobs.get(&slot).map(HighlightJob::token)
    }

    // ===== SQL =====

    /// クエリを実行して結果ビューにフォーカス
    pub fn execute_sql(&mut self, sql: &str) -> SessionResult<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        self.engine.sync_log(&self.aggregator)?;
        let rows = self.engine.query(sql)?;
        self.set_status(format!("{} rows", rows.rows.len()));
        self.last_rows = Some(rows);
        self.views.get_mut(ViewKind::Db).invalidate_layout();
        self.views.get_mut(ViewKind::Schema).invalidate_layout();
        self.revalidate_searches(&[ViewKind::Db, ViewKind::Schema]);
        self.refresh_view(ViewKind::Db);
        self.ensure_view(ViewKind::Db);
        Ok(())
    }

    pub fn last_rows(&self) -> Option<&RowSet> {
        self.last_rows.as_ref()
    }

    // ===== 入力 =====

    /// キー入力を処理
    pub fn handle_key(&mut self, key: KeyEvent) -> SessionResult<()> {
        self.redraw = true;
        if self.modes.mode().is_entry() {
            return match self.modes.handle_key(key) {
                EditOutcome::Submitted(mode, text) => self.submit(mode, &text),
                EditOutcome::Editing | EditOutcome::Cancelled => Ok(()),
            };
        }
        self.perform(Action::from(key))
    }

    /// 入力モードに入る
    pub fn enter_mode(&mut self, mode: Mode) -> SessionResult<()> {
        self.modes.enter(mode)?;
        self.status = None;
        self.redraw = true;
        Ok(())
    }

    /// 確定した入力を処理先に渡す
    pub fn submit(&mut self, mode: Mode, text: &str) -> SessionResult<()> {
        match mode {
            Mode::Paging => Ok(()),
            Mode::Command => self.execute_command_line(text),
            Mode::Search => self.execute_search(self.stack.top(), text),
            Mode::Capture => self.execute_capture(text),
            Mode::Sql => self.execute_sql(text),
        }
    }

    /// `:open x` `/ERROR` のようにプロンプト文字付きの入力を実行
    pub fn run_prefixed(&mut self, input: &str) -> SessionResult<()> {
        let mut chars = input.chars();
        let mode = chars
            .next()
            .and_then(Mode::from_prompt)
            .ok_or_else(|| SessionError::CommandFailed(format!("expected one of : / | ; before '{}'", input)))?;
        self.submit(mode, chars.as_str())
    }

    fn perform(&mut self, action: Action) -> SessionResult<()> {
        let top = self.stack.top();
        self.refresh_view(top);
        let page = self.page_size as isize;
        match action {
            Action::ScrollDown => self.views.get_mut(top).scroll_by(1),
            Action::ScrollUp => self.views.get_mut(top).scroll_by(-1),
            Action::PageDown => self.views.get_mut(top).scroll_by(page),
            Action::PageUp => self.views.get_mut(top).scroll_by(-page),
            Action::Top => self.views.get_mut(top).scroll_to(0),
            Action::Bottom => self.views.get_mut(top).scroll_to_end(),
            Action::NextMatch | Action::PrevMatch => {
                let view = self.views.get(top);
                let target = if action == Action::NextMatch {
                    view.next_match()
                } else {
                    view.prev_match()
                };
                let pattern = view.last_search.clone();
                match target {
                    Some(line) => self.views.get_mut(top).scroll_to(line),
                    None if pattern.is_empty() => self.set_status("No active search".to_string()),
                    None => self.set_status(format!("No more matches for '{}'", pattern)),
                }
            }
            Action::ToggleMark => self.toggle_mark(top),
            Action::NextMark | Action::PrevMark => {
                let view = self.views.get(top);
                let target = if action == Action::NextMark {
                    view.next_mark()
                } else {
                    view.prev_mark()
                };
                match target {
                    Some(line) => self.views.get_mut(top).scroll_to(line),
                    None => self.set_status("No more marks".to_string()),
                }
            }
            Action::Enter(mode) => self.enter_mode(mode)?,
            Action::Toggle(kind) => self.toggle_view(kind),
            Action::ZoomIn => self.zoom(1),
            Action::ZoomOut => self.zoom(-1),
            Action::Rebuild => {
                self.rebuild_indexes(true);
            }
            Action::Back => {
                if self.stack.pop().is_none() {
                    self.quit = true;
                }
            }
            Action::Quit => self.quit = true,
            Action::None => {}
        }
        Ok(())
    }

    fn zoom(&mut self, delta: isize) {
        let max = ZOOM_LEVELS.len() - 1;
        let zoom = self.histogram_zoom.saturating_add_signed(delta).min(max);
        if zoom != self.histogram_zoom {
            self.histogram_zoom = zoom;
            self.views.get_mut(ViewKind::Histogram).invalidate_layout();
            self.revalidate_searches(&[ViewKind::Histogram]);
        }
        self.set_status(format!("Histogram buckets: {}", ZOOM_LEVELS[zoom].1));
    }

    /// 先頭行のマークを付け外し
    fn toggle_mark(&mut self, kind: ViewKind) {
        let view = self.views.get(kind);
        if view.is_empty() {
            return;
        }
        let line = view.top;
        let marked = self.views.get_mut(kind).toggle_mark(line);
        if kind == ViewKind::Log {
            if let Some(r) = self.aggregator.visible_ref(line) {
                if marked {
                    self.log_marks.insert(r);
                } else {
                    self.log_marks.remove(&r);
                }
            }
        }
        let verb = if marked { "Marked" } else { "Unmarked" };
        self.set_status(format!("{} line {}", verb, line + 1));
    }

    /// コマンド行を実行
    pub fn execute_command_line(&mut self, text: &str) -> SessionResult<()> {
        let command = commands::parse(text)?;
        debug!("Executing {:?}", command);
        match command {
            Command::Open(path) => {
                self.add_file(&path)?;
            }
            Command::Pipe(command) => {
                self.add_piped_source(&command)?;
            }
            Command::FilterIn(pattern) => self.add_pattern_filter(FilterKind::Include, &pattern)?,
            Command::FilterOut(pattern) => self.add_pattern_filter(FilterKind::Exclude, &pattern)?,
            Command::SetMinLevel(level) => {
                let anchor = self.log_anchor();
                self.aggregator.set_min_level(level);
                self.on_filter_changed(anchor);
                self.set_status(format!("Minimum log level: {}", level));
            }
            Command::EnableFilter(index) => self.set_filter_enabled(index, true)?,
            Command::DisableFilter(index) => self.set_filter_enabled(index, false)?,
            Command::DeleteFilter(index) => {
                let anchor = self.log_anchor();
                self.aggregator.delete_filter(index)?;
                self.on_filter_changed(anchor);
            }
            Command::ClearFilters => {
                let anchor = self.log_anchor();
                self.aggregator.clear_filters();
                self.on_filter_changed(anchor);
            }
            Command::Rebuild => {
                let summary = self.rebuild_indexes(true);
                self.set_status(format!("Re-indexed {} records", summary.new_records));
            }
            Command::Goto(target) => {
                let top = self.stack.top();
                self.refresh_view(top);
                let view = self.views.get_mut(top);
                let line = match target {
                    GotoTarget::Line(line) => line,
                    GotoTarget::Percent(p) => (view.len().saturating_sub(1) as f64 * p / 100.0) as usize,
                };
                view.scroll_to(line);
            }
            Command::ZoomIn => self.zoom(1),
            Command::ZoomOut => self.zoom(-1),
            Command::SaveSession => match self.save_session() {
                Ok(Some(path)) => self.set_status(format!("Session saved to {}", path.display())),
                Ok(None) => self.set_status("Session saving is disabled".to_string()),
                Err(e) => return Err(SessionError::CommandFailed(format!("{:#}", e))),
            },
            Command::Quit => self.quit = true,
            Command::External(text) => {
                let message = self.executor.execute_command(&text)?;
                self.set_status(message);
            }
        }
        self.redraw = true;
        Ok(())
    }

    fn set_filter_enabled(&mut self, index: usize, enabled: bool) -> SessionResult<()> {
        let anchor = self.log_anchor();
        self.aggregator.set_filter_enabled(index, enabled)?;
        self.on_filter_changed(anchor);
        Ok(())
    }

    fn add_pattern_filter(&mut self, kind: FilterKind, pattern: &str) -> SessionResult<()> {
        let filter = PatternFilter::new(kind, pattern)?;
        let anchor = self.log_anchor();
        self.aggregator.add_filter(Box::new(filter));
        self.on_filter_changed(anchor);
        self.set_status(format!("Filter #{} added", self.aggregator.filters().len()));
        Ok(())
    }

    // ===== 状態 =====

    fn set_status(&mut self, text: String) {
        debug!("Status: {}", text);
        self.status = Some(StatusMessage { text, is_error: false });
        self.redraw = true;
    }

    /// 回復可能なエラーを状態行に出す
    pub fn report(&mut self, err: SessionError) {
        warn!("{}", err);
        self.status = Some(StatusMessage {
            text: err.to_string(),
            is_error: true,
        });
        self.redraw = true;
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    pub fn aggregator(&self) -> &LogSourceAggregator {
        &self.aggregator
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub fn stack(&self) -> &ViewStack {
        &self.stack
    }

    pub fn modes(&self) -> &ModeMachine {
        &self.modes
    }

    pub fn focused_view(&self) -> ViewKind {
        self.stack.top()
    }

    /// 描画用に内容を取り出す
    pub fn view_content(&mut self, kind: ViewKind) -> &[String] {
        self.refresh_view(kind);
        self.views.get(kind).content()
    }

    pub fn histogram_zoom(&self) -> usize {
        self.histogram_zoom
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// 再描画が必要か（フラグは下ろす）
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    // ===== セッション保存 =====

    fn file_paths(&self) -> Vec<PathBuf> {
        self.aggregator
            .sources()
            .iter()
            .filter_map(|s| s.path().map(Path::to_path_buf))
            .collect()
    }

    /// ログビューの位置をソースのカーソルに書き戻す
    fn sync_cursors(&mut self) -> Option<SourceId> {
        let (id, line) = self.log_anchor()?;
        if let Some(source) = self.aggregator.source_mut(id) {
            source.set_cursor(line);
        }
        Some(id)
    }

    /// 保存用のレコードを作る
    pub fn snapshot_record(&mut self) -> Option<SessionRecord> {
        let paths = self.file_paths();
        if paths.is_empty() {
            return None;
        }
        let id = SessionStore::session_id(&paths);
        let focused = self.sync_cursors();

        let mut record = match &self.record {
            Some(previous) if previous.id == id => previous.clone(),
            _ => SessionRecord::new(id),
        };
        record.files = self
            .aggregator
            .sources()
            .iter()
            .filter_map(|s| {
                Some(SessionFile {
                    identity: s.identity()?,
                    start_time: s.start_time(),
                    display_name: s.display_name().to_string(),
                    path: s.path()?.to_path_buf(),
                    cursor: s.cursor(),
                    focused: Some(s.id()) == focused,
                })
            })
            .collect();
        record.commands = self.aggregator.filter_commands();
        record.searches = self
            .views
            .iter()
            .filter(|v| !v.last_search.is_empty())
            .map(|v| (v.kind.name().to_string(), v.last_search.clone()))
            .collect();
        record.top_view = Some(self.stack.top().name().to_string());
        Some(record)
    }

    /// セッションを保存（保存先がなければ None）
    pub fn save_session(&mut self) -> anyhow::Result<Option<PathBuf>> {
        if self.options.store.is_none() {
            return Ok(None);
        }
        let Some(mut record) = self.snapshot_record() else {
            return Ok(None);
        };
        let path = match &self.options.store {
            Some(store) => store.save(&mut record)?,
            None => return Ok(None),
        };
        self.record = Some(record);
        Ok(Some(path))
    }

    /// 開いているファイル群に対応する保存済みセッションを読み込んで適用
    pub fn restore(&mut self) -> SessionResult<RestoreSummary> {
        let paths = self.file_paths();
        let Some(store) = self.options.store.as_ref() else {
            return Ok(RestoreSummary::default());
        };
        if paths.is_empty() {
            return Ok(RestoreSummary::default());
        }
        let id = SessionStore::session_id(&paths);
        let record = match store.load(id) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(RestoreSummary::default()),
            Err(e) => {
                warn!("Ignoring unreadable session {}: {:#}", id, e);
                return Ok(RestoreSummary::default());
            }
        };
        let summary = self.apply_record(&record);
        self.record = Some(record);
        Ok(summary)
    }

    /// レコードを適用：カーソル、フィルタ、検索、フォーカスの順
    pub fn apply_record(&mut self, record: &SessionRecord) -> RestoreSummary {
        let mut summary = RestoreSummary::default();
        let mut focus = None;

        let live: Vec<(SourceId, FileIdentity, i64)> = self
            .aggregator
            .sources()
            .iter()
            .filter_map(|s| Some((s.id(), s.identity()?, s.start_time())))
            .collect();
        for (id, identity, start_time) in live {
            let Some(saved) = record.file(identity) else {
                continue;
            };
            let cursor = match store::reattach(saved, identity, start_time) {
                Ok(cursor) => {
                    summary.reattached += 1;
                    if saved.focused {
                        focus = Some((id, cursor));
                    }
                    cursor
                }
                Err(e) => {
                    info!("{}; starting from the top", e);
                    summary.mismatched.push(saved.display_name.clone());
                    0
                }
            };
            if let Some(source) = self.aggregator.source_mut(id) {
                source.set_cursor(cursor);
            }
        }

        for command in &record.commands {
            if let Err(e) = self.execute_command_line(command) {
                warn!("Failed to replay '{}': {}", command, e);
            }
        }

        self.refresh_view(ViewKind::Log);
        let top = focus
            .and_then(|(id, cursor)| self.aggregator.find_visible(id, cursor))
            .unwrap_or(0);
        self.views.get_mut(ViewKind::Log).scroll_to(top);

        for (name, pattern) in &record.searches {
            let Some(kind) = ViewKind::from_name(name) else {
                continue;
            };
            if let Err(e) = self.execute_search(kind, pattern) {
                warn!("Failed to replay search '{}' on {}: {}", pattern, name, e);
            }
        }

        if let Some(kind) = record.top_view.as_deref().and_then(ViewKind::from_name) {
            self.ensure_view(kind);
        }

        let message = if summary.mismatched.is_empty() {
            format!("Restored session ({} files)", summary.reattached)
        } else {
            format!(
                "Restored session ({} files, position reset for {})",
                summary.reattached,
                summary.mismatched.join(", ")
            )
        };
        self.set_status(message);
        summary
    }

    /// 全ジョブとプロセスを止め、セッションを保存する
    pub fn shutdown(&mut self) {
        let slots: Vec<JobSlot> = self.jobs.keys().copied().collect();
        for slot in slots {
            self.cancel_job(slot);
        }
        for (_, piper) in self.pipers.drain() {
            piper.cancel(&mut self.mux);
        }
        self.watchers.clear();
        for (_, token) in self.file_tokens.drain() {
            self.mux.deregister(token);
        }

        match self.save_session() {
            Ok(Some(path)) => info!("Session written to {}", path.display()),
            Ok(None) => {}
            Err(e) => warn!("Failed to save session: {:#}", e),
        }
        self.mux.shutdown();
        info!("Session shut down");
    }
}
