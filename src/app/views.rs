use std::collections::BTreeSet;

/// 固定のビュー種別（起動時に全て生成され、終了まで生存する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewKind {
    /// フィルタ済みのログ行
    Log,
    /// 到着順の生テキスト
    Text,
    /// キー操作の説明
    Help,
    /// 時間バケットごとの件数
    Histogram,
    /// レベル別の件数グラフ
    Graph,
    /// SQL結果
    Db,
    /// 使い方の例
    Example,
    /// クエリエンジンのスキーマ
    Schema,
}

impl ViewKind {
    pub const ALL: [ViewKind; 8] = [
        ViewKind::Log,
        ViewKind::Text,
        ViewKind::Help,
        ViewKind::Histogram,
        ViewKind::Graph,
        ViewKind::Db,
        ViewKind::Example,
        ViewKind::Schema,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::Log => "log",
            ViewKind::Text => "text",
            ViewKind::Help => "help",
            ViewKind::Histogram => "histogram",
            ViewKind::Graph => "graph",
            ViewKind::Db => "db",
            ViewKind::Example => "example",
            ViewKind::Schema => "schema",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    fn index(&self) -> usize {
        *self as usize
    }

    /// 画面タイトル
    pub fn title(&self) -> &'static str {
        match self {
            ViewKind::Log => " Log ",
            ViewKind::Text => " Text ",
            ViewKind::Help => " Help ",
            ViewKind::Histogram => " Histogram ",
            ViewKind::Graph => " Graph ",
            ViewKind::Db => " SQL Results ",
            ViewKind::Example => " Examples ",
            ViewKind::Schema => " Schema ",
        }
    }
}

impl std::fmt::Display for ViewKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// ビューごとの可変状態
#[derive(Debug, Clone)]
pub struct ViewDescriptor {
    pub kind: ViewKind,
    /// 先頭に表示している行
    pub top: usize,
    /// 最後の検索を開始した位置
    pub search_anchor: usize,
    /// 最後の検索パターン（空なら検索なし）
    pub last_search: String,
    /// 検索にマッチした行番号（`content` のインデックス）
    pub matches: BTreeSet<usize>,
    /// ハイライトジョブが実行中か
    pub search_running: bool,
    /// 内容が変わって検索結果が古くなったか
    pub search_stale: bool,
    /// 検索開始時の内容の並び（変わったらマッチ行は使えない）
    pub search_layout: u64,
    /// ユーザーが付けたマーク（`content` のインデックス）
    pub marks: BTreeSet<usize>,
    /// 描画用にキャッシュした行
    content: Vec<String>,
    content_valid: bool,
    /// 既存の行が動くたびに進む版
    layout: u64,
}

impl ViewDescriptor {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            top: 0,
            search_anchor: 0,
            last_search: String::new(),
            matches: BTreeSet::new(),
            search_running: false,
            search_stale: false,
            search_layout: 0,
            marks: BTreeSet::new(),
            content: Vec::new(),
            content_valid: false,
            layout: 0,
        }
    }

    pub fn content(&self) -> &[String] {
        &self.content
    }

    pub fn is_content_valid(&self) -> bool {
        self.content_valid
    }

    /// キャッシュを差し替え、表示位置を範囲内に収める
    pub fn set_content(&mut self, content: Vec<String>) {
        self.content = content;
        self.content_valid = true;
        self.clamp();
    }

    /// 次の描画で内容を再取得させる
    pub fn invalidate(&mut self) {
        self.content_valid = false;
    }

    /// 内容が丸ごと作り直される。行番号で持つマークは捨てる
    pub fn invalidate_layout(&mut self) {
        self.invalidate();
        self.layout += 1;
        self.marks.clear();
    }

    pub fn layout(&self) -> u64 {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    fn clamp(&mut self) {
        self.top = self.top.min(self.content.len().saturating_sub(1));
    }

    pub fn scroll_by(&mut self, delta: isize) {
        self.top = self.top.saturating_add_signed(delta);
        self.clamp();
    }

    pub fn scroll_to(&mut self, line: usize) {
        self.top = line;
        self.clamp();
    }

    pub fn scroll_to_end(&mut self) {
        self.top = self.content.len().saturating_sub(1);
    }

    /// 検索状態をクリア
    pub fn clear_search(&mut self) {
        self.last_search.clear();
        self.matches.clear();
        self.search_running = false;
        self.search_stale = false;
    }

    /// 現在位置より後の最初のマッチ
    pub fn next_match(&self) -> Option<usize> {
        self.matches.range(self.top + 1..).next().copied()
    }

    /// 現在位置より前の最後のマッチ
    pub fn prev_match(&self) -> Option<usize> {
        self.matches.range(..self.top).next_back().copied()
    }

    pub fn is_match(&self, line: usize) -> bool {
        self.matches.contains(&line)
    }

    /// 行のマークを付け外しする。付けたらtrue
    pub fn toggle_mark(&mut self, line: usize) -> bool {
        if self.marks.remove(&line) {
            false
        } else {
            self.marks.insert(line);
            true
        }
    }

    pub fn next_mark(&self) -> Option<usize> {
        self.marks.range(self.top + 1..).next().copied()
    }

    pub fn prev_mark(&self) -> Option<usize> {
        self.marks.range(..self.top).next_back().copied()
    }

    pub fn is_marked(&self, line: usize) -> bool {
        self.marks.contains(&line)
    }
}

/// 全ビューの状態
#[derive(Debug, Clone)]
pub struct Views {
    descriptors: Vec<ViewDescriptor>,
}

impl Views {
    pub fn new() -> Self {
        Self {
            descriptors: ViewKind::ALL.into_iter().map(ViewDescriptor::new).collect(),
        }
    }

    pub fn get(&self, kind: ViewKind) -> &ViewDescriptor {
        &self.descriptors[kind.index()]
    }

    pub fn get_mut(&mut self, kind: ViewKind) -> &mut ViewDescriptor {
        &mut self.descriptors[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewDescriptor> {
        self.descriptors.iter()
    }
}

impl Default for Views {
    fn default() -> Self {
        Self::new()
    }
}

/// フォーカス順のビュースタック（空にはならない）
#[derive(Debug, Clone)]
pub struct ViewStack {
    stack: Vec<ViewKind>,
}

impl ViewStack {
    pub fn new(base: ViewKind) -> Self {
        Self { stack: vec![base] }
    }

    /// フォーカス中のビュー
    pub fn top(&self) -> ViewKind {
        self.stack.last().copied().unwrap_or(ViewKind::Log)
    }

    pub fn push(&mut self, kind: ViewKind) {
        self.stack.push(kind);
    }

    /// 最後の1枚は残す
    pub fn pop(&mut self) -> Option<ViewKind> {
        if self.stack.len() > 1 {
            self.stack.pop()
        } else {
            None
        }
    }

    /// 先頭でなければpushする。pushしたらtrue
    pub fn ensure(&mut self, kind: ViewKind) -> bool {
        if self.top() == kind {
            false
        } else {
            self.push(kind);
            true
        }
    }

    /// 先頭ならpop、そうでなければpush。pushしたらtrue
    pub fn toggle(&mut self, kind: ViewKind) -> bool {
        if self.top() == kind {
            self.pop();
            false
        } else {
            self.push(kind);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn as_slice(&self) -> &[ViewKind] {
        &self.stack
    }
}

impl Default for ViewStack {
    fn default() -> Self {
        Self::new(ViewKind::Log)
    }
}

pub const HELP_TEXT: &str = "\
logscope keys

  j / Down        scroll down one line
  k / Up          scroll up one line
  Space / PgDn    scroll down one page
  b / PgUp        scroll up one page
  g / G           jump to top / bottom
  n / N           next / previous search match
  m               mark or unmark the top line
  u / U           next / previous mark
  :               enter a command
  /               search the focused view
  |               capture matches into the capture table
  ;               run a SQL query
  ?               toggle this help
  t               toggle the raw text view
  i               toggle the histogram view
  v               toggle the SQL results view
  z / Z           zoom the histogram in / out
  q               close the focused view, quit from the last one
  Ctrl-C          quit

Commands

  open <path>                 start tracking a file
  pipe <shell command>        read a command's output as a log source
  filter-in <regex>           only show lines that match
  filter-out <regex>          hide lines that match
  set-min-log-level <level>   hide lines below a severity
  enable-filter N / disable-filter N / delete-filter N / clear-filters
  rebuild                     re-index every file from scratch
  goto <line>                 jump to a line
  zoom-in / zoom-out          change the histogram bucket width
  save-session                write the session now
  quit
";

pub const EXAMPLE_TEXT: &str = "\
Examples

  Show only warnings and worse:
    :set-min-log-level warning

  Hide health checks:
    :filter-out GET /health

  Highlight failed requests:
    /status=5\\d\\d

  Capture timeouts and count them per file:
    |timeout
    ;SELECT source, count(*) FROM capture GROUP BY source

  Count lines per level:
    ;SELECT level, count(*) FROM log_lines GROUP BY level

  Follow a build:
    :pipe make 2>&1
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_pushes_then_pops() {
        let mut stack = ViewStack::default();
        assert!(stack.toggle(ViewKind::Help));
        assert_eq!(stack.top(), ViewKind::Help);
        assert!(!stack.toggle(ViewKind::Help));
        assert_eq!(stack.top(), ViewKind::Log);
    }

    #[test]
    fn test_stack_never_empty() {
        let mut stack = ViewStack::default();
        for _ in 0..3 {
            stack.toggle(ViewKind::Log);
            assert!(!stack.is_empty());
        }
        assert!(stack.pop().is_none());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_ensure_only_pushes_when_not_focused() {
        let mut stack = ViewStack::default();
        assert!(!stack.ensure(ViewKind::Log));
        assert!(stack.ensure(ViewKind::Db));
        assert!(!stack.ensure(ViewKind::Db));
        assert_eq!(stack.as_slice(), &[ViewKind::Log, ViewKind::Db]);
    }

    #[test]
    fn test_match_navigation() {
        let mut view = ViewDescriptor::new(ViewKind::Log);
        view.set_content((0..10).map(|i| i.to_string()).collect());
        view.matches.extend([2, 5, 8]);
        view.scroll_to(5);
        assert_eq!(view.next_match(), Some(8));
        assert_eq!(view.prev_match(), Some(2));
        view.scroll_to(8);
        assert_eq!(view.next_match(), None);
    }

    #[test]
    fn test_marks_toggle_and_navigate() {
        let mut view = ViewDescriptor::new(ViewKind::Log);
        view.set_content((0..10).map(|i| i.to_string()).collect());
        assert!(view.toggle_mark(3));
        assert!(view.toggle_mark(7));
        view.scroll_to(5);
        assert_eq!(view.next_mark(), Some(7));
        assert_eq!(view.prev_mark(), Some(3));
        assert!(!view.toggle_mark(3));
        assert_eq!(view.prev_mark(), None);
        assert!(view.is_marked(7));
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut view = ViewDescriptor::new(ViewKind::Text);
        view.set_content(vec!["a".into(), "b".into()]);
        view.scroll_by(10);
        assert_eq!(view.top, 1);
        view.scroll_by(-10);
        assert_eq!(view.top, 0);
    }

    #[test]
    fn test_view_names_round_trip() {
        for kind in ViewKind::ALL {
            assert_eq!(ViewKind::from_name(kind.name()), Some(kind));
        }
    }
}
