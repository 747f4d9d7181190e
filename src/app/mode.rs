use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::HashMap;

use crate::error::{SessionError, SessionResult};

/// 入力モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// ナビゲーション（初期状態）
    #[default]
    Paging,
    /// コマンド入力中
    Command,
    /// 検索パターン入力中
    Search,
    /// キャプチャ用パターン入力中
    Capture,
    /// SQL入力中
    Sql,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Paging => "PAGING",
            Mode::Command => "COMMAND",
            Mode::Search => "SEARCH",
            Mode::Capture => "CAPTURE",
            Mode::Sql => "SQL",
        }
    }

    /// プロンプト文字
    pub fn prompt(&self) -> &'static str {
        match self {
            Mode::Paging => "",
            Mode::Command => ":",
            Mode::Search => "/",
            Mode::Capture => "|",
            Mode::Sql => ";",
        }
    }

    /// プロンプト文字からモードを得る（`-c` の引数解釈に使う）
    pub fn from_prompt(c: char) -> Option<Self> {
        match c {
            ':' => Some(Mode::Command),
            '/' => Some(Mode::Search),
            '|' => Some(Mode::Capture),
            ';' => Some(Mode::Sql),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        *self != Mode::Paging
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 1行エディタ（カーソル位置は文字単位）
#[derive(Debug, Clone, Default)]
pub struct LineEditor {
    input: String,
    cursor_position: usize,
}

impl LineEditor {
    pub fn text(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor_position
    }

    fn char_count(&self) -> usize {
        self.input.chars().count()
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    /// 内容を差し替えてカーソルを末尾へ
    pub fn set_text(&mut self, text: &str) {
        self.input = text.to_string();
        self.cursor_position = self.char_count();
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_position = 0;
    }

    /// 文字を入力
    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_index();
        self.input.insert(at, c);
        self.cursor_position += 1;
    }

    /// バックスペース
    pub fn backspace(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let at = self.byte_index();
            self.input.remove(at);
        }
    }

    /// Delete
    pub fn delete(&mut self) {
        if self.cursor_position < self.char_count() {
            let at = self.byte_index();
            self.input.remove(at);
        }
    }

    /// カーソルを左に移動
    pub fn move_cursor_left(&mut self) {
        self.cursor_position = self.cursor_position.saturating_sub(1);
    }

    /// カーソルを右に移動
    pub fn move_cursor_right(&mut self) {
        if self.cursor_position < self.char_count() {
            self.cursor_position += 1;
        }
    }

    pub fn move_cursor_home(&mut self) {
        self.cursor_position = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor_position = self.char_count();
    }
}

/// キー入力の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// 編集継続
    Editing,
    /// 確定（モードと入力文字列）
    Submitted(Mode, String),
    /// 取り消し
    Cancelled,
}

/// 入力モードの状態機械
///
/// PAGING から各入力モードに入り、確定か取り消しで PAGING に戻る。
/// 入力モード中に別の入力モードへは入れない。
#[derive(Debug, Clone, Default)]
pub struct ModeMachine {
    mode: Mode,
    editor: LineEditor,
    history: HashMap<Mode, Vec<String>>,
    /// 履歴を遡っている位置
    history_pos: Option<usize>,
}

impl ModeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    pub fn history(&self, mode: Mode) -> &[String] {
        self.history.get(&mode).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 入力モードに入る
    pub fn enter(&mut self, mode: Mode) -> SessionResult<()> {
        if self.mode.is_entry() {
            return Err(SessionError::ModeActive(self.mode));
        }
        self.mode = mode;
        self.editor.clear();
        self.history_pos = None;
        Ok(())
    }

    /// 入力を破棄して PAGING に戻る
    pub fn cancel(&mut self) {
        self.mode = Mode::Paging;
        self.editor.clear();
        self.history_pos = None;
    }

    /// 入力を確定して PAGING に戻る
    pub fn submit(&mut self) -> Option<(Mode, String)> {
        if !self.mode.is_entry() {
            return None;
        }
        let mode = self.mode;
        let text = self.editor.text().to_string();
        if !text.is_empty() {
            let history = self.history.entry(mode).or_default();
            if history.last() != Some(&text) {
                history.push(text.clone());
            }
        }
        self.cancel();
        Some((mode, text))
    }

    fn recall(&mut self, older: bool) {
        let Some(history) = self.history.get(&self.mode) else {
            return;
        };
        if history.is_empty() {
            return;
        }
        let pos = match (self.history_pos, older) {
            (None, true) => Some(history.len() - 1),
            (None, false) => None,
            (Some(p), true) => Some(p.saturating_sub(1)),
            (Some(p), false) if p + 1 < history.len() => Some(p + 1),
            (Some(_), false) => None,
        };
        let text = pos.map(|p| history[p].clone()).unwrap_or_default();
        self.history_pos = pos;
        self.editor.set_text(&text);
    }

    /// 入力モード中のキー処理
    pub fn handle_key(&mut self, key: KeyEvent) -> EditOutcome {
        if !self.mode.is_entry() {
            return EditOutcome::Editing;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                self.cancel();
                EditOutcome::Cancelled
            }
            (KeyCode::Enter, _) => match self.submit() {
                Some((mode, text)) => EditOutcome::Submitted(mode, text),
                None => EditOutcome::Cancelled,
            },
            (KeyCode::Backspace, _) if self.editor.text().is_empty() => {
                self.cancel();
                EditOutcome::Cancelled
            }
            (KeyCode::Backspace, _) => {
                self.editor.backspace();
                EditOutcome::Editing
            }
            (KeyCode::Delete, _) => {
                self.editor.delete();
                EditOutcome::Editing
            }
            (KeyCode::Left, _) => {
                self.editor.move_cursor_left();
                EditOutcome::Editing
            }
            (KeyCode::Right, _) => {
                self.editor.move_cursor_right();
                EditOutcome::Editing
            }
            (KeyCode::Home, _) | (KeyCode::Char('a'), KeyModifiers::CONTROL) => {
                self.editor.move_cursor_home();
                EditOutcome::Editing
            }
            (KeyCode::End, _) | (KeyCode::Char('e'), KeyModifiers::CONTROL) => {
                self.editor.move_cursor_end();
                EditOutcome::Editing
            }
            (KeyCode::Char('u'), KeyModifiers::CONTROL) => {
                self.editor.clear();
                EditOutcome::Editing
            }
            (KeyCode::Up, _) => {
                self.recall(true);
                EditOutcome::Editing
            }
            (KeyCode::Down, _) => {
                self.recall(false);
                EditOutcome::Editing
            }
            (KeyCode::Char(c), m) if !m.contains(KeyModifiers::CONTROL) => {
                self.editor.insert_char(c);
                EditOutcome::Editing
            }
            _ => EditOutcome::Editing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(machine: &mut ModeMachine, text: &str) {
        for c in text.chars() {
            machine.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_submit_returns_to_paging() {
        let mut machine = ModeMachine::new();
        machine.enter(Mode::Search).unwrap();
        type_text(&mut machine, "ERROR");
        assert_eq!(
            machine.handle_key(key(KeyCode::Enter)),
            EditOutcome::Submitted(Mode::Search, "ERROR".to_string())
        );
        assert_eq!(machine.mode(), Mode::Paging);
        assert_eq!(machine.history(Mode::Search), &["ERROR".to_string()]);
    }

    #[test]
    fn test_cancel_discards_buffer() {
        let mut machine = ModeMachine::new();
        machine.enter(Mode::Command).unwrap();
        type_text(&mut machine, "open x");
        assert_eq!(machine.handle_key(key(KeyCode::Esc)), EditOutcome::Cancelled);
        assert_eq!(machine.mode(), Mode::Paging);
        assert!(machine.history(Mode::Command).is_empty());
    }

    #[test]
    fn test_reentry_is_rejected() {
        let mut machine = ModeMachine::new();
        machine.enter(Mode::Sql).unwrap();
        type_text(&mut machine, "SELECT");
        let err = machine.enter(Mode::Search).unwrap_err();
        assert!(matches!(err, SessionError::ModeActive(Mode::Sql)));
        assert_eq!(machine.mode(), Mode::Sql);
        assert_eq!(machine.editor().text(), "SELECT");
    }

    #[test]
    fn test_editing_in_the_middle() {
        let mut machine = ModeMachine::new();
        machine.enter(Mode::Search).unwrap();
        type_text(&mut machine, "ac");
        machine.handle_key(key(KeyCode::Left));
        type_text(&mut machine, "b");
        assert_eq!(machine.editor().text(), "abc");
        machine.handle_key(key(KeyCode::Home));
        machine.handle_key(key(KeyCode::Delete));
        assert_eq!(machine.editor().text(), "bc");
        machine.handle_key(key(KeyCode::End));
        machine.handle_key(key(KeyCode::Backspace));
        assert_eq!(machine.editor().text(), "b");
    }

    #[test]
    fn test_multibyte_input() {
        let mut editor = LineEditor::default();
        for c in "日本語".chars() {
            editor.insert_char(c);
        }
        editor.move_cursor_left();
        editor.backspace();
        assert_eq!(editor.text(), "日語");
        assert_eq!(editor.cursor(), 1);
    }

    #[test]
    fn test_history_recall() {
        let mut machine = ModeMachine::new();
        for pattern in ["one", "two"] {
            machine.enter(Mode::Search).unwrap();
            type_text(&mut machine, pattern);
            machine.handle_key(key(KeyCode::Enter));
        }
        machine.enter(Mode::Search).unwrap();
        machine.handle_key(key(KeyCode::Up));
        assert_eq!(machine.editor().text(), "two");
        machine.handle_key(key(KeyCode::Up));
        assert_eq!(machine.editor().text(), "one");
        machine.handle_key(key(KeyCode::Down));
        assert_eq!(machine.editor().text(), "two");
        machine.handle_key(key(KeyCode::Down));
        assert_eq!(machine.editor().text(), "");
    }

    #[test]
    fn test_backspace_on_empty_cancels() {
        let mut machine = ModeMachine::new();
        machine.enter(Mode::Capture).unwrap();
        assert_eq!(machine.handle_key(key(KeyCode::Backspace)), EditOutcome::Cancelled);
        assert_eq!(machine.mode(), Mode::Paging);
    }
}
