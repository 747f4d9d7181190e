use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use super::mode::Mode;
use super::views::ViewKind;

/// ページングモードのユーザーアクション（キー入力から変換）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 1行下へ
    ScrollDown,
    /// 1行上へ
    ScrollUp,
    /// 1ページ下へ
    PageDown,
    /// 1ページ上へ
    PageUp,
    /// 先頭へ
    Top,
    /// 末尾へ
    Bottom,
    /// 次のマッチ
    NextMatch,
    /// 前のマッチ
    PrevMatch,
    /// 先頭行のマークを付け外し
    ToggleMark,
    /// 次のマーク
    NextMark,
    /// 前のマーク
    PrevMark,
    /// 入力モードに入る
    Enter(Mode),
    /// ビューの表示切替
    Toggle(ViewKind),
    /// ヒストグラムを細かく
    ZoomIn,
    /// ヒストグラムを粗く
    ZoomOut,
    /// 全ファイルを再スキャン
    Rebuild,
    /// フォーカス中のビューを閉じる（最後の1枚なら終了）
    Back,
    /// 終了
    Quit,
    /// 何もしない
    None,
}

impl From<KeyEvent> for Action {
    fn from(key: KeyEvent) -> Self {
        match (key.code, key.modifiers) {
            // 終了
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Action::Quit,
            (KeyCode::Char('l'), KeyModifiers::CONTROL) => Action::Rebuild,
            // 移動
            (KeyCode::Down | KeyCode::Char('j') | KeyCode::Enter, _) => Action::ScrollDown,
            (KeyCode::Up | KeyCode::Char('k'), _) => Action::ScrollUp,
            (KeyCode::PageDown | KeyCode::Char(' '), _) => Action::PageDown,
            (KeyCode::PageUp | KeyCode::Char('b'), _) => Action::PageUp,
            (KeyCode::Home | KeyCode::Char('g'), _) => Action::Top,
            (KeyCode::End | KeyCode::Char('G'), _) => Action::Bottom,
            (KeyCode::Char('n'), _) => Action::NextMatch,
            (KeyCode::Char('N'), _) => Action::PrevMatch,
            (KeyCode::Char('m'), _) => Action::ToggleMark,
            (KeyCode::Char('u'), _) => Action::NextMark,
            (KeyCode::Char('U'), _) => Action::PrevMark,
            // 入力モード
            (KeyCode::Char(':'), _) => Action::Enter(Mode::Command),
            (KeyCode::Char('/'), _) => Action::Enter(Mode::Search),
            (KeyCode::Char('|'), _) => Action::Enter(Mode::Capture),
            (KeyCode::Char(';'), _) => Action::Enter(Mode::Sql),
            // ビュー
            (KeyCode::Char('?'), _) => Action::Toggle(ViewKind::Help),
            (KeyCode::Char('t'), _) => Action::Toggle(ViewKind::Text),
            (KeyCode::Char('i'), _) => Action::Toggle(ViewKind::Histogram),
            (KeyCode::Char('I'), _) => Action::Toggle(ViewKind::Graph),
            (KeyCode::Char('v'), _) => Action::Toggle(ViewKind::Db),
            (KeyCode::Char('V'), _) => Action::Toggle(ViewKind::Schema),
            (KeyCode::Char('e'), _) => Action::Toggle(ViewKind::Example),
            (KeyCode::Char('z'), _) => Action::ZoomIn,
            (KeyCode::Char('Z'), _) => Action::ZoomOut,
            (KeyCode::Char('q'), _) => Action::Back,
            // その他
            _ => Action::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_entry_mode_keys() {
        assert_eq!(Action::from(key(KeyCode::Char(':'))), Action::Enter(Mode::Command));
        assert_eq!(Action::from(key(KeyCode::Char('/'))), Action::Enter(Mode::Search));
        assert_eq!(Action::from(key(KeyCode::Char('|'))), Action::Enter(Mode::Capture));
        assert_eq!(Action::from(key(KeyCode::Char(';'))), Action::Enter(Mode::Sql));
    }

    #[test]
    fn test_ctrl_c_quits() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(Action::from(ctrl_c), Action::Quit);
        assert_eq!(Action::from(key(KeyCode::Char('q'))), Action::Back);
    }

    #[test]
    fn test_mark_keys() {
        assert_eq!(Action::from(key(KeyCode::Char('m'))), Action::ToggleMark);
        assert_eq!(Action::from(key(KeyCode::Char('u'))), Action::NextMark);
        assert_eq!(Action::from(key(KeyCode::Char('U'))), Action::PrevMark);
    }

    #[test]
    fn test_view_toggles() {
        assert_eq!(Action::from(key(KeyCode::Char('?'))), Action::Toggle(ViewKind::Help));
        assert_eq!(Action::from(key(KeyCode::Char('i'))), Action::Toggle(ViewKind::Histogram));
    }
}
