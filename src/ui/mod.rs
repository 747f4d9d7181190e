pub mod log_view;
pub mod prompt;
pub mod status_bar;

use ratatui::{
    layout::{Constraint, Layout},
    Frame,
};

use crate::app::Session;

/// メインUIを描画（事前に `Session::prepare_frame` を呼ぶこと）
pub fn render(frame: &mut Frame, session: &Session) {
    let area = frame.area();

    // フォーカス中のビュー + ステータスバー + 入力行
    let chunks = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(area);

    log_view::render(frame, chunks[0], session);
    // 枠線の2行を除いた表示行数
    let rows = chunks[0].height.saturating_sub(2) as usize;
    status_bar::render(frame, chunks[1], session, rows);
    prompt::render(frame, chunks[2], session);
}
