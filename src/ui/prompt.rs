use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::app::Session;

/// 入力行を描画（入力モード中のみ）
pub fn render(frame: &mut Frame, area: Rect, session: &Session) {
    let modes = session.modes();
    let mode = modes.mode();
    if !mode.is_entry() {
        let hint = Paragraph::new(" Press ? for help, q to close a view ")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(hint, area);
        return;
    }

    let editor = modes.editor();
    let line = Line::from(vec![
        Span::styled(mode.prompt(), Style::default().fg(Color::Yellow)),
        Span::raw(editor.text()),
    ]);
    frame.render_widget(Paragraph::new(line), area);

    // カーソル位置を設定
    let x = area.x + (mode.prompt().len() + editor.cursor()) as u16;
    frame.set_cursor_position((x.min(area.x + area.width.saturating_sub(1)), area.y));
}
