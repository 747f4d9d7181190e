use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::app::{Session, ViewKind};

/// フォーカス中のビューを描画
pub fn render(frame: &mut Frame, area: Rect, session: &Session) {
    let kind = session.focused_view();
    let view = session.views().get(kind);
    let height = area.height.saturating_sub(2) as usize;

    let lines: Vec<Line> = view
        .content()
        .iter()
        .enumerate()
        .skip(view.top)
        .take(height)
        .map(|(index, text)| {
            let mut style = Style::default();
            if kind == ViewKind::Log {
                if let Some(record) = session.aggregator().visible_record(index) {
                    style = style.fg(record.level.color());
                    if record.continued {
                        style = style.add_modifier(Modifier::DIM);
                    }
                }
            }
            if view.is_match(index) {
                style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
            }
            let gutter = if view.is_marked(index) {
                Span::styled("▌", Style::default().fg(Color::Magenta))
            } else {
                Span::raw(" ")
            };
            Line::from(vec![gutter, Span::styled(text.clone(), style)])
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .title(title(kind, &view.last_search))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(paragraph, area);
}

/// 枠のタイトル（検索中ならパターン付き）
fn title(kind: ViewKind, pattern: &str) -> String {
    if pattern.is_empty() {
        kind.title().to_string()
    } else {
        format!("{}- /{} ", kind.title(), pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_is_padded_once() {
        assert_eq!(title(ViewKind::Log, ""), " Log ");
        assert_eq!(title(ViewKind::Db, "ERROR"), " SQL Results - /ERROR ");
    }
}
