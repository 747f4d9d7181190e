use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::app::{Session, ViewKind};
use crate::logsource::LogSourceAggregator;

/// ステータスバーを描画（`rows` はビューの表示行数）
pub fn render(frame: &mut Frame, area: Rect, session: &Session, rows: usize) {
    let kind = session.focused_view();
    let view = session.views().get(kind);
    let aggregator = session.aggregator();

    let left_content = match session.status() {
        Some(msg) if msg.is_error => Span::styled(format!(" {} ", msg.text), Style::default().fg(Color::Red)),
        Some(msg) => Span::styled(format!(" {} ", msg.text), Style::default().fg(Color::Cyan)),
        None => {
            let mut text = format!(
                " {} sources | {} of {} lines | {} filters",
                aggregator.sources().len(),
                aggregator.visible_len(),
                aggregator.raw_len(),
                aggregator.filters().len(),
            );
            if !view.last_search.is_empty() {
                text.push_str(&format!(" | {} hits", view.matches.len()));
                if view.search_running {
                    text.push_str(" (searching)");
                }
            }
            Span::styled(text, Style::default().fg(Color::Gray))
        }
    };

    let range = if kind == ViewKind::Log {
        time_range(aggregator, view.top, rows)
            .map(|r| format!(" {} |", r))
            .unwrap_or_default()
    } else {
        String::new()
    };
    let position = Span::styled(
        format!("{} {} {}/{} ", range, session.modes().mode(), view.top + 1, view.len().max(1)),
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    // 左右に分けて表示
    let right_width = (position.content.chars().count() as u16).min(area.width);
    let left = Paragraph::new(Line::from(left_content));
    let right = Paragraph::new(Line::from(position));

    let left_area = Rect {
        x: area.x,
        y: area.y,
        width: area.width.saturating_sub(right_width),
        height: area.height,
    };

    let right_area = Rect {
        x: area.x + area.width.saturating_sub(right_width),
        y: area.y,
        width: right_width,
        height: area.height,
    };

    frame.render_widget(left, left_area);
    frame.render_widget(right, right_area);
}

/// 表示中の行の時刻範囲（同じ日付なら終わりは時刻のみ）
fn time_range(aggregator: &LogSourceAggregator, top: usize, rows: usize) -> Option<String> {
    let (first, last) = aggregator.visible_time_range(top, rows.max(1))?;
    let end = if first.date() == last.date() {
        last.format("%H:%M:%S").to_string()
    } else {
        last.format("%Y-%m-%d %H:%M:%S").to_string()
    };
    Some(format!("{} .. {}", first.format("%Y-%m-%d %H:%M:%S"), end))
}
