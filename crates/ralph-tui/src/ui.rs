//! Layout and widget rendering for one dashboard frame.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table};

use crate::app::{App, Focus};
use crate::theme;

pub fn draw(frame: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Percentage(55),
            Constraint::Percentage(35),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, layout[0], app);
    draw_workers(frame, layout[1], app);
    draw_events(frame, layout[2], app);
    draw_footer(frame, layout[3]);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let running = app
        .snapshot()
        .workers
        .iter()
        .filter(|w| !matches!(w.state.as_str(), "complete" | "failed" | "unknown" | ""))
        .count();
    let text = format!(
        "ralph monitor — {} workers ({} active) — {} events",
        app.snapshot().workers.len(),
        running,
        app.snapshot().recent_events.len()
    );
    let header = Paragraph::new(Line::from(Span::styled(
        text,
        Style::default().fg(theme::TITLE).add_modifier(Modifier::BOLD),
    )));
    frame.render_widget(header, area);
}

fn draw_workers(frame: &mut Frame, area: Rect, app: &App) {
    let header = Row::new(vec!["WORKER", "TASK", "EPOCH", "STATE", "MERGE", "RECOVERY", "ERROR"])
        .style(Style::default().bg(theme::HEADER_BG).fg(theme::HEADER_FG));

    let rows = app.snapshot().workers.iter().enumerate().map(|(i, w)| {
        let style = if i == app.worker_selected && app.focus == Focus::Workers {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default().fg(theme::status_color(&w.state))
        };
        Row::new(vec![
            Cell::from(w.worker_id.clone()),
            Cell::from(w.task_id.clone()),
            Cell::from(w.epoch.clone()),
            Cell::from(w.state.clone()),
            Cell::from(w.merge_attempts.to_string()),
            Cell::from(w.recovery_attempts.to_string()),
            Cell::from(w.error.clone().unwrap_or_default()),
        ])
        .style(style)
    });

    let widths = [
        Constraint::Length(20),
        Constraint::Length(10),
        Constraint::Length(6),
        Constraint::Length(14),
        Constraint::Length(6),
        Constraint::Length(9),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths).header(header).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme::BORDER))
            .title("workers"),
    );
    frame.render_widget(table, area);
}

fn draw_events(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .snapshot()
        .recent_events
        .iter()
        .rev()
        .skip(app.event_scroll)
        .map(|event| {
            ListItem::new(Line::from(format!(
                "[{}] {}",
                event.timestamp, event.event_type
            )))
        })
        .collect();

    let border_style = if app.focus == Focus::Events {
        Style::default().fg(theme::TITLE)
    } else {
        Style::default().fg(theme::BORDER)
    };

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title("events (newest first)"),
    );
    frame.render_widget(list, area);
}

fn draw_footer(frame: &mut Frame, area: Rect) {
    let footer = Paragraph::new("q quit  tab switch pane  j/k or ↑/↓ scroll");
    frame.render_widget(footer, area);
}
