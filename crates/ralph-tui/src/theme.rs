//! Color palette shared by every widget so worker/event status colors stay
//! consistent across the dashboard.

use ratatui::style::Color;

pub const HEADER_BG: Color = Color::DarkGray;
pub const HEADER_FG: Color = Color::White;
pub const BORDER: Color = Color::DarkGray;
pub const TITLE: Color = Color::Cyan;

pub const STATUS_RUNNING: Color = Color::Yellow;
pub const STATUS_COMPLETE: Color = Color::Green;
pub const STATUS_FAILED: Color = Color::Red;
pub const STATUS_PENDING: Color = Color::Gray;
pub const STATUS_NEUTRAL: Color = Color::White;

/// Color a worker's lifecycle state should render in, falling back to
/// `STATUS_NEUTRAL` for states the dashboard doesn't specially highlight.
#[must_use]
pub fn status_color(state: &str) -> Color {
    match state {
        "complete" | "merged" => STATUS_COMPLETE,
        "failed" | "error" | "permanent_failure" => STATUS_FAILED,
        "pending" | "queued" => STATUS_PENDING,
        "" => STATUS_NEUTRAL,
        _ => STATUS_RUNNING,
    }
}
