//! Application state for the dashboard: a pluggable [`DashboardSource`] feeds
//! a snapshot of worker and event state, which the render loop redraws on
//! every tick or input event. The dashboard never writes to `.ralph/` — it
//! is a pure observer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use ratatui::Terminal;
use ratatui::backend::Backend;

use ralph_core::events;
use ralph_core::lifecycle::LifecycleState;

use crate::event::{AppEvent, next_event};
use crate::ui;

/// One worker's state as shown in the worker table.
#[derive(Clone, Debug)]
pub struct WorkerSummary {
    pub worker_id: String,
    pub task_id: String,
    pub epoch: String,
    pub state: String,
    pub merge_attempts: u32,
    pub recovery_attempts: u32,
    pub error: Option<String>,
}

/// Everything the UI needs to render one frame.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub workers: Vec<WorkerSummary>,
    pub recent_events: Vec<events::EventRecord>,
    pub event_counts: Vec<(String, usize)>,
}

/// Supplies dashboard snapshots. Abstracted so tests can feed fixed data
/// without touching the filesystem.
pub trait DashboardSource {
    /// Read the current state of the world.
    ///
    /// # Errors
    /// Implementations may fail on I/O errors reading `.ralph/`.
    fn snapshot(&self) -> Result<Snapshot>;
}

/// Reads a live `.ralph/` tree: worker directories for lifecycle state, and
/// `logs/events.jsonl` for the event tail.
pub struct FsDashboardSource {
    ralph_dir: PathBuf,
    event_tail: usize,
}

impl FsDashboardSource {
    #[must_use]
    pub fn new(ralph_dir: impl Into<PathBuf>) -> Self {
        Self {
            ralph_dir: ralph_dir.into(),
            event_tail: 200,
        }
    }

    fn worker_summary(dir: &Path) -> Option<WorkerSummary> {
        let worker_id = dir.file_name()?.to_string_lossy().into_owned();
        let (task_id, epoch) = worker_id
            .strip_prefix("worker-")
            .and_then(|rest| rest.rsplit_once('-'))
            .map_or_else(
                || (worker_id.clone(), String::new()),
                |(task, epoch)| (task.to_owned(), epoch.to_owned()),
            );
        let state = LifecycleState::load(&dir.join("lifecycle-state.json"))
            .ok()
            .flatten();
        Some(match state {
            Some(s) => WorkerSummary {
                worker_id,
                task_id,
                epoch,
                state: s.state,
                merge_attempts: s.merge_attempts,
                recovery_attempts: s.recovery_attempts,
                error: s.error,
            },
            None => WorkerSummary {
                worker_id,
                task_id,
                epoch,
                state: "unknown".to_owned(),
                merge_attempts: 0,
                recovery_attempts: 0,
                error: None,
            },
        })
    }
}

impl DashboardSource for FsDashboardSource {
    fn snapshot(&self) -> Result<Snapshot> {
        let workers_dir = self.ralph_dir.join("workers");
        let mut workers = Vec::new();
        if workers_dir.is_dir() {
            for entry in std::fs::read_dir(&workers_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    if let Some(summary) = Self::worker_summary(&entry.path()) {
                        workers.push(summary);
                    }
                }
            }
        }
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

        let events_path = self.ralph_dir.join("logs").join("events.jsonl");
        let all_events = if events_path.exists() {
            events::read_all(&events_path).unwrap_or_default()
        } else {
            Vec::new()
        };
        let event_counts = if events_path.exists() {
            let mut counts: Vec<(String, usize)> = events::count_by_type(&events_path)
                .unwrap_or_default()
                .into_iter()
                .collect();
            counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            counts
        } else {
            Vec::new()
        };
        let recent_events = all_events
            .into_iter()
            .rev()
            .take(self.event_tail)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Ok(Snapshot {
            workers,
            recent_events,
            event_counts,
        })
    }
}

/// Which pane has focus for scrolling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Workers,
    Events,
}

pub struct App {
    source: Box<dyn DashboardSource>,
    snapshot: Snapshot,
    pub focus: Focus,
    pub worker_selected: usize,
    pub event_scroll: usize,
    pub should_quit: bool,
    refresh_interval: Duration,
}

impl App {
    /// # Errors
    /// Propagates the source's first snapshot read failure.
    pub fn new(source: Box<dyn DashboardSource>) -> Result<Self> {
        let snapshot = source.snapshot()?;
        Ok(Self {
            source,
            snapshot,
            focus: Focus::Workers,
            worker_selected: 0,
            event_scroll: 0,
            should_quit: false,
            refresh_interval: Duration::from_millis(750),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn refresh(&mut self) -> Result<()> {
        self.snapshot = self.source.snapshot()?;
        let worker_count = self.snapshot.workers.len();
        if worker_count == 0 {
            self.worker_selected = 0;
        } else if self.worker_selected >= worker_count {
            self.worker_selected = worker_count - 1;
        }
        Ok(())
    }

    fn handle_event(&mut self, event: &AppEvent) {
        use crossterm::event::KeyCode;
        match event {
            AppEvent::Key(key) => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Tab => {
                    self.focus = match self.focus {
                        Focus::Workers => Focus::Events,
                        Focus::Events => Focus::Workers,
                    };
                }
                KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
                KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
                _ => {}
            },
            AppEvent::Resize { .. } | AppEvent::Mouse(_) | AppEvent::Paste(_) | AppEvent::Tick => {}
        }
    }

    fn move_selection(&mut self, delta: isize) {
        match self.focus {
            Focus::Workers => {
                let len = self.snapshot.workers.len();
                if len == 0 {
                    return;
                }
                let next = self.worker_selected as isize + delta;
                self.worker_selected = next.clamp(0, len as isize - 1) as usize;
            }
            Focus::Events => {
                let len = self.snapshot.recent_events.len();
                let next = self.event_scroll as isize + delta;
                self.event_scroll = next.clamp(0, len as isize) as usize;
            }
        }
    }

    /// Drive the render loop until the user quits.
    ///
    /// # Errors
    /// Propagates terminal I/O errors or a failed snapshot refresh.
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        while !self.should_quit {
            terminal.draw(|frame| ui::draw(frame, self))?;
            let event = next_event(self.refresh_interval)?;
            if event == AppEvent::Tick {
                self.refresh()?;
            } else {
                self.handle_event(&event);
            }
        }
        Ok(())
    }
}
