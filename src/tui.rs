use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use std::{
    fmt,
    sync::{Arc, Mutex},
    thread,
};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink};
use crate::cancel::CancelToken;
use crate::error::HarvestError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Operational,
    Logs,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Search,
    Stats,
    Export,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Search => "Search",
            Phase::Stats => "Stats",
            Phase::Export => "Export",
            Phase::Done => "Done",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Search" => Some(Phase::Search),
            "Stats" => Some(Phase::Stats),
            "Export" => Some(Phase::Export),
            "Done" => Some(Phase::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    discovered: usize,
    completed: usize,
    total: usize,
    ok: usize,
    failed: usize,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    cancelling: bool,
}

pub struct Tui {
    keyword: String,
    cancel: CancelToken,
    state: Arc<Mutex<AppState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
                if let Some(total) = parse_field(payload, "total") {
                    state.total = total;
                    state.completed = 0;
                }
            } else if message.starts_with("stats.done") {
                if let Some(completed) = parse_field(&message, "completed") {
                    state.completed = completed;
                }
                if let Some(total) = parse_field(&message, "total") {
                    state.total = total;
                }
                if message.split_whitespace().nth(2) == Some("ok") {
                    state.ok += 1;
                } else if message.contains("fetch-failed") || message.contains("cancelled") {
                    state.failed += 1;
                }
            } else if let Some(discovered) = parse_field(&message, "discovered") {
                state.discovered = discovered;
            } else {
                state.status = message.clone();
            }

            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(&mut state.logs, format!("[{}] {message}", timestamp()), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(keyword: &str, cancel: CancelToken) -> Self {
        Self {
            keyword: keyword.to_string(),
            cancel,
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: Phase::Search,
                discovered: 0,
                completed: 0,
                total: 0,
                ok: 0,
                failed: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Operational,
                started: Instant::now(),
                cancelling: false,
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. The first
    /// `q`/`Esc`/`Ctrl-C` asks the job to stop and waits for what it has;
    /// a second one leaves without waiting.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, HarvestError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let outcome = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                handle.join().ok();
                break Some(result);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break None;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        match outcome {
            Some(result) => result.map_err(miette::Report::new),
            None => Err(miette::Report::new(HarvestError::Interrupted)),
        }
    }

    /// Returns true when the UI should stop waiting for the job.
    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        let is_interrupt = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
            || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL));
        if is_interrupt {
            return self.request_cancel();
        }
        match key.code {
            KeyCode::F(1) | KeyCode::Char('?') => self.set_view(View::Help),
            KeyCode::F(3) => self.set_view(View::Operational),
            KeyCode::F(4) | KeyCode::Char('l') => self.set_view(View::Logs),
            KeyCode::PageUp => self.scroll_logs(-5),
            KeyCode::PageDown => self.scroll_logs(5),
            _ => {}
        }
        false
    }

    fn request_cancel(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        if state.cancelling {
            return true;
        }
        state.cancelling = true;
        state.status = "cancelling; exporting collected results".to_string();
        push_bounded(&mut state.events, "interrupt requested".to_string(), EVENTS_MAX);
        self.cancel.cancel();
        false
    }

    fn set_view(&self, view: View) {
        if let Ok(mut state) = self.state.lock() {
            state.view = view;
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let lines = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let last = u16::try_from(lines.saturating_sub(1)).unwrap_or(u16::MAX);
        self.log_scroll = self.log_scroll.saturating_add_signed(delta).min(last);
    }
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    match state.view {
        View::Operational => draw_operational(frame, tui, state, tick),
        View::Logs => draw_logs(frame, tui, state),
        View::Help => draw_help(frame),
    }
}

fn draw_operational(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), chunks[0]);

    let ratio = if state.total == 0 {
        0.0
    } else {
        (state.completed as f64 / state.total as f64).clamp(0.0, 1.0)
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Statistics"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(format!("{}/{}", state.completed, state.total));
    frame.render_widget(gauge, chunks[1]);

    frame.render_widget(draw_status_panel(state), chunks[2]);

    let footer = Paragraph::new(Line::from(Span::styled(
        "q/Esc/Ctrl-C stop and export   F4 logs   F1 help",
        Style::default().fg(Color::Gray),
    )));
    frame.render_widget(footer, chunks[3]);
}

fn draw_header(tui: &Tui, state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let elapsed = state.started.elapsed().as_secs();
    let header_line = Line::from(vec![
        Span::styled(
            "PX-HARVEST",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Keyword: "),
        Span::styled(tui.keyword.clone(), Style::default().fg(Color::Cyan)),
        Span::raw(format!("   Elapsed: {:02}:{:02}   ", elapsed / 60, elapsed % 60)),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(vec![header_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let phase_color = match (state.cancelling, state.phase) {
        (true, _) => Color::Yellow,
        (false, Phase::Done) => Color::Green,
        _ => Color::Cyan,
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(state.phase.label(), Style::default().fg(phase_color)),
            Span::styled("   Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Discovered: ", Style::default().fg(Color::Gray)),
            Span::raw(state.discovered.to_string()),
            Span::styled("   OK: ", Style::default().fg(Color::Gray)),
            Span::styled(state.ok.to_string(), Style::default().fg(Color::Green)),
            Span::styled("   Failed: ", Style::default().fg(Color::Gray)),
            Span::styled(state.failed.to_string(), Style::default().fg(Color::Red)),
        ]),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .wrap(Wrap { trim: true })
}

fn draw_logs(frame: &mut ratatui::Frame, tui: &Tui, state: &AppState) {
    let lines: Vec<Line> = state
        .logs
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect();
    let view = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs (PgUp/PgDn, F3 back)"))
        .scroll((tui.log_scroll, 0));
    frame.render_widget(view, frame.area());
}

fn draw_help(frame: &mut ratatui::Frame) {
    let block = Block::default().borders(Borders::ALL).title("Help");
    let lines = vec![
        Line::from("F1 Help  F3 Progress  F4 Logs"),
        Line::from("q / Esc / Ctrl-C: stop, keep what was collected and export it"),
        Line::from("Press again to leave without waiting"),
    ];
    let view = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    frame.render_widget(view, frame.area());
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (phase, payload) = rest.split_once(';').unwrap_or((rest, ""));
    Some((Phase::parse(phase)?, payload.trim()))
}

fn parse_field(message: &str, key: &str) -> Option<usize> {
    message
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .find(|(name, _)| *name == key)
        .and_then(|(_, value)| value.trim_end_matches(';').parse().ok())
}

fn push_bounded(queue: &mut VecDeque<String>, message: String, max: usize) {
    queue.push_back(message);
    while queue.len() > max {
        queue.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_messages_are_parsed() {
        assert_eq!(
            parse_phase("phase=Stats; total=12"),
            Some((Phase::Stats, "total=12"))
        );
        assert_eq!(parse_phase("stats.done PXD1 ok"), None);
    }

    #[test]
    fn fields_are_read_from_progress_lines() {
        let line = "stats.done PXD000001 ok completed=3 total=10";
        assert_eq!(parse_field(line, "completed"), Some(3));
        assert_eq!(parse_field(line, "total"), Some(10));
        assert_eq!(parse_field(line, "missing"), None);
    }

    #[test]
    fn sink_tracks_pool_progress() {
        let tui = Tui::new("cancer", CancelToken::new());
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        sink.event(ProgressEvent {
            message: "phase=Stats; total=2".to_string(),
            elapsed: None,
        });
        sink.event(ProgressEvent {
            message: "stats.done PXD000001 ok completed=1 total=2".to_string(),
            elapsed: None,
        });
        sink.event(ProgressEvent {
            message: "stats.done PXD000002 fetch-failed completed=2 total=2".to_string(),
            elapsed: None,
        });
        let state = tui.state.lock().unwrap();
        assert_eq!(state.phase, Phase::Stats);
        assert_eq!((state.completed, state.total), (2, 2));
        assert_eq!((state.ok, state.failed), (1, 1));
    }
}
