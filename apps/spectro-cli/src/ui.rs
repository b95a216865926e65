use std::{
    collections::VecDeque,
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph},
    Terminal,
};
use spectro_types::{
    events::{EventPayload, SystemEvent},
    profile::{Series, SpectrumProfile},
    roi::Roi,
    session::SessionState,
    telemetry::AcquisitionMetrics,
};
use tokio::sync::mpsc::UnboundedSender;

const MAX_LOG_ENTRIES: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Histogram,
    Intensity,
}

impl ViewKind {
    pub fn label(self) -> &'static str {
        match self {
            ViewKind::Histogram => "histogram",
            ViewKind::Intensity => "intensity",
        }
    }
}

pub enum UiMessage {
    Event(SystemEvent),
    Profile(ViewKind, Arc<SpectrumProfile>),
    Status {
        state: SessionState,
        metrics: AcquisitionMetrics,
        roi: Option<Roi>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    ToggleStream,
    Capture,
    ResetRoi,
    Quit,
}

#[derive(Default)]
struct ViewState {
    histogram: Option<Arc<SpectrumProfile>>,
    intensity: Option<Arc<SpectrumProfile>>,
    state: SessionState,
    metrics: AcquisitionMetrics,
    roi: Option<Roi>,
    logs: VecDeque<String>,
}

impl ViewState {
    fn apply(&mut self, message: UiMessage) -> bool {
        match message {
            UiMessage::Event(event) => {
                if self.logs.len() == MAX_LOG_ENTRIES {
                    self.logs.pop_front();
                }
                self.logs.push_back(format_event(&event));
            }
            UiMessage::Profile(ViewKind::Histogram, profile) => self.histogram = Some(profile),
            UiMessage::Profile(ViewKind::Intensity, profile) => self.intensity = Some(profile),
            UiMessage::Status { state, metrics, roi } => {
                // Stale curves would suggest live data.
                if state != SessionState::Streaming {
                    self.histogram = None;
                    self.intensity = None;
                }
                self.state = state;
                self.metrics = metrics;
                self.roi = roi;
            }
            UiMessage::Shutdown => return true,
        }
        false
    }
}

pub fn run(
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    summary: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, commands, summary.as_str());

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    res
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    summary: &str,
) -> Result<()> {
    let mut view = ViewState::default();

    loop {
        let mut should_close = false;
        loop {
            match receiver.try_recv() {
                Ok(message) => should_close |= view.apply(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    should_close = true;
                    break;
                }
            }
        }
        if should_close {
            break;
        }

        terminal.draw(|f| {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints(
                    [
                        Constraint::Length(4),
                        Constraint::Min(10),
                        Constraint::Length(8),
                    ]
                    .as_ref(),
                )
                .split(f.size());
            let charts = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
                .split(rows[1]);

            f.render_widget(header(&view, summary), rows[0]);

            let red = points(view.histogram.as_deref(), Series::Red);
            let green = points(view.histogram.as_deref(), Series::Green);
            let blue = points(view.histogram.as_deref(), Series::Blue);
            let combined = points(view.histogram.as_deref(), Series::Combined);
            let histogram = profile_chart(
                "RGB histogram",
                vec![
                    line_dataset("R", Color::Red, &red),
                    line_dataset("G", Color::Green, &green),
                    line_dataset("B", Color::Blue, &blue),
                    line_dataset("avg", Color::White, &combined),
                ],
                red.len(),
            );
            f.render_widget(histogram, charts[0]);

            let gray = points(view.intensity.as_deref(), Series::Gray);
            let intensity = profile_chart(
                "Intensity",
                vec![line_dataset("gray", Color::Gray, &gray)],
                gray.len(),
            );
            f.render_widget(intensity, charts[1]);

            let items: Vec<ListItem> = view
                .logs
                .iter()
                .rev()
                .map(|entry| ListItem::new(entry.clone()))
                .collect();
            let list = List::new(items)
                .block(Block::default().borders(Borders::ALL).title("Recent events"));
            f.render_widget(list, rows[2]);
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let command = match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        let _ = commands.send(UiCommand::Quit);
                        break;
                    }
                    KeyCode::Char('s') => UiCommand::ToggleStream,
                    KeyCode::Char('c') => UiCommand::Capture,
                    KeyCode::Char('r') => UiCommand::ResetRoi,
                    _ => continue,
                };
                if commands.send(command).is_err() {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn header<'a>(view: &ViewState, summary: &'a str) -> Paragraph<'a> {
    let roi = view
        .roi
        .map(|roi| roi.to_string())
        .unwrap_or_else(|| "full frame".into());
    let native = view
        .metrics
        .native_resolution
        .map(|res| res.to_string())
        .unwrap_or_else(|| "?".into());
    let peak = view
        .intensity
        .as_deref()
        .and_then(|profile| profile.peak(Series::Gray))
        .map(|(column, value)| format!("col {column} = {value:.1}"))
        .unwrap_or_else(|| "-".into());

    Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                "Spectro",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(view.state.to_string(), state_style(view.state)),
            Span::raw(format!(
                "  frames {}  misses {}  reconnects {}  native {}  roi {}  peak {}",
                view.metrics.frames_published,
                view.metrics.transient_failures,
                view.metrics.reconnects,
                native,
                roi,
                peak
            )),
        ]),
        Line::from(vec![
            Span::raw(summary),
            Span::raw("  "),
            Span::styled("s", Style::default().fg(Color::Yellow)),
            Span::raw(" start/stop  "),
            Span::styled("c", Style::default().fg(Color::Yellow)),
            Span::raw(" capture  "),
            Span::styled("r", Style::default().fg(Color::Yellow)),
            Span::raw(" reset ROI  "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(" quit"),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Session"))
}

fn state_style(state: SessionState) -> Style {
    let color = match state {
        SessionState::Streaming => Color::Green,
        SessionState::Connecting => Color::Yellow,
        SessionState::Stopped => Color::Magenta,
        SessionState::Idle => Color::DarkGray,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn points(profile: Option<&SpectrumProfile>, series: Series) -> Vec<(f64, f64)> {
    profile
        .map(|profile| {
            profile
                .series(series)
                .iter()
                .enumerate()
                .map(|(column, value)| (column as f64, *value))
                .collect()
        })
        .unwrap_or_default()
}

fn line_dataset<'a>(name: &'a str, color: Color, data: &'a [(f64, f64)]) -> Dataset<'a> {
    Dataset::default()
        .name(name)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

fn profile_chart<'a>(title: &'a str, datasets: Vec<Dataset<'a>>, width: usize) -> Chart<'a> {
    let x_max = width.saturating_sub(1).max(1);
    Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(
            Axis::default()
                .title("column")
                .bounds([0.0, x_max as f64])
                .labels(vec![Span::raw("0"), Span::raw(x_max.to_string())]),
        )
        .y_axis(
            Axis::default()
                .title("level")
                .bounds([0.0, 255.0])
                .labels(vec![Span::raw("0"), Span::raw("128"), Span::raw("255")]),
        )
}

fn format_event(event: &SystemEvent) -> String {
    let timestamp = event.timestamp.format("%H:%M:%S");
    match &event.payload {
        EventPayload::Lifecycle(lifecycle) => format!(
            "[{}] {} -> {} {}",
            timestamp,
            lifecycle.from,
            lifecycle.to,
            lifecycle.details.clone().unwrap_or_default()
        ),
        EventPayload::Warning(warning) => {
            format!("[{}] {:?}: {}", timestamp, warning.kind, warning.message)
        }
        EventPayload::Roi(roi) => match roi.roi {
            Some(roi) => format!("[{}] ROI {}", timestamp, roi),
            None => format!("[{}] ROI cleared", timestamp),
        },
        EventPayload::Capture(capture) => format!("[{}] Saved {}", timestamp, capture.path),
    }
}
