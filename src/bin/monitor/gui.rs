use ambitrack::{
    eskf::TuningParams,
    estimator::TrackerMessage,
    orientation::Euler,
    staleness::{Freshness, StalenessWatchdog},
    transport::{OrientationReader, Slot},
};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};
use std::{
    error::Error,
    io,
    sync::mpsc::Sender,
    time::{Duration, Instant},
};

/// Seconds of history shown.
const WINDOW_S: f64 = 10.0;

/// Horizon change per key press, in seconds.
const TAU_STEP: f64 = 0.005;

struct App {
    reader: OrientationReader,
    watchdog: StalenessWatchdog,
    control: Sender<TrackerMessage>,
    tau: f64,
    start: Instant,
    freshness: Freshness,
    raw: Vec<(f64, f64)>,
    predicted: Vec<(f64, f64)>,
    audio: Vec<(f64, f64)>,
}

impl App {
    fn new(
        reader: OrientationReader,
        watchdog: StalenessWatchdog,
        control: Sender<TrackerMessage>,
        tau: f64,
    ) -> App {
        App {
            reader,
            watchdog,
            control,
            tau,
            start: Instant::now(),
            freshness: Freshness::Waiting,
            raw: vec![],
            predicted: vec![],
            audio: vec![],
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn on_tick(&mut self) {
        let fresh = self.reader.poll();
        self.freshness = self
            .watchdog
            .observe(self.reader.last_sequence(), Instant::now());

        let t = self.now();
        if fresh {
            let frame = self.reader.frame();
            let yaw = |slot| Euler::from_quat(frame.quat(slot)).yaw.to_degrees();
            self.raw.push((t, yaw(Slot::Raw)));
            self.predicted.push((t, yaw(Slot::Predicted)));
            self.audio.push((t, yaw(Slot::AudioTracked)));
        }

        let oldest = t - WINDOW_S;
        for series in [&mut self.raw, &mut self.predicted, &mut self.audio] {
            series.retain(|&(x, _)| x >= oldest);
        }
    }

    /// Sends a new prediction horizon to the estimator.
    fn nudge_tau(&mut self, delta: f64) {
        self.tau = (self.tau + delta).max(0.0);
        let params = TuningParams {
            tau: Some(self.tau),
            ..Default::default()
        };
        // A gone estimator just means the chart stops moving.
        let _ = self.control.send(TrackerMessage::UpdateParams(params));
    }
}

pub fn engage_gui(
    reader: OrientationReader,
    watchdog: StalenessWatchdog,
    control: Sender<TrackerMessage>,
    tau: f64,
) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let tick_rate = Duration::from_millis(50);
    let app = App::new(reader, watchdog, control, tau);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{:?}", err)
    }

    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => return Ok(()),
                    KeyCode::Up => app.nudge_tau(TAU_STEP),
                    KeyCode::Down => app.nudge_tau(-TAU_STEP),
                    _ => {}
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn status(app: &App) -> String {
    let state = match app.freshness {
        Freshness::Waiting => "waiting".to_owned(),
        Freshness::Fresh => "fresh".to_owned(),
        Freshness::Stale { since } => format!("stale {:.1}s", since.as_secs_f64()),
    };
    format!(
        "Yaw (°)  #{}  {}  τ = {:.0} ms  [↑/↓ τ, q quit]",
        app.reader.last_sequence(),
        state,
        app.tau * 1000.0
    )
}

fn ui(f: &mut Frame, app: &App) {
    let t = app.now();
    let x_bounds = [t - WINDOW_S, t];

    let chart = Chart::new(vec![
        Dataset::default()
            .name("Raw")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Cyan))
            .data(&app.raw),
        Dataset::default()
            .name("Predicted")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Red))
            .data(&app.predicted),
        Dataset::default()
            .name("Audio")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Yellow))
            .data(&app.audio),
    ])
    .block(Block::default().title(status(app)).borders(Borders::ALL))
    .x_axis(
        Axis::default()
            .title(Span::styled("Time (s)", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds(x_bounds)
            .labels(
                [x_bounds[0], t - WINDOW_S / 2.0, x_bounds[1]]
                    .iter()
                    .map(|v| Span::from(format!("{:.0}", v.max(0.0))))
                    .collect(),
            ),
    )
    .y_axis(
        Axis::default()
            .title(Span::styled("Yaw", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds([-90.0, 90.0])
            .labels(
                ["-90", "-45", "0", "45", "90"]
                    .iter()
                    .cloned()
                    .map(Span::from)
                    .collect(),
            ),
    );

    f.render_widget(chart, f.size());
}
