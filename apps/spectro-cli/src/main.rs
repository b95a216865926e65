mod ui;

use std::{
    env,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use spectro_network::{EventHub, LocalHub};
use spectro_ops::{ensure_telemetry_dir, init_file_tracing, init_tracing, TelemetryStore};
use spectro_session::{AnalysisWindow, SessionController};
use spectro_stream::{MjpegSource, MockSource, Pattern, StreamSource};
use spectro_types::{
    config::{AnalysisConfig, SpectroConfig},
    events::{CaptureEvent, EventPayload, SystemEvent},
    frame::Resolution,
    roi::{CanvasPoint, CanvasRect, CanvasSize},
    session::SessionState,
};
use spectro_vision::{reduce, write_profile_json, CaptureWriter};
use tokio::{
    sync::mpsc as async_mpsc,
    task::JoinHandle,
    time::{interval, sleep, Instant},
};
use tracing::{info, warn};

use ui::{UiCommand, UiMessage, ViewKind};

const SYNTHETIC_RESOLUTION: Resolution = Resolution::new(640, 120);
const FIRST_FRAME_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Live spectral profiles from a network camera stream")]
struct Cli {
    /// TOML config file. Falls back to $SPECTRO_CONFIG, then configs/dev.toml.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the stream URL from the config
    #[arg(long)]
    url: Option<String>,

    /// Use the built-in synthetic camera instead of the network stream
    #[arg(long)]
    synthetic: bool,

    /// Crop drawn on a preview canvas, as "x0,y0,x1,y1@WIDTHxHEIGHT"
    #[arg(long)]
    crop: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Live terminal plot of the histogram and intensity profiles (default)
    Live,
    /// Save one frame as PNG and its profile as JSON, then exit
    Capture {
        /// How long to wait for the first frame
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
}

type Crop = (CanvasRect, CanvasSize);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());
    if let Some(url) = cli.url {
        config.stream.url = url;
    }
    let crop = cli.crop.as_deref().map(parse_crop).transpose()?;
    let command = cli.command.unwrap_or(Command::Live);

    if cli.synthetic {
        let source = MockSource::new(SYNTHETIC_RESOLUTION, Pattern::Spectrum)
            .with_frame_interval(Duration::from_millis(33));
        run(command, config, source, crop).await
    } else {
        let source = MjpegSource::new(&config.stream);
        run(command, config, source, crop).await
    }
}

async fn run<S: StreamSource>(
    command: Command,
    config: SpectroConfig,
    source: S,
    crop: Option<Crop>,
) -> Result<()> {
    match command {
        Command::Live => {
            let log_path = init_file_tracing(&config.ops)?;
            live(config, source, crop, log_path).await
        }
        Command::Capture { wait_ms } => {
            init_tracing(&config.ops)?;
            capture_once(config, source, crop, Duration::from_millis(wait_ms)).await
        }
    }
}

async fn live<S: StreamSource>(
    config: SpectroConfig,
    source: S,
    crop: Option<Crop>,
    log_path: PathBuf,
) -> Result<()> {
    let hub = Arc::new(LocalHub::new(256));
    let telemetry = TelemetryStore::new();
    let (ui_tx, ui_rx) = mpsc::channel();
    let (cmd_tx, mut cmd_rx) = async_mpsc::unbounded_channel();
    let pump = spawn_event_pump(&hub, telemetry.clone(), Some(ui_tx.clone()));

    let mut session = SessionController::new(config.stream.clone(), source, Arc::clone(&hub))?;
    let summary = format!("{} | log {}", session.endpoint(), log_path.display());
    let ui = tokio::task::spawn_blocking(move || ui::run(ui_rx, cmd_tx, summary));

    if let Some((rect, canvas)) = crop {
        if let Err(err) = establish_roi(&mut session, rect, canvas, FIRST_FRAME_WAIT).await {
            warn!("Crop not applied: {:#}", err);
        }
    }
    let mut window = begin(&mut session, &config.analysis, &ui_tx).await;
    let writer = CaptureWriter::new(&config.capture.capture_dir);
    let mut ticker = interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(UiCommand::ToggleStream) => {
                    if session.state() == SessionState::Streaming {
                        if let Some(mut open) = window.take() {
                            open.close();
                        }
                        session.stop().await;
                    } else {
                        window = begin(&mut session, &config.analysis, &ui_tx).await;
                    }
                }
                Some(UiCommand::Capture) => {
                    if let Err(err) = save_capture(&session, &writer) {
                        warn!("Capture failed: {:#}", err);
                    }
                }
                Some(UiCommand::ResetRoi) => {
                    session.reset_roi();
                }
                Some(UiCommand::Quit) | None => break,
            },
            _ = ticker.tick() => {
                let metrics = session.metrics();
                telemetry.record_metrics(metrics).await;
                let status = UiMessage::Status {
                    state: session.state(),
                    metrics,
                    roi: session.active_roi(),
                };
                if ui_tx.send(status).is_err() {
                    break;
                }
            }
        }
    }

    drop(window);
    session.shutdown().await;
    // UI may already be gone after 'q'.
    let _ = ui_tx.send(UiMessage::Shutdown);
    drop(ui_tx);
    drop(session);
    drop(hub);
    if let Err(err) = pump.await {
        warn!("Event pump ended abnormally: {}", err);
    }
    ui.await.context("UI thread panicked")??;

    let dir = ensure_telemetry_dir(&config.ops.telemetry_dir)?;
    telemetry.flush_to(&dir).await?;
    Ok(())
}

async fn capture_once<S: StreamSource>(
    config: SpectroConfig,
    source: S,
    crop: Option<Crop>,
    wait: Duration,
) -> Result<()> {
    let hub = Arc::new(LocalHub::new(64));
    let telemetry = TelemetryStore::new();
    let pump = spawn_event_pump(&hub, telemetry.clone(), None);
    let mut session = SessionController::new(config.stream.clone(), source, Arc::clone(&hub))?;
    let writer = CaptureWriter::new(&config.capture.capture_dir);

    let outcome = async {
        if let Some((rect, canvas)) = crop {
            establish_roi(&mut session, rect, canvas, wait).await?;
        }
        session.start().await?;
        wait_for_frame(&session, wait).await?;
        save_capture(&session, &writer)
    }
    .await;

    session.shutdown().await;
    drop(session);
    drop(hub);
    if let Err(err) = pump.await {
        warn!("Event pump ended abnormally: {}", err);
    }
    let dir = ensure_telemetry_dir(&config.ops.telemetry_dir)?;
    telemetry.flush_to(&dir).await?;

    let (image, profile) = outcome?;
    println!("frame   {}", image.display());
    println!("profile {}", profile.display());
    Ok(())
}

/// Start once to learn the native resolution, then apply the crop while
/// stopped. Leaves the session `Stopped`.
async fn establish_roi<S: StreamSource, H: EventHub>(
    session: &mut SessionController<S, H>,
    rect: CanvasRect,
    canvas: CanvasSize,
    wait: Duration,
) -> Result<()> {
    session.start().await?;
    let first = wait_for_frame(session, wait).await;
    session.stop().await;
    first?;
    let roi = session.select_roi(rect, canvas)?;
    info!("Cropping to {}", roi);
    Ok(())
}

async fn wait_for_frame<S: StreamSource, H: EventHub>(
    session: &SessionController<S, H>,
    wait: Duration,
) -> Result<()> {
    let deadline = Instant::now() + wait;
    while session.latest_frame().is_none() {
        if Instant::now() >= deadline {
            bail!("no frame received within {}ms", wait.as_millis());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Start streaming and open the histogram and intensity views. Failures are
/// logged; the UI shows them through the event feed.
async fn begin<S: StreamSource>(
    session: &mut SessionController<S, LocalHub>,
    analysis: &AnalysisConfig,
    ui: &mpsc::Sender<UiMessage>,
) -> Option<AnalysisWindow> {
    if let Err(err) = session.start().await {
        warn!("Stream start failed: {}", err);
        return None;
    }
    match open_window(session, analysis, ui) {
        Ok(window) => Some(window),
        Err(err) => {
            warn!("Analysis views not opened: {}", err);
            None
        }
    }
}

fn open_window<S: StreamSource>(
    session: &SessionController<S, LocalHub>,
    analysis: &AnalysisConfig,
    ui: &mpsc::Sender<UiMessage>,
) -> spectro_types::Result<AnalysisWindow> {
    let mut window = AnalysisWindow::new("spectrum");
    let views = [
        (ViewKind::Histogram, analysis.histogram_interval_ms),
        (ViewKind::Intensity, analysis.intensity_interval_ms),
    ];
    for (kind, interval_ms) in views {
        let tx = ui.clone();
        let handle = session.open_view(kind.label(), Duration::from_millis(interval_ms), move |profile| {
            let _ = tx.send(UiMessage::Profile(kind, profile));
        })?;
        window.attach(handle);
    }
    Ok(window)
}

fn save_capture<S: StreamSource, H: EventHub>(
    session: &SessionController<S, H>,
    writer: &CaptureWriter,
) -> Result<(PathBuf, PathBuf)> {
    let frame = session.capture_current_frame()?;
    let image_path = writer.save_frame(&frame)?;
    let profile_path = image_path.with_extension("json");
    write_profile_json(&reduce(&frame), &profile_path)?;
    info!("Captured {} ({})", image_path.display(), frame.resolution());
    session
        .hub()
        .publish(SystemEvent::new(EventPayload::Capture(CaptureEvent {
            path: image_path.display().to_string(),
        })));
    Ok((image_path, profile_path))
}

fn spawn_event_pump(
    hub: &Arc<LocalHub>,
    telemetry: TelemetryStore,
    ui: Option<mpsc::Sender<UiMessage>>,
) -> JoinHandle<()> {
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let Some(ui) = &ui {
                let _ = ui.send(UiMessage::Event(event.clone()));
            }
            telemetry.record_event(event).await;
        }
    })
}

/// Parse "x0,y0,x1,y1@WIDTHxHEIGHT".
fn parse_crop(spec: &str) -> Result<Crop> {
    let (corners, canvas) = spec
        .split_once('@')
        .ok_or_else(|| anyhow!("crop '{spec}' is missing '@WIDTHxHEIGHT'"))?;
    let coords = corners
        .split(',')
        .map(|part| part.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("crop corners '{corners}' are not integers"))?;
    let [x0, y0, x1, y1] = coords[..] else {
        bail!("crop '{spec}' needs exactly four corner values");
    };
    let (width, height) = canvas
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("canvas size '{canvas}' must look like 640x480"))?;
    let size = CanvasSize::new(
        width.trim().parse().context("canvas width")?,
        height.trim().parse().context("canvas height")?,
    );
    Ok((
        CanvasRect::new(CanvasPoint::new(x0, y0), CanvasPoint::new(x1, y1)),
        size,
    ))
}

fn load_config(explicit: Option<&str>) -> SpectroConfig {
    let chosen = explicit
        .map(str::to_owned)
        .or_else(|| env::var("SPECTRO_CONFIG").ok());
    let path = match chosen {
        Some(path) => path,
        None if Path::new("configs/dev.toml").exists() => "configs/dev.toml".into(),
        None => return SpectroConfig::default(),
    };
    match SpectroConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path
                );
                SpectroConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path
            );
            SpectroConfig::default()
        }
    }
}
