use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use spectro_network::EventHub;
use spectro_stream::{Endpoint, FrameReader, StreamSource};
use spectro_types::{
    config::StreamConfig,
    events::{EventPayload, RoiEvent, SystemEvent, WarningKind},
    frame::{Frame, Resolution},
    profile::SpectrumProfile,
    roi::{CanvasRect, CanvasSize, Roi},
    session::SessionState,
    telemetry::AcquisitionMetrics,
    ReadError, Result, SpectroError,
};
use spectro_vision::reduce;
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    frame_buffer::FrameBuffer,
    roi::ResolutionCheck,
    scheduler::{PeriodicTaskScheduler, TaskHandle},
    session_error,
};

#[derive(Debug, Default)]
struct AcquisitionStats {
    frames_published: AtomicU64,
    transient_failures: AtomicU64,
    resolution_resets: AtomicU64,
    reconnects: AtomicU64,
}

impl AcquisitionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, native_resolution: Option<Resolution>) -> AcquisitionMetrics {
        AcquisitionMetrics {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            resolution_resets: self.resolution_resets.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            native_resolution,
        }
    }
}

struct Acquisition {
    stop: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Owns the stream session: state machine, acquisition loop, frame buffer
/// and the periodic analysis tasks reading from it.
pub struct SessionController<S, H>
where
    S: StreamSource,
    H: EventHub,
{
    source: Arc<S>,
    endpoint: Endpoint,
    config: StreamConfig,
    hub: Arc<H>,
    state: watch::Sender<SessionState>,
    buffer: Arc<FrameBuffer>,
    scheduler: PeriodicTaskScheduler,
    stats: Arc<AcquisitionStats>,
    acquisition: Option<Acquisition>,
    shut_down: bool,
}

impl<S, H> SessionController<S, H>
where
    S: StreamSource,
    H: EventHub,
{
    pub fn new(config: StreamConfig, source: S, hub: Arc<H>) -> Result<Self> {
        let endpoint = Endpoint::parse(&config.url)?;
        let (state, _) = watch::channel(SessionState::Idle);
        Ok(Self {
            source: Arc::new(source),
            endpoint,
            config,
            hub,
            state,
            buffer: Arc::new(FrameBuffer::new()),
            scheduler: PeriodicTaskScheduler::new(),
            stats: Arc::new(AcquisitionStats::default()),
            acquisition: None,
            shut_down: false,
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn hub(&self) -> &Arc<H> {
        &self.hub
    }

    /// Connect and begin acquisition. Valid from `Idle` or `Stopped`; on
    /// failure the session returns to the state it started from.
    pub async fn start(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(session_error("session has been shut down"));
        }
        let previous = self.state();
        if !previous.can_start() {
            return Err(session_error(format!("cannot start while {previous}")));
        }

        self.transition(SessionState::Connecting, Some(format!("connecting to {}", self.endpoint)));
        match self.source.connect(&self.endpoint).await {
            Ok(reader) => {
                self.transition(SessionState::Streaming, None);
                self.spawn_acquisition(reader);
                Ok(())
            }
            Err(err) => {
                warn!("Start failed: {}", err);
                self.hub
                    .publish(SystemEvent::warning(WarningKind::StartFailed, err.to_string()));
                self.transition(previous, Some(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Cancel analysis, close the stream and release the last frame. Returns
    /// false (and does nothing) unless the session is streaming.
    pub async fn stop(&mut self) -> bool {
        let state = self.state();
        if state != SessionState::Streaming {
            debug!("stop ignored while {}", state);
            return false;
        }
        let cancelled = self.scheduler.cancel_all();
        self.halt_acquisition().await;
        self.buffer.clear();
        self.transition(
            SessionState::Stopped,
            Some(format!("{cancelled} analysis tasks cancelled")),
        );
        true
    }

    /// Stop if streaming, then release everything. Later calls are no-ops.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.stop().await;
        self.scheduler.cancel_all();
        self.halt_acquisition().await;
        self.buffer.clear();
        self.buffer.reset_roi();
        self.transition(SessionState::Idle, Some("shutdown".into()));
        self.shut_down = true;
        info!("Session shut down");
    }

    /// Schedule a consumer that receives a fresh profile of the latest frame
    /// every `interval`. Firings skip while not streaming or before the first
    /// frame.
    pub fn open_view<F>(&self, name: &str, interval: Duration, mut sink: F) -> Result<TaskHandle>
    where
        F: FnMut(Arc<SpectrumProfile>) + Send + 'static,
    {
        let state = self.state();
        if !state.allows_analysis() {
            return Err(session_error(format!(
                "analysis requires a running stream (session is {state})"
            )));
        }
        let gate = self.state.subscribe();
        let buffer = Arc::clone(&self.buffer);
        Ok(self.scheduler.schedule(name, interval, move || {
            if *gate.borrow() != SessionState::Streaming {
                return;
            }
            let Some(frame) = buffer.latest() else {
                return;
            };
            sink(Arc::new(reduce(&frame)));
        }))
    }

    pub fn cancel_view(&self, handle: &TaskHandle) {
        self.scheduler.cancel(handle);
    }

    /// Cancel every analysis task without touching the stream.
    pub fn cancel_views(&self) -> usize {
        self.scheduler.cancel_all()
    }

    pub fn active_views(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Set the ROI from a rectangle drawn on a preview canvas.
    pub fn select_roi(&self, rect: CanvasRect, canvas: CanvasSize) -> Result<Roi> {
        self.ensure_roi_editable()?;
        let selected = self.buffer.select_roi(rect, canvas);
        self.announce_roi(selected)
    }

    /// Set the ROI directly in native pixel coordinates.
    pub fn set_roi(&self, roi: Roi) -> Result<Roi> {
        self.ensure_roi_editable()?;
        let applied = self.buffer.set_roi(roi).map(|()| roi);
        self.announce_roi(applied)
    }

    /// Clear the ROI. Allowed in any state.
    pub fn reset_roi(&self) -> Option<Roi> {
        let cleared = self.buffer.reset_roi();
        if cleared.is_some() {
            info!("ROI cleared");
            self.hub
                .publish(SystemEvent::new(EventPayload::Roi(RoiEvent { roi: None })));
        }
        cleared
    }

    pub fn active_roi(&self) -> Option<Roi> {
        self.buffer.active_roi()
    }

    pub fn native_resolution(&self) -> Option<Resolution> {
        self.buffer.native_resolution()
    }

    /// Most recent frame, already cropped to the active ROI.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.buffer.latest()
    }

    pub fn capture_current_frame(&self) -> Result<Frame> {
        self.buffer
            .latest()
            .ok_or_else(|| session_error("no frame available to capture"))
    }

    pub fn latest_profile(&self) -> Option<SpectrumProfile> {
        self.buffer.latest().map(|frame| reduce(&frame))
    }

    pub fn metrics(&self) -> AcquisitionMetrics {
        self.stats.snapshot(self.buffer.native_resolution())
    }

    fn ensure_roi_editable(&self) -> Result<()> {
        let state = self.state();
        if state.allows_roi_editing() {
            Ok(())
        } else {
            Err(session_error(format!(
                "ROI can only be edited while the stream is stopped (session is {state})"
            )))
        }
    }

    fn announce_roi(&self, outcome: Result<Roi>) -> Result<Roi> {
        match outcome {
            Ok(roi) => {
                info!("ROI set to {}", roi);
                self.hub
                    .publish(SystemEvent::new(EventPayload::Roi(RoiEvent { roi: Some(roi) })));
                Ok(roi)
            }
            Err(err) => {
                warn!("ROI selection discarded: {}", err);
                self.hub
                    .publish(SystemEvent::warning(WarningKind::InvalidRoi, err.to_string()));
                Err(err)
            }
        }
    }

    fn transition(&self, to: SessionState, details: Option<String>) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        info!("Session {} -> {}", from, to);
        self.hub.publish(SystemEvent::lifecycle(from, to, details));
    }

    fn spawn_acquisition(&mut self, reader: S::Reader) {
        let stop = Arc::new(Notify::new());
        let acquisition = AcquisitionLoop {
            source: Arc::clone(&self.source),
            endpoint: self.endpoint.clone(),
            poll_interval: self.config.poll_interval(),
            reconnect_delay: self.config.reconnect_delay(),
            buffer: Arc::clone(&self.buffer),
            stats: Arc::clone(&self.stats),
            hub: Arc::clone(&self.hub),
            stop: Arc::clone(&stop),
        };
        let join = tokio::spawn(acquisition.run(reader));
        self.acquisition = Some(Acquisition { stop, join });
    }

    async fn halt_acquisition(&mut self) {
        if let Some(Acquisition { stop, join }) = self.acquisition.take() {
            stop.notify_one();
            if let Err(err) = join.await {
                warn!("Acquisition task ended abnormally: {}", err);
            }
        }
    }
}

impl<S, H> Drop for SessionController<S, H>
where
    S: StreamSource,
    H: EventHub,
{
    fn drop(&mut self) {
        if let Some(acquisition) = &self.acquisition {
            acquisition.stop.notify_one();
        }
    }
}

/// Pulls frames into the buffer until told to stop, reconnecting when the
/// remote end closes the stream.
struct AcquisitionLoop<S, H> {
    source: Arc<S>,
    endpoint: Endpoint,
    poll_interval: Duration,
    reconnect_delay: Duration,
    buffer: Arc<FrameBuffer>,
    stats: Arc<AcquisitionStats>,
    hub: Arc<H>,
    stop: Arc<Notify>,
}

impl<S, H> AcquisitionLoop<S, H>
where
    S: StreamSource,
    H: EventHub,
{
    async fn run(self, mut reader: S::Reader) {
        debug!("acquisition loop started for {}", self.endpoint);
        loop {
            let read = tokio::select! {
                biased;
                _ = self.stop.notified() => break,
                read = reader.read_frame() => read,
            };
            match read {
                Ok(frame) => self.publish(frame),
                Err(ReadError::NoFrame(reason)) => {
                    AcquisitionStats::bump(&self.stats.transient_failures);
                    debug!("transient read failure: {}", reason);
                }
                Err(ReadError::Closed) => {
                    warn!("Stream at {} closed; reconnecting", self.endpoint);
                    self.hub.publish(SystemEvent::warning(
                        WarningKind::ConnectionLost,
                        format!("stream at {} closed", self.endpoint),
                    ));
                    reader.close().await;
                    match self.reconnect().await {
                        Some(fresh) => reader = fresh,
                        None => return,
                    }
                    continue;
                }
            }
            tokio::select! {
                biased;
                _ = self.stop.notified() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        reader.close().await;
        debug!("acquisition loop for {} finished", self.endpoint);
    }

    fn publish(&self, frame: Frame) {
        match self.buffer.publish(frame) {
            ResolutionCheck::Unchanged => {}
            ResolutionCheck::Captured(native) => {
                info!("Native resolution {}", native);
            }
            ResolutionCheck::Changed {
                expected,
                actual,
                cleared,
            } => {
                AcquisitionStats::bump(&self.stats.resolution_resets);
                let err = SpectroError::ResolutionMismatch { expected, actual };
                warn!("{}; ROI reset", err);
                self.hub
                    .publish(SystemEvent::warning(WarningKind::ResolutionMismatch, err.to_string()));
                if cleared.is_some() {
                    self.hub
                        .publish(SystemEvent::new(EventPayload::Roi(RoiEvent { roi: None })));
                }
            }
        }
        AcquisitionStats::bump(&self.stats.frames_published);
    }

    /// Retry `connect` every `reconnect_delay` until it succeeds. Returns
    /// `None` if stopped first.
    async fn reconnect(&self) -> Option<S::Reader> {
        let mut attempt = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => return None,
                _ = sleep(self.reconnect_delay) => {}
            }
            attempt += 1;
            let connected = tokio::select! {
                biased;
                _ = self.stop.notified() => return None,
                connected = self.source.connect(&self.endpoint) => connected,
            };
            match connected {
                Ok(reader) => {
                    AcquisitionStats::bump(&self.stats.reconnects);
                    info!("Reconnected to {} after {} attempt(s)", self.endpoint, attempt);
                    self.hub.publish(SystemEvent::warning(
                        WarningKind::Reconnected,
                        format!("reconnected after {attempt} attempt(s)"),
                    ));
                    return Some(reader);
                }
                Err(err) => warn!("Reconnect attempt {} failed: {}", attempt, err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use spectro_network::LocalHub;
    use spectro_stream::{MockSource, Pattern};
    use spectro_types::{events::EventKind, roi::CanvasPoint, ConnectError};
    use std::{
        sync::{atomic::AtomicBool, Mutex},
        time::Instant,
    };
    use tokio::time::timeout;

    type Script = Arc<dyn Fn(u64) -> std::result::Result<Frame, ReadError> + Send + Sync>;

    /// Source whose readers replay `script(n)` for the n-th read of each
    /// connection.
    struct ScriptedSource {
        script: Script,
        connects: Arc<AtomicU64>,
    }

    struct ScriptedReader {
        script: Script,
        reads: u64,
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        type Reader = ScriptedReader;

        async fn connect(
            &self,
            _endpoint: &Endpoint,
        ) -> std::result::Result<ScriptedReader, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedReader {
                script: Arc::clone(&self.script),
                reads: 0,
            })
        }
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn read_frame(&mut self) -> std::result::Result<Frame, ReadError> {
            sleep(Duration::from_millis(1)).await;
            self.reads += 1;
            (self.script)(self.reads)
        }

        async fn close(&mut self) {}
    }

    fn stream_config() -> StreamConfig {
        StreamConfig {
            url: "http://127.0.0.1:81/stream".into(),
            poll_interval_ms: 1,
            reconnect_delay_ms: 5,
            ..StreamConfig::default()
        }
    }

    fn mock_session(
        resolution: Resolution,
        pattern: Pattern,
    ) -> (SessionController<MockSource, LocalHub>, Arc<LocalHub>) {
        let hub = Arc::new(LocalHub::new(256));
        let source = MockSource::new(resolution, pattern).with_frame_interval(Duration::from_millis(1));
        let session = SessionController::new(stream_config(), source, Arc::clone(&hub)).unwrap();
        (session, hub)
    }

    fn scripted_session(
        script: Script,
    ) -> (
        SessionController<ScriptedSource, LocalHub>,
        Arc<LocalHub>,
        Arc<AtomicU64>,
    ) {
        let hub = Arc::new(LocalHub::new(256));
        let connects = Arc::new(AtomicU64::new(0));
        let source = ScriptedSource {
            script,
            connects: Arc::clone(&connects),
        };
        let session = SessionController::new(stream_config(), source, Arc::clone(&hub)).unwrap();
        (session, hub, connects)
    }

    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            sleep(Duration::from_millis(2)).await;
        }
    }

    fn canvas_corners(canvas: CanvasSize) -> CanvasRect {
        CanvasRect::new(
            CanvasPoint::new(0, 0),
            CanvasPoint::new(canvas.width as i32, canvas.height as i32),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_device_reports_connectivity_and_stays_idle() {
        let hub = Arc::new(LocalHub::new(16));
        let mut events = hub.subscribe();
        let mut session =
            SessionController::new(stream_config(), MockSource::unreachable(), Arc::clone(&hub))
                .unwrap();

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SpectroError::Connectivity { .. }), "{err}");
        assert!(err.is_retriable());
        assert_eq!(session.state(), SessionState::Idle);

        let kinds: Vec<EventKind> = vec![
            events.next().await.unwrap().kind,
            events.next().await.unwrap().kind,
            events.next().await.unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![EventKind::Lifecycle, EventKind::Warning, EventKind::Lifecycle]
        );
        // Still restartable after the failure.
        assert!(session.start().await.is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn uniform_gray_stream_reduces_to_constant_profile() {
        let (mut session, _hub) = mock_session(Resolution::new(64, 16), Pattern::Uniform([128; 3]));
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let seen: Arc<Mutex<Option<Arc<SpectrumProfile>>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        session
            .open_view("intensity", Duration::from_millis(5), move |profile| {
                *slot.lock().unwrap() = Some(profile);
            })
            .unwrap();

        wait_for("50 frames", || session.metrics().frames_published >= 50).await;
        wait_for("a view firing", || seen.lock().unwrap().is_some()).await;

        let profile = seen.lock().unwrap().clone().unwrap();
        assert_eq!(profile.gray.len(), 64);
        assert!(profile.gray.iter().all(|v| (*v - 128.0).abs() < 1e-9));
        assert!(profile.combined.iter().all(|v| (*v - 128.0).abs() < 1e-9));

        let latest = session.latest_profile().unwrap();
        assert!(latest.gray.iter().all(|v| (*v - 128.0).abs() < 1e-9));
        assert_eq!(session.metrics().native_resolution, Some(Resolution::new(64, 16)));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_frame_roi_matches_unclipped_profile() {
        let (mut session, _hub) = mock_session(Resolution::new(48, 24), Pattern::Spectrum);
        session.start().await.unwrap();
        wait_for("first frame", || session.latest_frame().is_some()).await;
        let unclipped = session.latest_profile().unwrap();

        assert!(session.stop().await);
        assert!(session.latest_frame().is_none());
        let canvas = CanvasSize::new(96, 48);
        let roi = session.select_roi(canvas_corners(canvas), canvas).unwrap();
        assert_eq!(roi, Roi::full(Resolution::new(48, 24)).unwrap());

        session.start().await.unwrap();
        wait_for("cropped frame", || session.latest_frame().is_some()).await;
        let clipped = session.latest_profile().unwrap();
        assert_eq!(clipped.gray, unclipped.gray);
        assert_eq!(clipped.red, unclipped.red);
        assert_eq!(clipped.combined, unclipped.combined);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn roi_is_editable_only_while_not_streaming() {
        let (mut session, hub) = mock_session(Resolution::new(40, 20), Pattern::Spectrum);
        let canvas = CanvasSize::new(40, 20);
        let half = CanvasRect::new(CanvasPoint::new(0, 0), CanvasPoint::new(20, 10));

        // No frame yet: nothing to map onto.
        assert!(matches!(
            session.select_roi(half, canvas),
            Err(SpectroError::InvalidRoi(_))
        ));

        session.start().await.unwrap();
        wait_for("first frame", || session.latest_frame().is_some()).await;
        assert!(matches!(
            session.select_roi(half, canvas),
            Err(SpectroError::Session(_))
        ));

        session.stop().await;
        let mut events = hub.subscribe();
        let roi = session.select_roi(half, canvas).unwrap();
        assert_eq!((roi.width(), roi.height()), (20, 10));
        assert_eq!(events.next().await.unwrap().kind, EventKind::Roi);

        // Degenerate drag keeps the previous ROI.
        let line = CanvasRect::new(CanvasPoint::new(5, 5), CanvasPoint::new(5, 15));
        assert!(session.select_roi(line, canvas).is_err());
        assert_eq!(session.active_roi(), Some(roi));

        session.start().await.unwrap();
        wait_for("cropped frame", || session.latest_frame().is_some()).await;
        let frame = session.capture_current_frame().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(20, 10));

        assert_eq!(session.reset_roi(), Some(roi));
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_views_stop_firing_after_stop() {
        let (mut session, _hub) = mock_session(Resolution::new(16, 8), Pattern::Uniform([10; 3]));
        assert!(session
            .open_view("early", Duration::from_millis(5), |_| {})
            .is_err());

        session.start().await.unwrap();
        let count = Arc::new(AtomicU64::new(0));
        for name in ["histogram", "intensity"] {
            let count = Arc::clone(&count);
            session
                .open_view(name, Duration::from_millis(2), move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        wait_for("views firing", || count.load(Ordering::SeqCst) >= 6).await;
        assert_eq!(session.active_views(), 2);

        assert_eq!(session.cancel_views(), 2);
        assert!(session.stop().await);
        let frozen = count.load(Ordering::SeqCst);
        sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.stop().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_cancels_views_and_restart_is_clean() {
        let (mut session, _hub) = mock_session(Resolution::new(16, 8), Pattern::Uniform([10; 3]));
        session.start().await.unwrap();
        assert!(session.start().await.is_err());

        let count = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&count);
        let handle = session
            .open_view("histogram", Duration::from_millis(2), move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        wait_for("view firing", || count.load(Ordering::SeqCst) >= 2).await;

        session.stop().await;
        assert!(handle.is_cancelled());
        let frozen = count.load(Ordering::SeqCst);

        session.start().await.unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert_eq!(session.state(), SessionState::Streaming);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_is_idempotent() {
        let (mut session, hub) = mock_session(Resolution::new(8, 8), Pattern::Uniform([1; 3]));
        session.start().await.unwrap();
        let count = Arc::new(AtomicU64::new(0));
        let inner = Arc::clone(&count);
        session
            .open_view("intensity", Duration::from_millis(2), move |_| {
                inner.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Idle);
        let frozen = count.load(Ordering::SeqCst);

        let mut events = hub.subscribe();
        session.shutdown().await;
        assert!(timeout(Duration::from_millis(30), events.next()).await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), frozen);
        assert!(matches!(session.start().await, Err(SpectroError::Session(_))));
        assert!(session.latest_frame().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transient_read_failures_are_tolerated() {
        let (mut session, _hub, _) = scripted_session(Arc::new(|n| {
            if n % 2 == 0 {
                Err(ReadError::NoFrame("corrupt part".into()))
            } else {
                Ok(Frame::filled(8, 4, [50, 60, 70]))
            }
        }));
        session.start().await.unwrap();
        wait_for("mixed reads", || {
            let metrics = session.metrics();
            metrics.frames_published >= 5 && metrics.transient_failures >= 5
        })
        .await;
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.metrics().reconnects, 0);
        session.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closed_stream_triggers_reconnect() {
        let (mut session, hub, connects) = scripted_session(Arc::new(|n| {
            if n > 3 {
                Err(ReadError::Closed)
            } else {
                Ok(Frame::filled(8, 4, [1, 2, 3]))
            }
        }));
        let mut events = hub.subscribe();
        session.start().await.unwrap();
        wait_for("two reconnects", || session.metrics().reconnects >= 2).await;
        assert!(connects.load(Ordering::SeqCst) >= 3);
        assert_eq!(session.state(), SessionState::Streaming);
        session.shutdown().await;

        let mut warnings = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(20), events.next()).await {
            if let EventPayload::Warning(warning) = event.payload {
                warnings.push(warning.kind);
            }
        }
        assert!(warnings.contains(&WarningKind::ConnectionLost));
        assert!(warnings.contains(&WarningKind::Reconnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resolution_change_resets_roi_and_keeps_streaming() {
        let switched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&switched);
        let (mut session, hub, _) = scripted_session(Arc::new(move |_| {
            if flag.load(Ordering::SeqCst) {
                Ok(Frame::filled(16, 4, [9, 9, 9]))
            } else {
                Ok(Frame::filled(8, 4, [9, 9, 9]))
            }
        }));

        session.start().await.unwrap();
        wait_for("first frame", || session.latest_frame().is_some()).await;
        session.stop().await;
        let roi = Roi::new(0, 0, 4, 4, Resolution::new(8, 4)).unwrap();
        session.set_roi(roi).unwrap();

        session.start().await.unwrap();
        wait_for("cropped frame", || {
            session.latest_frame().map(|f| f.width()) == Some(4)
        })
        .await;

        let mut events = hub.subscribe();
        switched.store(true, Ordering::SeqCst);
        wait_for("resolution reset", || session.metrics().resolution_resets == 1).await;
        assert_eq!(session.active_roi(), None);
        wait_for("full new frame", || {
            session.latest_frame().map(|f| f.width()) == Some(16)
        })
        .await;
        assert_eq!(session.native_resolution(), Some(Resolution::new(16, 4)));
        assert_eq!(session.state(), SessionState::Streaming);

        let mut saw_mismatch = false;
        while let Ok(Some(event)) = timeout(Duration::from_millis(20), events.next()).await {
            if let EventPayload::Warning(warning) = event.payload {
                saw_mismatch |= warning.kind == WarningKind::ResolutionMismatch;
            }
        }
        assert!(saw_mismatch);
        session.shutdown().await;
    }
}
