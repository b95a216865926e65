//! Camera stream sources and the reachability probe.

mod endpoint;
mod mjpeg;

use std::time::Duration;

use async_trait::async_trait;
use spectro_types::{
    frame::{Frame, Resolution},
    ConnectError, ReadError,
};
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, info};

pub use endpoint::Endpoint;
pub use mjpeg::{MjpegReader, MjpegSource};

/// Something that can open a frame stream at an endpoint.
#[async_trait]
pub trait StreamSource: Send + Sync + 'static {
    type Reader: FrameReader;

    /// Probe the endpoint, then open the stream.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Reader, ConnectError>;
}

/// An open stream handle.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Pull the next decoded frame. `NoFrame` is transient; keep polling.
    async fn read_frame(&mut self) -> Result<Frame, ReadError>;

    /// Release the connection. Safe to call repeatedly.
    async fn close(&mut self);
}

/// TCP reachability check run before any stream open attempt.
pub async fn probe(endpoint: &Endpoint, limit: Duration) -> Result<(), ConnectError> {
    let unreachable = |reason: String| ConnectError::Unreachable {
        endpoint: endpoint.authority(),
        reason,
    };
    match timeout(limit, TcpStream::connect(endpoint.authority())).await {
        Ok(Ok(_stream)) => {
            debug!("probe ok: {}", endpoint.authority());
            Ok(())
        }
        Ok(Err(err)) => Err(unreachable(err.to_string())),
        Err(_) => Err(unreachable(format!(
            "no answer within {}ms",
            limit.as_millis()
        ))),
    }
}

/// Test pattern produced by [`MockSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Uniform([u8; 3]),
    /// Rainbow band across the middle third of the frame on a dark background.
    Spectrum,
}

/// Synthetic camera used for demos and integration tests.
#[derive(Debug, Clone)]
pub struct MockSource {
    resolution: Resolution,
    pattern: Pattern,
    reachable: bool,
    frame_interval: Duration,
}

impl MockSource {
    pub fn new(resolution: Resolution, pattern: Pattern) -> Self {
        Self {
            resolution,
            pattern,
            reachable: true,
            frame_interval: Duration::from_millis(5),
        }
    }

    /// A source whose probe always fails.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new(Resolution::new(0, 0), Pattern::Uniform([0, 0, 0]))
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

#[async_trait]
impl StreamSource for MockSource {
    type Reader = MockReader;

    async fn connect(&self, endpoint: &Endpoint) -> Result<MockReader, ConnectError> {
        if !self.reachable {
            return Err(ConnectError::Unreachable {
                endpoint: endpoint.authority(),
                reason: "mock device offline".into(),
            });
        }
        info!(
            "Connecting to mock camera at {} ({})",
            endpoint, self.resolution
        );
        Ok(MockReader {
            template: Some(render_pattern(self.resolution, self.pattern)),
            frame_interval: self.frame_interval,
            sequence: 0,
        })
    }
}

pub struct MockReader {
    template: Option<Frame>,
    frame_interval: Duration,
    sequence: u64,
}

#[async_trait]
impl FrameReader for MockReader {
    async fn read_frame(&mut self) -> Result<Frame, ReadError> {
        let Some(template) = &self.template else {
            return Err(ReadError::Closed);
        };
        tokio::time::sleep(self.frame_interval).await;
        self.sequence += 1;
        Ok(template.clone().with_sequence(self.sequence))
    }

    async fn close(&mut self) {
        self.template = None;
    }
}

fn render_pattern(resolution: Resolution, pattern: Pattern) -> Frame {
    let Resolution { width, height } = resolution;
    match pattern {
        Pattern::Uniform(rgb) => Frame::filled(width, height, rgb),
        Pattern::Spectrum => {
            let band = (height / 3)..(height - height / 3);
            let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
            for y in 0..height {
                for x in 0..width {
                    if band.contains(&y) {
                        pixels.extend_from_slice(&hue_to_rgb(x as f64 / width.max(1) as f64));
                    } else {
                        pixels.extend_from_slice(&[8, 8, 8]);
                    }
                }
            }
            // Length always matches width * height * 3.
            Frame::from_rgb(width, height, pixels)
                .unwrap_or_else(|_| Frame::filled(width, height, [0, 0, 0]))
        }
    }
}

/// Violet-to-red sweep for `position` in `[0, 1)`.
fn hue_to_rgb(position: f64) -> [u8; 3] {
    let hue = (1.0 - position.clamp(0.0, 1.0)) * 270.0;
    let sector = hue / 60.0;
    let fraction = sector - sector.floor();
    let rising = (fraction * 255.0) as u8;
    let falling = 255 - rising;
    match sector as u32 {
        0 => [255, rising, 0],
        1 => [falling, 255, 0],
        2 => [0, 255, rising],
        3 => [0, falling, 255],
        _ => [rising, 0, 255],
    }
}
