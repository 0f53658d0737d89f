//! Screen streaming pipeline
//!
//! One pipeline per peer connection. Each cycle paces itself to the target
//! frame interval with a cooperative sleep, captures a screenshot with a
//! bounded timeout, and writes the frame to the outbound track. Capture
//! failures produce a synthesized placeholder frame instead of a stall, and
//! the presentation clock advances on every emitted frame (error frames
//! included), so track timestamps are always monotonically increasing.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use periscope_core::engine::{PageHandle, Viewport};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Video presentation clock rate (standard 90 kHz RTP clock)
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// One outbound screen frame
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// Encoded frame payload
    pub data: Bytes,
    /// Presentation timestamp in 90 kHz units (wraps at u32)
    pub pts: u32,
    /// Nominal frame duration
    pub duration: Duration,
}

/// Monotonic presentation clock in 90 kHz units
///
/// Wraparound at `u32::MAX` is intentional; RTP timestamps are modular.
#[derive(Debug, Default)]
pub struct FrameClock {
    pts: u32,
}

impl FrameClock {
    /// Create a clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one frame interval and return the timestamp for the frame
    pub fn tick(&mut self, interval: Duration) -> u32 {
        let pts = self.pts;
        let step = (interval.as_secs_f64() * VIDEO_CLOCK_RATE as f64) as u32;
        self.pts = self.pts.wrapping_add(step.max(1));
        pts
    }
}

/// Destination a pipeline writes frames to
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Write one frame; an error stops the pipeline
    async fn send_frame(&self, frame: StreamFrame) -> Result<()>;
}

/// Production sink: writes frames to a WebRTC sample track
pub struct TrackFrameSink {
    track: Arc<TrackLocalStaticSample>,
}

impl TrackFrameSink {
    /// Wrap an outbound sample track
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl FrameSink for TrackFrameSink {
    async fn send_frame(&self, frame: StreamFrame) -> Result<()> {
        let sample = Sample {
            data: frame.data,
            duration: frame.duration,
            timestamp: SystemTime::now(),
            packet_timestamp: frame.pts,
            ..Default::default()
        };
        self.track
            .write_sample(&sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("failed to write sample: {e}")))
    }
}

/// Synthesize the placeholder frame emitted when capture fails: a solid red
/// field with a darker banner strip where the client overlays its error UI.
pub fn error_frame(viewport: Viewport) -> Bytes {
    let banner_height = (viewport.height / 12).max(1);
    let mut img = image::RgbImage::from_pixel(
        viewport.width.max(1),
        viewport.height.max(1),
        image::Rgb([200, 16, 16]),
    );
    for y in 0..banner_height.min(img.height()) {
        for x in 0..img.width() {
            img.put_pixel(x, y, image::Rgb([64, 0, 0]));
        }
    }

    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("in-memory png encode");
    Bytes::from(out.into_inner())
}

/// Continuous capture loop bound to one peer connection
pub struct StreamPipeline<S: FrameSink> {
    page: Arc<dyn PageHandle>,
    sink: S,
    viewport: Viewport,
    frame_interval: Duration,
    screenshot_timeout: Duration,
    clock: FrameClock,
    last_frame: Option<Instant>,
}

impl<S: FrameSink> StreamPipeline<S> {
    /// Create a pipeline streaming `page` into `sink`
    pub fn new(
        page: Arc<dyn PageHandle>,
        sink: S,
        viewport: Viewport,
        frame_interval: Duration,
        screenshot_timeout: Duration,
    ) -> Self {
        Self {
            page,
            sink,
            viewport,
            frame_interval,
            screenshot_timeout,
            clock: FrameClock::new(),
            last_frame: None,
        }
    }

    /// Run until the sink reports a closed transport.
    ///
    /// Cooperative: both the pacing sleep and the capture timeout suspend
    /// this task only, never the worker thread.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.frame_interval.as_millis() as u64,
            "stream pipeline started"
        );
        loop {
            self.pace().await;
            let frame = self.next_frame().await;
            if let Err(e) = self.sink.send_frame(frame).await {
                info!("stream pipeline stopping: {e}");
                break;
            }
        }
    }

    /// Produce one frame: a capture, or a placeholder if capture fails
    pub async fn next_frame(&mut self) -> StreamFrame {
        let pts = self.clock.tick(self.frame_interval);
        let data = match tokio::time::timeout(self.screenshot_timeout, self.page.screenshot()).await
        {
            Ok(Ok(png)) => png,
            Ok(Err(e)) => {
                warn!("screenshot failed, emitting placeholder: {e}");
                error_frame(self.viewport)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.screenshot_timeout.as_millis() as u64,
                    "screenshot timed out, emitting placeholder"
                );
                error_frame(self.viewport)
            }
        };

        StreamFrame {
            data,
            pts,
            duration: self.frame_interval,
        }
    }

    /// Suspend for the remainder of the frame interval
    async fn pace(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                tokio::time::sleep(self.frame_interval - elapsed).await;
            }
        }
        self.last_frame = Some(Instant::now());
        debug!("frame cycle");
    }
}
