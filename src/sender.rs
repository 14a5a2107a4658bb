//! Sender session

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SenderOptions;
use crate::engine::{Engine, EngineSender, SenderSpec};
use crate::error::{Error, Result};
use crate::frame::{AudioFrame, MetadataFrame, VideoFrame};
use crate::protocol::Source;

/// Counters since the sender opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub metadata_frames: u64,
    /// Pushes refused because the frame was malformed
    pub rejected: u64,
}

/// An advertised source that frames are pushed into
pub struct Sender {
    options: SenderOptions,
    source: Source,
    handle: Arc<dyn EngineSender>,
    closed: AtomicBool,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    metadata_frames: AtomicU64,
    rejected: AtomicU64,
}

impl Sender {
    /// Start advertising `options.name`
    pub fn open(engine: &dyn Engine, options: SenderOptions) -> Result<Self> {
        options.validate()?;
        let spec = SenderSpec {
            name: options.name.clone(),
            groups: options.groups.as_ref().and_then(|groups| groups.normalize()),
            clock_video: options.clock_video,
            clock_audio: options.clock_audio,
        };
        let handle: Arc<dyn EngineSender> = Arc::from(engine.open_sender(&spec)?);
        let source = handle.source();
        info!(
            source = %source,
            groups = ?spec.groups,
            clock_video = spec.clock_video,
            clock_audio = spec.clock_audio,
            "Sender opened"
        );
        Ok(Self {
            options,
            source,
            handle,
            closed: AtomicBool::new(false),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            metadata_frames: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Transmit a video frame. With video clocking on, completes when the
    /// engine's clock releases the frame.
    pub async fn push_video(&self, frame: VideoFrame) -> Result<()> {
        self.check(frame.validate())?;
        let handle = self.handle.clone();
        self.run(move || handle.send_video(&frame)).await?;
        self.video_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Transmit an audio frame. With audio clocking on, completes when the
    /// engine's clock releases the frame.
    pub async fn push_audio(&self, frame: AudioFrame) -> Result<()> {
        self.check(frame.validate())?;
        let handle = self.handle.clone();
        self.run(move || handle.send_audio(&frame)).await?;
        self.audio_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn push_metadata(&self, frame: MetadataFrame) -> Result<()> {
        self.check(frame.validate())?;
        let handle = self.handle.clone();
        self.run(move || handle.send_metadata(&frame)).await?;
        self.metadata_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn check(&self, validation: std::result::Result<(), String>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        validation.map_err(|reason| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(source = %self.source.name, %reason, "Rejected frame");
            Error::MalformedFrame(reason)
        })
    }

    async fn run<F>(&self, send: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), crate::error::EngineError> + Send + 'static,
    {
        tokio::task::spawn_blocking(send).await?.map_err(Error::from)
    }

    /// Receivers currently connected to this source
    pub fn connections(&self) -> usize {
        self.handle.connections()
    }

    /// The source as other finders see it
    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn options(&self) -> &SenderOptions {
        &self.options
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            metadata_frames: self.metadata_frames.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop advertising. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handle.close();
        debug!(stats = ?self.stats(), "Sender statistics");
        info!(source = %self.source.name, "Sender closed");
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(source = %self.source.name, "Sender dropped without close");
            self.close();
        }
    }
}
