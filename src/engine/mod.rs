//! Engine facade
//!
//! The engine owns the network transport and codecs. This crate only drives
//! it through the traits below; [`loopback`] provides an in-process
//! implementation.

pub mod clock;
pub mod convert;
pub mod loopback;
pub mod queue;

pub use loopback::{LoopbackEngine, LoopbackHost, LoopbackNetwork};

use std::time::Duration;

use crate::config::{AudioPullOptions, DiscoveryFilter};
use crate::error::EngineError;
use crate::frame::{AudioFrame, Bandwidth, ColorFormat, Frame, MetadataFrame, VideoFrame};
use crate::protocol::{Capabilities, DiscoveryEvent, Source};

/// Everything the engine needs to open a receiver
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverSpec {
    pub source: Source,
    pub color_format: ColorFormat,
    pub bandwidth: Bandwidth,
    pub allow_video_fields: bool,
    pub name: Option<String>,
    pub queue_depth: usize,
}

/// Everything the engine needs to open a sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSpec {
    pub name: String,
    pub groups: Option<String>,
    pub clock_video: bool,
    pub clock_audio: bool,
}

/// Entry point into a media engine
pub trait Engine: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Start a discovery subscription
    fn discover(&self, filter: &DiscoveryFilter) -> Result<Box<dyn Discovery>, EngineError>;

    fn open_receiver(&self, spec: &ReceiverSpec) -> Result<Box<dyn EngineReceiver>, EngineError>;

    fn open_sender(&self, spec: &SenderSpec) -> Result<Box<dyn EngineSender>, EngineError>;
}

/// A running discovery subscription
pub trait Discovery: Send + Sync {
    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing happened in time; `Err(EngineError::Closed)`
    /// means the subscription has ended.
    fn next_event(&self, timeout: Duration) -> Result<Option<DiscoveryEvent>, EngineError>;

    /// Stop the subscription. Idempotent.
    fn close(&self);
}

/// Engine-side receiver handle
pub trait EngineReceiver: Send + Sync {
    /// Wait up to `timeout` for the next frame, converting audio to `audio`.
    /// `Ok(None)` on timeout.
    fn capture(&self, timeout: Duration, audio: &AudioPullOptions) -> Result<Option<Frame>, EngineError>;

    /// Release the handle; blocked captures return `EngineError::Closed`
    fn close(&self);
}

/// Engine-side sender handle
pub trait EngineSender: Send + Sync {
    /// The source this sender advertises
    fn source(&self) -> Source;

    /// Transmit a video frame, blocking for pacing when video clocking is on
    fn send_video(&self, frame: &VideoFrame) -> Result<(), EngineError>;

    /// Transmit an audio frame, blocking for pacing when audio clocking is on
    fn send_audio(&self, frame: &AudioFrame) -> Result<(), EngineError>;

    fn send_metadata(&self, frame: &MetadataFrame) -> Result<(), EngineError>;

    /// Number of receivers currently connected
    fn connections(&self) -> usize;

    /// Stop advertising. Idempotent.
    fn close(&self);
}
