//! Frame model
//!
//! A [`Frame`] is a closed sum over the four things an engine can hand back
//! from a capture: video, audio, metadata and session status changes. Typed
//! pulls filter on [`FrameKind`]; the generic pull returns the enum as is.

pub mod audio;
pub mod format;
pub mod video;

pub use audio::AudioFrame;
pub use format::{AudioFormat, Bandwidth, ColorFormat, FourCC, FrameFieldType};
pub use video::VideoFrame;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::StatusCode;

/// PTP-style timestamp: whole seconds plus a nanosecond component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            seconds: now.timestamp(),
            nanos: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_nanos(total: i128) -> Self {
        Self {
            seconds: total.div_euclid(1_000_000_000) as i64,
            nanos: total.rem_euclid(1_000_000_000) as u32,
        }
    }

    pub fn as_nanos(&self) -> i128 {
        self.seconds as i128 * 1_000_000_000 + self.nanos as i128
    }
}

/// Opaque metadata payload, usually an XML fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFrame {
    pub data: String,
    pub timestamp: Timestamp,
    /// Timecode in 100ns units
    pub timecode: i64,
}

impl MetadataFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            timestamp: Timestamp::now(),
            timecode: 0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        // Payload crosses the engine boundary as a C string
        if self.data.contains('\0') {
            return Err("metadata payload contains a NUL byte".to_string());
        }
        Ok(())
    }
}

/// Engine or session state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub code: StatusCode,
    pub description: String,
}

impl StatusChange {
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Variant tag of a [`Frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Video,
    Audio,
    Metadata,
    StatusChange,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Video => "video",
            FrameKind::Audio => "audio",
            FrameKind::Metadata => "metadata",
            FrameKind::StatusChange => "status",
        };
        f.write_str(name)
    }
}

/// One unit of media or control data
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
    Metadata(MetadataFrame),
    StatusChange(StatusChange),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Video(_) => FrameKind::Video,
            Frame::Audio(_) => FrameKind::Audio,
            Frame::Metadata(_) => FrameKind::Metadata,
            Frame::StatusChange(_) => FrameKind::StatusChange,
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Frame::Video(v) => Some(v.timestamp),
            Frame::Audio(a) => Some(a.timestamp),
            Frame::Metadata(m) => Some(m.timestamp),
            Frame::StatusChange(_) => None,
        }
    }

    /// Check the variant's fields against its buffer
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Frame::Video(v) => v.validate(),
            Frame::Audio(a) => a.validate(),
            Frame::Metadata(m) => m.validate(),
            Frame::StatusChange(_) => Ok(()),
        }
    }

    pub fn into_video(self) -> Option<VideoFrame> {
        match self {
            Frame::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_audio(self) -> Option<AudioFrame> {
        match self {
            Frame::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_metadata(self) -> Option<MetadataFrame> {
        match self {
            Frame::Metadata(m) => Some(m),
            _ => None,
        }
    }
}

impl From<VideoFrame> for Frame {
    fn from(frame: VideoFrame) -> Self {
        Frame::Video(frame)
    }
}

impl From<AudioFrame> for Frame {
    fn from(frame: AudioFrame) -> Self {
        Frame::Audio(frame)
    }
}

impl From<MetadataFrame> for Frame {
    fn from(frame: MetadataFrame) -> Self {
        Frame::Metadata(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_nanos() {
        let ts = Timestamp::from_nanos(1_500_000_000);
        assert_eq!(ts, Timestamp::new(1, 500_000_000));
        assert_eq!(ts.as_nanos(), 1_500_000_000);

        let before_epoch = Timestamp::from_nanos(-1);
        assert_eq!(before_epoch, Timestamp::new(-1, 999_999_999));
        assert!(before_epoch < Timestamp::default());
    }

    #[test]
    fn test_frame_kind_and_conversion() {
        let frame: Frame = MetadataFrame::new("<ndi_tally on_program=\"true\"/>").into();
        assert_eq!(frame.kind(), FrameKind::Metadata);
        assert!(frame.validate().is_ok());
        assert!(frame.clone().into_video().is_none());
        assert!(frame.into_metadata().is_some());
    }

    #[test]
    fn test_metadata_rejects_nul() {
        let frame = MetadataFrame::new("bad\0payload");
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_status_has_no_timestamp() {
        let frame = Frame::StatusChange(StatusChange::new(StatusCode::Connected, "up"));
        assert_eq!(frame.kind(), FrameKind::StatusChange);
        assert!(frame.timestamp().is_none());
    }
}
