//! Video frames and signed-stride row addressing

use bytes::Bytes;
use std::time::Duration;

use super::format::{FourCC, FrameFieldType};
use super::Timestamp;

/// One video frame, owning its pixel buffer
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub xres: u32,
    pub yres: u32,
    pub frame_rate_n: u32,
    pub frame_rate_d: u32,
    pub fourcc: FourCC,
    pub picture_aspect_ratio: f32,
    pub frame_format_type: FrameFieldType,
    pub timestamp: Timestamp,
    /// Timecode in 100ns units
    pub timecode: i64,
    /// Bytes between the starts of consecutive rows. Negative for bottom-up
    /// buffers, in which case the logical top row is the last row in memory.
    pub line_stride: i32,
    pub metadata: Option<String>,
    pub data: Bytes,
}

impl VideoFrame {
    /// Create a progressive 30fps frame with the natural stride for `fourcc`
    pub fn new(xres: u32, yres: u32, fourcc: FourCC, data: impl Into<Bytes>) -> Self {
        let line_stride = fourcc.line_stride(xres) as i32;
        Self {
            xres,
            yres,
            frame_rate_n: 30,
            frame_rate_d: 1,
            fourcc,
            picture_aspect_ratio: if yres > 0 { xres as f32 / yres as f32 } else { 0.0 },
            frame_format_type: FrameFieldType::Progressive,
            timestamp: Timestamp::now(),
            timecode: 0,
            line_stride,
            metadata: None,
            data: data.into(),
        }
    }

    /// Allocate a zero-filled frame
    pub fn blank(xres: u32, yres: u32, fourcc: FourCC) -> Self {
        let len = fourcc.buffer_len(xres, yres, fourcc.line_stride(xres));
        Self::new(xres, yres, fourcc, vec![0u8; len])
    }

    pub fn with_frame_rate(mut self, numerator: u32, denominator: u32) -> Self {
        self.frame_rate_n = numerator;
        self.frame_rate_d = denominator;
        self
    }

    pub fn with_format_type(mut self, format_type: FrameFieldType) -> Self {
        self.frame_format_type = format_type;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_timecode(mut self, timecode: i64) -> Self {
        self.timecode = timecode;
        self
    }

    pub fn with_line_stride(mut self, line_stride: i32) -> Self {
        self.line_stride = line_stride;
        self
    }

    /// Frames per second
    pub fn frame_rate(&self) -> f64 {
        if self.frame_rate_d == 0 {
            0.0
        } else {
            self.frame_rate_n as f64 / self.frame_rate_d as f64
        }
    }

    /// Wall-clock duration of one frame at the declared rate
    pub fn duration(&self) -> Option<Duration> {
        if self.frame_rate_n == 0 || self.frame_rate_d == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            self.frame_rate_d as u64 * 1_000_000_000 / self.frame_rate_n as u64,
        ))
    }

    pub fn is_flipped(&self) -> bool {
        self.line_stride < 0
    }

    pub fn stride_bytes(&self) -> usize {
        self.line_stride.unsigned_abs() as usize
    }

    /// Scan line `y` of the first plane.
    ///
    /// Addressed as `origin + y * line_stride`, where the origin is the first
    /// memory row for positive strides and the last one for negative strides.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.yres {
            return None;
        }
        let stride = self.stride_bytes();
        let memory_row = if self.line_stride >= 0 {
            y as usize
        } else {
            (self.yres - 1 - y) as usize
        };
        let start = memory_row * stride;
        self.data.get(start..start + stride)
    }

    /// Buffer length implied by the frame geometry
    pub fn required_len(&self) -> usize {
        self.fourcc.buffer_len(self.xres, self.yres, self.stride_bytes())
    }

    /// Check that the declared geometry fits the owned buffer
    pub fn validate(&self) -> Result<(), String> {
        if self.xres == 0 || self.yres == 0 {
            return Err(format!("video resolution {}x{}", self.xres, self.yres));
        }
        if self.frame_rate_d == 0 {
            return Err("video frame rate denominator is zero".to_string());
        }
        let min_stride = self.fourcc.line_stride(self.xres);
        if self.stride_bytes() < min_stride {
            return Err(format!(
                "line stride {} shorter than {} bytes required for {} at width {}",
                self.line_stride, min_stride, self.fourcc, self.xres
            ));
        }
        let required = self.required_len();
        if self.data.len() < required {
            return Err(format!(
                "video buffer holds {} bytes, geometry needs {}",
                self.data.len(),
                required
            ));
        }
        Ok(())
    }
}
