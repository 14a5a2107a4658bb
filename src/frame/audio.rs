//! Audio frames
//!
//! Sample data is stored little-endian. For planar layouts `channel_stride`
//! is the distance between channel blocks; for interleaved layouts it is the
//! size of one multi-channel sample.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use super::format::AudioFormat;
use super::Timestamp;

/// Integer value that float full scale maps to at `reference_level` dB
pub fn int16_full_scale(reference_level: f32) -> f32 {
    32767.0 * 10f32.powf(-reference_level / 20.0)
}

/// One block of audio samples, owning its buffer
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    /// Headroom in dB used when converting to integer samples
    pub reference_level: f32,
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per channel
    pub samples: u32,
    pub channel_stride: usize,
    pub timestamp: Timestamp,
    /// Timecode in 100ns units
    pub timecode: i64,
    pub metadata: Option<String>,
    pub data: Bytes,
}

impl AudioFrame {
    /// Build a planar float frame from one sample vector per channel.
    /// Channels shorter than the longest one are padded with silence.
    pub fn from_planar(sample_rate: u32, channels: &[Vec<f32>]) -> Self {
        let samples = channels.iter().map(Vec::len).max().unwrap_or(0);
        let mut data = BytesMut::with_capacity(samples * channels.len() * 4);
        for channel in channels {
            for i in 0..samples {
                data.put_f32_le(channel.get(i).copied().unwrap_or(0.0));
            }
        }
        Self {
            format: AudioFormat::Float32Separate,
            reference_level: 0.0,
            sample_rate,
            channels: channels.len() as u32,
            samples: samples as u32,
            channel_stride: samples * 4,
            timestamp: Timestamp::now(),
            timecode: 0,
            metadata: None,
            data: data.freeze(),
        }
    }

    /// Build an interleaved float frame
    pub fn from_interleaved_f32(sample_rate: u32, channels: u32, interleaved: &[f32]) -> Self {
        let mut data = BytesMut::with_capacity(interleaved.len() * 4);
        for sample in interleaved {
            data.put_f32_le(*sample);
        }
        Self::interleaved(AudioFormat::Float32Interleaved, sample_rate, channels, interleaved.len(), data.freeze())
    }

    /// Build an interleaved 16-bit frame
    pub fn from_interleaved_i16(sample_rate: u32, channels: u32, interleaved: &[i16]) -> Self {
        let mut data = BytesMut::with_capacity(interleaved.len() * 2);
        for sample in interleaved {
            data.put_i16_le(*sample);
        }
        Self::interleaved(AudioFormat::Int16Interleaved, sample_rate, channels, interleaved.len(), data.freeze())
    }

    fn interleaved(format: AudioFormat, sample_rate: u32, channels: u32, total: usize, data: Bytes) -> Self {
        let samples = if channels == 0 { 0 } else { total / channels as usize };
        Self {
            format,
            reference_level: 0.0,
            sample_rate,
            channels,
            samples: samples as u32,
            channel_stride: channels as usize * format.bytes_per_sample(),
            timestamp: Timestamp::now(),
            timecode: 0,
            metadata: None,
            data,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_reference_level(mut self, reference_level: f32) -> Self {
        self.reference_level = reference_level;
        self
    }

    /// Get frame duration
    pub fn duration(&self) -> Option<Duration> {
        if self.sample_rate == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            self.samples as u64 * 1_000_000_000 / self.sample_rate as u64,
        ))
    }

    /// Samples of channel `c` as floats, whatever the layout
    pub fn channel(&self, c: u32) -> Option<Vec<f32>> {
        if c >= self.channels || self.validate().is_err() {
            return None;
        }
        let samples = self.samples as usize;
        let bps = self.format.bytes_per_sample();
        let full_scale = int16_full_scale(self.reference_level);
        let out = (0..samples)
            .map(|i| {
                let offset = match self.format {
                    AudioFormat::Float32Separate => c as usize * self.channel_stride + i * bps,
                    _ => i * self.channel_stride + c as usize * bps,
                };
                let raw = &self.data[offset..offset + bps];
                match self.format {
                    AudioFormat::Int16Interleaved => {
                        i16::from_le_bytes([raw[0], raw[1]]) as f32 / full_scale
                    }
                    _ => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                }
            })
            .collect();
        Some(out)
    }

    /// Buffer length implied by the frame geometry
    pub fn required_len(&self) -> usize {
        let bps = self.format.bytes_per_sample();
        let samples = self.samples as usize;
        let channels = self.channels as usize;
        if samples == 0 || channels == 0 {
            return 0;
        }
        match self.format {
            AudioFormat::Float32Separate => (channels - 1) * self.channel_stride + samples * bps,
            _ => (samples - 1) * self.channel_stride + channels * bps,
        }
    }

    /// Check that the declared geometry fits the owned buffer
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("audio sample rate is zero".to_string());
        }
        if self.channels == 0 {
            return Err("audio frame has no channels".to_string());
        }
        if !self.reference_level.is_finite() {
            return Err("audio reference level is not finite".to_string());
        }
        let bps = self.format.bytes_per_sample();
        let min_stride = match self.format {
            AudioFormat::Float32Separate => self.samples as usize * bps,
            _ => self.channels as usize * bps,
        };
        if self.channel_stride < min_stride {
            return Err(format!(
                "channel stride {} shorter than {} bytes",
                self.channel_stride, min_stride
            ));
        }
        let required = self.required_len();
        if self.data.len() < required {
            return Err(format!(
                "audio buffer holds {} bytes, geometry needs {}",
                self.data.len(),
                required
            ));
        }
        Ok(())
    }
}
