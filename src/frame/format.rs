//! Format enumerations shared with the engine
//!
//! Every discriminant here is part of the engine ABI. Values must never be
//! renumbered, only added.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Build a little-endian FourCC code from its four ASCII characters
pub const fn make_fourcc(code: [u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// Pixel layouts the receiver may ask the engine to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ColorFormat {
    /// No alpha: BGRX, alpha: BGRA
    BgrxBgra = 0,
    /// No alpha: UYVY, alpha: BGRA
    UyvyBgra = 1,
    /// No alpha: RGBX, alpha: RGBA
    RgbxRgba = 2,
    /// No alpha: UYVY, alpha: RGBA
    UyvyRgba = 3,
    /// BGRX/BGRA delivered bottom-up with a negative line stride
    BgrxBgraFlipped = 200,
    /// Whatever needs no conversion
    Fastest = 100,
    /// Highest fidelity layout the engine can produce
    Best = 101,
}

impl ColorFormat {
    /// Whether frames in this format use a negative line stride
    pub fn is_flipped(self) -> bool {
        matches!(self, ColorFormat::BgrxBgraFlipped)
    }
}

impl Default for ColorFormat {
    fn default() -> Self {
        ColorFormat::Fastest
    }
}

/// How much of a stream the engine should deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(i32)]
pub enum Bandwidth {
    /// Metadata only
    MetadataOnly = -10,
    /// Metadata and audio
    AudioOnly = 10,
    /// Everything, video at reduced resolution
    Lowest = 0,
    /// Everything at full resolution
    Highest = 100,
}

impl Bandwidth {
    pub fn carries_audio(self) -> bool {
        !matches!(self, Bandwidth::MetadataOnly)
    }

    pub fn carries_video(self) -> bool {
        matches!(self, Bandwidth::Lowest | Bandwidth::Highest)
    }
}

impl Default for Bandwidth {
    fn default() -> Self {
        Bandwidth::Highest
    }
}

/// Field order of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(i32)]
pub enum FrameFieldType {
    Interlaced = 0,
    Progressive = 1,
    /// Even lines only
    Field0 = 2,
    /// Odd lines only
    Field1 = 3,
}

impl FrameFieldType {
    pub fn is_field(self) -> bool {
        matches!(self, FrameFieldType::Field0 | FrameFieldType::Field1)
    }
}

/// Raw audio sample layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(i32)]
pub enum AudioFormat {
    /// One block per channel of 32-bit floats
    Float32Separate = 0,
    /// Channel-interleaved 32-bit floats
    Float32Interleaved = 1,
    /// Channel-interleaved 16-bit integers
    Int16Interleaved = 2,
}

impl AudioFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Float32Separate | AudioFormat::Float32Interleaved => 4,
            AudioFormat::Int16Interleaved => 2,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, AudioFormat::Float32Separate)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Float32Separate
    }
}

/// Pixel format of a video buffer, identified by its FourCC code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FourCC {
    Uyvy = make_fourcc(*b"UYVY"),
    Uyva = make_fourcc(*b"UYVA"),
    P216 = make_fourcc(*b"P216"),
    Pa16 = make_fourcc(*b"PA16"),
    Yv12 = make_fourcc(*b"YV12"),
    I420 = make_fourcc(*b"I420"),
    Nv12 = make_fourcc(*b"NV12"),
    Bgra = make_fourcc(*b"BGRA"),
    Bgrx = make_fourcc(*b"BGRX"),
    Rgba = make_fourcc(*b"RGBA"),
    Rgbx = make_fourcc(*b"RGBX"),
}

impl FourCC {
    pub fn has_alpha(self) -> bool {
        matches!(self, FourCC::Uyva | FourCC::Pa16 | FourCC::Bgra | FourCC::Rgba)
    }

    /// Packed 8-bit four-channel RGB layouts
    pub fn is_rgb(self) -> bool {
        matches!(self, FourCC::Bgra | FourCC::Bgrx | FourCC::Rgba | FourCC::Rgbx)
    }

    /// Natural line stride in bytes for the first plane
    pub fn line_stride(self, xres: u32) -> usize {
        let xres = xres as usize;
        match self {
            FourCC::Bgra | FourCC::Bgrx | FourCC::Rgba | FourCC::Rgbx => xres * 4,
            // Whole macropixels, so odd widths round up
            FourCC::Uyvy | FourCC::Uyva => xres.div_ceil(2) * 4,
            FourCC::P216 | FourCC::Pa16 => xres * 2,
            FourCC::Yv12 | FourCC::I420 | FourCC::Nv12 => xres,
        }
    }

    /// Minimum buffer length for a frame with the given geometry
    pub fn buffer_len(self, xres: u32, yres: u32, stride: usize) -> usize {
        let plane = stride * yres as usize;
        match self {
            FourCC::Bgra | FourCC::Bgrx | FourCC::Rgba | FourCC::Rgbx | FourCC::Uyvy => plane,
            // UYVY plane followed by an 8-bit alpha plane
            FourCC::Uyva => plane + xres as usize * yres as usize,
            // Y plane followed by interleaved UV plane
            FourCC::P216 => plane * 2,
            FourCC::Pa16 => plane * 3,
            FourCC::Yv12 | FourCC::I420 | FourCC::Nv12 => plane + plane / 2,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = (*self as u32).to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

/// Raised when a wire value has no matching variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: i64,
}

macro_rules! wire_enum {
    ($ty:ident, $repr:ty, [$($variant:ident),+ $(,)?]) => {
        impl From<$ty> for $repr {
            fn from(value: $ty) -> Self {
                value as $repr
            }
        }

        impl TryFrom<$repr> for $ty {
            type Error = UnknownValue;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                $(
                    if value == $ty::$variant as $repr {
                        return Ok($ty::$variant);
                    }
                )+
                Err(UnknownValue { kind: stringify!($ty), value: value as i64 })
            }
        }
    };
}

wire_enum!(ColorFormat, i32, [BgrxBgra, UyvyBgra, RgbxRgba, UyvyRgba, BgrxBgraFlipped, Fastest, Best]);
wire_enum!(Bandwidth, i32, [MetadataOnly, AudioOnly, Lowest, Highest]);
wire_enum!(FrameFieldType, i32, [Interlaced, Progressive, Field0, Field1]);
wire_enum!(AudioFormat, i32, [Float32Separate, Float32Interleaved, Int16Interleaved]);
wire_enum!(FourCC, u32, [Uyvy, Uyva, P216, Pa16, Yv12, I420, Nv12, Bgra, Bgrx, Rgba, Rgbx]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abi_values() {
        assert_eq!(i32::from(ColorFormat::BgrxBgra), 0);
        assert_eq!(i32::from(ColorFormat::UyvyBgra), 1);
        assert_eq!(i32::from(ColorFormat::RgbxRgba), 2);
        assert_eq!(i32::from(ColorFormat::UyvyRgba), 3);
        assert_eq!(i32::from(ColorFormat::BgrxBgraFlipped), 200);
        assert_eq!(i32::from(ColorFormat::Fastest), 100);
        assert_eq!(i32::from(ColorFormat::Best), 101);

        assert_eq!(i32::from(Bandwidth::MetadataOnly), -10);
        assert_eq!(i32::from(Bandwidth::AudioOnly), 10);
        assert_eq!(i32::from(Bandwidth::Lowest), 0);
        assert_eq!(i32::from(Bandwidth::Highest), 100);

        assert_eq!(i32::from(FrameFieldType::Interlaced), 0);
        assert_eq!(i32::from(FrameFieldType::Progressive), 1);
        assert_eq!(i32::from(FrameFieldType::Field0), 2);
        assert_eq!(i32::from(FrameFieldType::Field1), 3);

        assert_eq!(i32::from(AudioFormat::Float32Separate), 0);
        assert_eq!(i32::from(AudioFormat::Float32Interleaved), 1);
        assert_eq!(i32::from(AudioFormat::Int16Interleaved), 2);
    }

    #[test]
    fn test_fourcc_codes() {
        assert_eq!(u32::from(FourCC::Uyvy), 1_498_831_189);
        assert_eq!(u32::from(FourCC::Uyva), 1_096_178_005);
        assert_eq!(u32::from(FourCC::P216), 909_193_808);
        assert_eq!(u32::from(FourCC::Pa16), 909_197_648);
        assert_eq!(u32::from(FourCC::Yv12), 842_094_169);
        assert_eq!(u32::from(FourCC::I420), 808_596_553);
        assert_eq!(u32::from(FourCC::Nv12), 842_094_158);
        assert_eq!(u32::from(FourCC::Bgra), 1_095_911_234);
        assert_eq!(u32::from(FourCC::Bgrx), 1_481_787_202);
        assert_eq!(u32::from(FourCC::Rgba), 1_094_862_674);
        assert_eq!(u32::from(FourCC::Rgbx), 1_480_738_642);
        assert_eq!(FourCC::Bgra.to_string(), "BGRA");
    }

    #[test]
    fn test_try_from_rejects_unknown() {
        assert_eq!(ColorFormat::try_from(200), Ok(ColorFormat::BgrxBgraFlipped));
        assert_eq!(Bandwidth::try_from(-10), Ok(Bandwidth::MetadataOnly));
        let err = Bandwidth::try_from(42).unwrap_err();
        assert_eq!(err.kind, "Bandwidth");
        assert_eq!(err.value, 42);
        assert!(FourCC::try_from(0u32).is_err());
    }

    #[test]
    fn test_buffer_len() {
        assert_eq!(FourCC::Bgra.line_stride(1920), 7680);
        assert_eq!(FourCC::Bgra.buffer_len(1920, 1080, 7680), 7680 * 1080);
        assert_eq!(FourCC::Uyva.buffer_len(4, 2, 8), 16 + 8);
        assert_eq!(FourCC::Uyvy.line_stride(4), 8);
        assert_eq!(FourCC::Uyvy.line_stride(3), 8);
        assert_eq!(FourCC::I420.buffer_len(4, 4, 4), 24);
    }

    #[test]
    fn test_bandwidth_tiers() {
        assert!(!Bandwidth::MetadataOnly.carries_audio());
        assert!(Bandwidth::AudioOnly.carries_audio());
        assert!(!Bandwidth::AudioOnly.carries_video());
        assert!(Bandwidth::Lowest.carries_video());
    }
}
