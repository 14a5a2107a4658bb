//! Pixel and sample conversions performed on behalf of receivers
//!
//! Packed 8-bit layouts (BGRA/BGRX/RGBA/RGBX/UYVY/UYVA) are converted through
//! an intermediate RGBA image using BT.709 limited-range coefficients. Planar
//! and 16-bit layouts pass through untouched.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::AudioPullOptions;
use crate::frame::audio::int16_full_scale;
use crate::frame::{AudioFormat, AudioFrame, ColorFormat, FourCC, FrameFieldType, VideoFrame};

fn convertible(fourcc: FourCC) -> bool {
    fourcc.is_rgb() || matches!(fourcc, FourCC::Uyvy | FourCC::Uyva)
}

/// Pixel layout delivered for `source` under the requested color format
pub fn negotiate(source: FourCC, color_format: ColorFormat) -> FourCC {
    if !convertible(source) {
        return source;
    }
    let alpha = source.has_alpha();
    match color_format {
        ColorFormat::Fastest | ColorFormat::Best => source,
        ColorFormat::BgrxBgra | ColorFormat::BgrxBgraFlipped => {
            if alpha { FourCC::Bgra } else { FourCC::Bgrx }
        }
        ColorFormat::RgbxRgba => {
            if alpha { FourCC::Rgba } else { FourCC::Rgbx }
        }
        ColorFormat::UyvyBgra => {
            if alpha { FourCC::Bgra } else { FourCC::Uyvy }
        }
        ColorFormat::UyvyRgba => {
            if alpha { FourCC::Rgba } else { FourCC::Uyvy }
        }
    }
}

/// Convert a video frame to the layout a receiver asked for
pub fn convert_video(frame: &VideoFrame, color_format: ColorFormat) -> VideoFrame {
    let target = negotiate(frame.fourcc, color_format);
    let mut out = if target == frame.fourcc {
        frame.clone()
    } else {
        match to_rgba(frame) {
            Some(rgba) => reencode(frame, &rgba, frame.xres, frame.yres, target),
            None => frame.clone(),
        }
    };
    if color_format.is_flipped() && out.fourcc.is_rgb() && out.line_stride > 0 {
        out.line_stride = -out.line_stride;
    }
    out
}

/// Halve both dimensions, for reduced-bandwidth delivery
pub fn downscale_half(frame: &VideoFrame) -> VideoFrame {
    if !convertible(frame.fourcc) || frame.xres < 4 || frame.yres < 2 {
        return frame.clone();
    }
    let Some(rgba) = to_rgba(frame) else {
        return frame.clone();
    };
    let (xres, yres) = (frame.xres / 2, frame.yres / 2);
    let mut small = Vec::with_capacity(xres as usize * yres as usize * 4);
    for y in 0..yres as usize {
        let row = y * 2 * frame.xres as usize * 4;
        for x in 0..xres as usize {
            let px = row + x * 2 * 4;
            small.extend_from_slice(&rgba[px..px + 4]);
        }
    }
    reencode(frame, &small, xres, yres, frame.fourcc)
}

/// Interleave two fields into one interlaced frame.
/// `first` supplies the even lines, `second` the odd lines.
pub fn weave_fields(first: &VideoFrame, second: &VideoFrame) -> Option<VideoFrame> {
    let packed = first.fourcc.is_rgb() || first.fourcc == FourCC::Uyvy;
    if !packed
        || first.fourcc != second.fourcc
        || first.xres != second.xres
        || first.yres != second.yres
        || first.stride_bytes() != second.stride_bytes()
    {
        return None;
    }
    let stride = first.stride_bytes();
    let mut data = BytesMut::with_capacity(stride * first.yres as usize * 2);
    for y in 0..first.yres {
        data.put_slice(first.row(y)?);
        data.put_slice(second.row(y)?);
    }
    let mut woven = first.clone();
    woven.yres = first.yres * 2;
    woven.line_stride = stride as i32;
    woven.frame_format_type = FrameFieldType::Interlaced;
    woven.data = data.freeze();
    Some(woven)
}

fn reencode(frame: &VideoFrame, rgba: &[u8], xres: u32, yres: u32, target: FourCC) -> VideoFrame {
    let (data, stride) = from_rgba(rgba, xres, yres, target);
    let mut out = frame.clone();
    out.xres = xres;
    out.yres = yres;
    out.fourcc = target;
    out.line_stride = stride as i32;
    out.data = data;
    out
}

/// Decode a packed frame into top-down RGBA
fn to_rgba(frame: &VideoFrame) -> Option<Vec<u8>> {
    if frame.validate().is_err() || !convertible(frame.fourcc) {
        return None;
    }
    let (xres, yres) = (frame.xres as usize, frame.yres as usize);
    let mut rgba = Vec::with_capacity(xres * yres * 4);
    let alpha_plane = frame.stride_bytes() * yres;
    for y in 0..frame.yres {
        let row = frame.row(y)?;
        match frame.fourcc {
            FourCC::Bgra | FourCC::Bgrx => {
                for px in row.get(..xres * 4)?.chunks_exact(4) {
                    let a = if frame.fourcc == FourCC::Bgra { px[3] } else { 255 };
                    rgba.extend_from_slice(&[px[2], px[1], px[0], a]);
                }
            }
            FourCC::Rgba | FourCC::Rgbx => {
                for px in row.get(..xres * 4)?.chunks_exact(4) {
                    let a = if frame.fourcc == FourCC::Rgba { px[3] } else { 255 };
                    rgba.extend_from_slice(&[px[0], px[1], px[2], a]);
                }
            }
            FourCC::Uyvy | FourCC::Uyva => {
                for x in 0..xres {
                    let pair = (x / 2) * 4;
                    let macropixel = row.get(pair..pair + 4)?;
                    let luma = if x % 2 == 0 { macropixel[1] } else { macropixel[3] };
                    let [r, g, b] = yuv_to_rgb(luma, macropixel[0], macropixel[2]);
                    let a = if frame.fourcc == FourCC::Uyva {
                        *frame.data.get(alpha_plane + y as usize * xres + x)?
                    } else {
                        255
                    };
                    rgba.extend_from_slice(&[r, g, b, a]);
                }
            }
            _ => return None,
        }
    }
    Some(rgba)
}

/// Encode a top-down RGBA image, returning the buffer and its line stride
fn from_rgba(rgba: &[u8], xres: u32, yres: u32, target: FourCC) -> (Bytes, usize) {
    let (w, h) = (xres as usize, yres as usize);
    let stride = target.line_stride(xres);
    let mut data = BytesMut::with_capacity(target.buffer_len(xres, yres, stride));
    match target {
        FourCC::Bgra | FourCC::Bgrx => {
            for px in rgba.chunks_exact(4) {
                let a = if target == FourCC::Bgra { px[3] } else { 255 };
                data.put_slice(&[px[2], px[1], px[0], a]);
            }
        }
        FourCC::Rgba | FourCC::Rgbx => {
            for px in rgba.chunks_exact(4) {
                let a = if target == FourCC::Rgba { px[3] } else { 255 };
                data.put_slice(&[px[0], px[1], px[2], a]);
            }
        }
        FourCC::Uyvy | FourCC::Uyva => {
            for y in 0..h {
                for pair in 0..w.div_ceil(2) {
                    let left = (y * w + pair * 2) * 4;
                    let right = if pair * 2 + 1 < w { left + 4 } else { left };
                    let (y0, u0, v0) = rgb_to_yuv(&rgba[left..left + 3]);
                    let (y1, u1, v1) = rgb_to_yuv(&rgba[right..right + 3]);
                    let u = ((u0 as u16 + u1 as u16) / 2) as u8;
                    let v = ((v0 as u16 + v1 as u16) / 2) as u8;
                    data.put_slice(&[u, y0, v, y1]);
                }
            }
            if target == FourCC::Uyva {
                for px in rgba.chunks_exact(4) {
                    data.put_u8(px[3]);
                }
            }
        }
        _ => {}
    }
    (data.freeze(), stride)
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.1644 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        clamp_u8(c + 1.7927 * e),
        clamp_u8(c - 0.2132 * d - 0.5329 * e),
        clamp_u8(c + 2.1124 * d),
    ]
}

fn rgb_to_yuv(rgb: &[u8]) -> (u8, u8, u8) {
    let (r, g, b) = (rgb[0] as f32, rgb[1] as f32, rgb[2] as f32);
    (
        clamp_u8(16.0 + 0.1826 * r + 0.6142 * g + 0.0620 * b),
        clamp_u8(128.0 - 0.1006 * r - 0.3386 * g + 0.4392 * b),
        clamp_u8(128.0 + 0.4392 * r - 0.3989 * g - 0.0403 * b),
    )
}

/// Convert an audio frame to the requested layout and reference level.
/// Returns `None` if the frame's geometry does not fit its buffer.
pub fn convert_audio(frame: &AudioFrame, request: &AudioPullOptions) -> Option<AudioFrame> {
    let float_target = request.audio_format != AudioFormat::Int16Interleaved;
    if frame.format == request.audio_format
        && (float_target || frame.reference_level == request.reference_level)
    {
        return Some(frame.clone());
    }

    let channels = (0..frame.channels)
        .map(|c| frame.channel(c))
        .collect::<Option<Vec<_>>>()?;
    let samples = frame.samples as usize;

    let mut out = match request.audio_format {
        AudioFormat::Float32Separate => AudioFrame::from_planar(frame.sample_rate, &channels),
        AudioFormat::Float32Interleaved => {
            let interleaved: Vec<f32> = (0..samples)
                .flat_map(|i| channels.iter().map(move |ch| ch[i]))
                .collect();
            AudioFrame::from_interleaved_f32(frame.sample_rate, frame.channels, &interleaved)
        }
        AudioFormat::Int16Interleaved => {
            let full_scale = int16_full_scale(request.reference_level);
            let interleaved: Vec<i16> = (0..samples)
                .flat_map(|i| channels.iter().map(move |ch| ch[i]))
                .map(|s| (s * full_scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
                .collect();
            AudioFrame::from_interleaved_i16(frame.sample_rate, frame.channels, &interleaved)
        }
    };
    out.reference_level = request.reference_level;
    out.timestamp = frame.timestamp;
    out.timecode = frame.timecode;
    out.metadata = frame.metadata.clone();
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bgra_gradient(xres: u32, yres: u32) -> VideoFrame {
        let mut data = Vec::new();
        for y in 0..yres {
            for x in 0..xres {
                data.extend_from_slice(&[x as u8, y as u8, 200, 255]);
            }
        }
        VideoFrame::new(xres, yres, FourCC::Bgra, data)
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate(FourCC::Uyvy, ColorFormat::Fastest), FourCC::Uyvy);
        assert_eq!(negotiate(FourCC::Uyvy, ColorFormat::BgrxBgra), FourCC::Bgrx);
        assert_eq!(negotiate(FourCC::Bgra, ColorFormat::UyvyRgba), FourCC::Rgba);
        assert_eq!(negotiate(FourCC::Bgrx, ColorFormat::UyvyBgra), FourCC::Uyvy);
        assert_eq!(negotiate(FourCC::Rgbx, ColorFormat::BgrxBgraFlipped), FourCC::Bgrx);
        assert_eq!(negotiate(FourCC::Nv12, ColorFormat::BgrxBgra), FourCC::Nv12);
    }

    #[test]
    fn test_swizzle_bgra_to_rgba() {
        let frame = bgra_gradient(4, 2);
        let out = convert_video(&frame, ColorFormat::RgbxRgba);
        assert_eq!(out.fourcc, FourCC::Rgba);
        assert_eq!(&out.row(1).unwrap()[4..8], &[200, 1, 1, 255]);
    }

    #[test]
    fn test_flipped_request_mirrors_rows() {
        let frame = bgra_gradient(4, 3);
        let upright = convert_video(&frame, ColorFormat::BgrxBgra);
        let flipped = convert_video(&frame, ColorFormat::BgrxBgraFlipped);
        assert!(flipped.line_stride < 0);
        assert_eq!(flipped.line_stride, -upright.line_stride);
        assert_eq!(flipped.row(2), upright.row(0));
        assert_eq!(flipped.row(0), upright.row(2));
    }

    #[test]
    fn test_uyvy_round_trip_is_close() {
        let frame = bgra_gradient(8, 2);
        let uyvy = convert_video(&frame, ColorFormat::UyvyBgra);
        // Source has alpha so BGRA is kept
        assert_eq!(uyvy.fourcc, FourCC::Bgra);

        let opaque = VideoFrame::new(8, 2, FourCC::Bgrx, frame.data.clone());
        let uyvy = convert_video(&opaque, ColorFormat::UyvyBgra);
        assert_eq!(uyvy.fourcc, FourCC::Uyvy);
        assert_eq!(uyvy.line_stride, 16);
        let back = convert_video(&uyvy, ColorFormat::BgrxBgra);
        assert_eq!(back.fourcc, FourCC::Bgrx);
        let original = opaque.row(1).unwrap();
        let restored = back.row(1).unwrap();
        for (a, b) in original.iter().zip(restored).step_by(4).take(8) {
            assert!((*a as i16 - *b as i16).abs() <= 8, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_odd_width_uyvy() {
        let frame = VideoFrame::blank(3, 2, FourCC::Uyvy);
        assert_eq!(frame.line_stride, 8);
        let rgb = convert_video(&frame, ColorFormat::BgrxBgra);
        assert_eq!(rgb.fourcc, FourCC::Bgrx);
        assert_eq!(rgb.line_stride, 12);
        assert!(rgb.validate().is_ok());

        // Rows cut short of the last macropixel are rejected, not decoded
        let short = VideoFrame::new(3, 2, FourCC::Uyvy, vec![128u8; 12]).with_line_stride(6);
        assert!(short.validate().is_err());
        assert!(to_rgba(&short).is_none());
        assert_eq!(convert_video(&short, ColorFormat::BgrxBgra).fourcc, FourCC::Uyvy);
    }

    #[test]
    fn test_downscale_half() {
        let frame = bgra_gradient(8, 4);
        let small = downscale_half(&frame);
        assert_eq!((small.xres, small.yres), (4, 2));
        assert_eq!(small.line_stride, 16);
        assert_eq!(&small.row(1).unwrap()[4..8], &[2, 2, 200, 255]);
    }

    #[test]
    fn test_weave_fields() {
        let even = VideoFrame::new(2, 2, FourCC::Bgrx, vec![0u8; 16]).with_format_type(FrameFieldType::Field0);
        let odd = VideoFrame::new(2, 2, FourCC::Bgrx, vec![1u8; 16]).with_format_type(FrameFieldType::Field1);
        let woven = weave_fields(&even, &odd).unwrap();
        assert_eq!(woven.yres, 4);
        assert_eq!(woven.frame_format_type, FrameFieldType::Interlaced);
        assert_eq!(woven.row(0).unwrap()[0], 0);
        assert_eq!(woven.row(1).unwrap()[0], 1);
        assert_eq!(woven.row(3).unwrap()[0], 1);
        assert!(woven.validate().is_ok());

        let mismatched = VideoFrame::new(4, 2, FourCC::Bgrx, vec![1u8; 32]);
        assert!(weave_fields(&even, &mismatched).is_none());
    }

    #[test]
    fn test_audio_planar_to_int16() {
        let frame = AudioFrame::from_planar(48000, &[vec![1.0, -1.0], vec![0.5, 0.0]]);
        let out = convert_audio(&frame, &AudioPullOptions::new(AudioFormat::Int16Interleaved, 0.0)).unwrap();
        assert_eq!(out.format, AudioFormat::Int16Interleaved);
        assert_eq!(out.samples, 2);
        assert_eq!(out.channel_stride, 4);
        let samples: Vec<i16> = out
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![32767, 16384, -32767, 0]);
        assert_eq!(out.timestamp, frame.timestamp);
    }

    #[test]
    fn test_audio_reference_level_headroom() {
        let frame = AudioFrame::from_planar(48000, &[vec![1.0]]);
        let out = convert_audio(&frame, &AudioPullOptions::new(AudioFormat::Int16Interleaved, 20.0)).unwrap();
        let sample = i16::from_le_bytes([out.data[0], out.data[1]]);
        assert_eq!(sample, 3277);
        assert_eq!(out.reference_level, 20.0);
    }

    #[test]
    fn test_audio_same_format_is_untouched() {
        let frame = AudioFrame::from_planar(48000, &[vec![0.25; 3]]);
        let out = convert_audio(&frame, &AudioPullOptions::default()).unwrap();
        assert_eq!(out, frame);
    }

    proptest! {
        #[test]
        fn prop_int16_conversion_stays_in_range(
            samples in prop::collection::vec(-4.0f32..4.0, 1..64),
            level in -20.0f32..20.0,
        ) {
            let frame = AudioFrame::from_planar(48000, &[samples.clone()]);
            let out = convert_audio(&frame, &AudioPullOptions::new(AudioFormat::Int16Interleaved, level)).unwrap();
            prop_assert_eq!(out.samples as usize, samples.len());
            prop_assert!(out.validate().is_ok());

            let back = convert_audio(&out, &AudioPullOptions::default()).unwrap();
            let decoded = back.channel(0).unwrap();
            let full_scale = int16_full_scale(level);
            for (orig, dec) in samples.iter().zip(decoded) {
                let limit = i16::MAX as f32 / full_scale;
                let expected = orig.clamp(-limit, limit);
                prop_assert!((expected - dec).abs() <= 1.0 / full_scale + 1e-4);
            }
        }
    }
}
