//! Loopback Demo
//!
//! Advertises a test-pattern sender on an in-process network, discovers it
//! from a second host and receives from it.
//!
//! Usage: `loopback-demo [SOURCE_NAME] [FRAMES]`

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ndi_session::{
    AudioFormat, AudioFrame, AudioPullOptions, ColorFormat, Context, Engine, FourCC, Frame, FinderOptions,
    LoopbackEngine, LoopbackHost, LoopbackNetwork, ReceiverOptions, SenderOptions, Settings, VideoFrame,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

/// Moving vertical bar in UYVY
fn test_pattern(frame_index: u32) -> VideoFrame {
    let stride = FourCC::Uyvy.line_stride(WIDTH) as usize;
    let bar = (frame_index * 8) % WIDTH;
    let mut data = vec![0u8; stride * HEIGHT as usize];
    for row in data.chunks_exact_mut(stride) {
        for (pair, px) in row.chunks_exact_mut(4).enumerate() {
            let x = pair as u32 * 2;
            let luma = if x.abs_diff(bar) < 16 { 235 } else { 16 };
            px.copy_from_slice(&[128, luma, 128, luma]);
        }
    }
    VideoFrame::new(WIDTH, HEIGHT, FourCC::Uyvy, data).with_frame_rate(25, 1)
}

/// 40ms of a 440Hz tone, stereo planar
fn tone(frame_index: u32) -> AudioFrame {
    let rate = 48_000u32;
    let samples = (rate / 25) as usize;
    let offset = frame_index as usize * samples;
    let channel: Vec<f32> = (0..samples)
        .map(|i| {
            let t = (offset + i) as f32 / rate as f32;
            0.25 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioFrame::from_planar(rate, &[channel.clone(), channel])
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let source_name = args.next().unwrap_or_else(|| "CAM1".to_string());
    let frames: u32 = match args.next() {
        Some(count) => count.parse()?,
        None => 50,
    };

    let settings = Settings::load()?;
    let network = LoopbackNetwork::new();
    let studio: Arc<dyn Engine> = Arc::new(LoopbackEngine::new(network.clone(), LoopbackHost::new("studio", "10.0.0.2")));
    let desk: Arc<dyn Engine> = Arc::new(LoopbackEngine::new(network, LoopbackHost::new("desk", "10.0.0.3")));

    let tx_context = Context::with_settings(studio, settings.clone())?;
    let rx_context = Context::with_settings(desk, settings)?;
    tracing::info!("Engine version {}", rx_context.version());

    let sender = tx_context.send(
        SenderOptions::new(&source_name)
            .clock_video(true)
            .groups(vec!["public", "demo"]),
    )?;
    let finder = rx_context.finder(FinderOptions::default())?;
    if !finder.wait_for_cycle(Duration::from_secs(2)) {
        tracing::warn!("Discovery did not complete a pass");
    }
    println!("\n=== Sources ===");
    for source in finder.get_current_sources() {
        println!("  {}", source);
    }
    println!();

    let source = finder
        .get_current_sources()
        .into_iter()
        .find(|s| s.name == source_name)
        .ok_or_else(|| anyhow::anyhow!("{} not found", source_name))?;
    finder.dispose();

    let receiver = Arc::new(rx_context.receive(
        ReceiverOptions::new(source)
            .color_format(ColorFormat::BgrxBgra)
            .name("demo-monitor"),
    )?);

    let consumer = {
        let receiver = receiver.clone();
        tokio::spawn(async move {
            let audio = AudioPullOptions::new(AudioFormat::Int16Interleaved, 20.0);
            loop {
                match receiver.pull_with_audio(audio, Some(Duration::from_millis(500))).await {
                    Ok(Frame::Video(video)) => tracing::debug!(
                        "Video {}x{} {} stride {}",
                        video.xres,
                        video.yres,
                        video.fourcc,
                        video.line_stride
                    ),
                    Ok(Frame::Audio(audio)) => {
                        tracing::debug!("Audio {} samples x {} channels", audio.samples, audio.channels)
                    }
                    Ok(Frame::Metadata(meta)) => tracing::debug!("Metadata {}", meta.data),
                    Ok(Frame::StatusChange(status)) => tracing::info!("Status: {}", status.code),
                    Err(e) if e.is_retryable() => continue,
                    Err(e) => {
                        tracing::info!("Receiver stopped: {}", e);
                        break;
                    }
                }
            }
        })
    };

    let start = Instant::now();
    for i in 0..frames {
        sender.push_audio(tone(i)).await?;
        sender.push_video(test_pattern(i)).await?;
        if i % 25 == 0 {
            tracing::info!("Sent {} frames to {} receiver(s)", i, sender.connections());
        }
    }
    tracing::info!("Sent {} frames in {:.2}s", frames, start.elapsed().as_secs_f64());

    // Let the consumer drain what is queued
    tokio::time::sleep(Duration::from_millis(200)).await;
    receiver.close();
    consumer.await?;

    let rx_stats = receiver.stats();
    let tx_stats = sender.stats();
    tracing::info!(
        "Stats: {} video / {} audio sent, {} video / {} audio received, {} timeouts",
        tx_stats.video_frames,
        tx_stats.audio_frames,
        rx_stats.video_frames,
        rx_stats.audio_frames,
        rx_stats.timeouts
    );

    sender.close();
    tx_context.shutdown();
    rx_context.shutdown();
    Ok(())
}
