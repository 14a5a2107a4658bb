//! Receiver session
//!
//! ```text
//!   open ──► Idle ◄──────────────┐
//!             │ pull*            │ frame / timeout / error
//!             ▼                  │
//!        AwaitingFrame ──────────┘
//!             │ close (any state)
//!             ▼
//!           Closed
//! ```
//!
//! Each pull runs the blocking engine capture on tokio's blocking pool and
//! races it against the session's close signal, so closing a receiver wakes
//! a pull that is still waiting. A capture outlives a pull future that is
//! dropped mid-wait; its frame goes to the next pull.

use parking_lot::Mutex;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{AudioPullOptions, ReceiverOptions, Settings};
use crate::engine::{Engine, EngineReceiver, ReceiverSpec};
use crate::error::{EngineError, Error, Result};
use crate::frame::{AudioFrame, Frame, FrameKind, MetadataFrame, VideoFrame};
use crate::protocol::Source;

/// Where a receiver is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    AwaitingFrame,
    Closed,
}

/// Counters since the receiver opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub metadata_frames: u64,
    pub status_changes: u64,
    /// Frames skipped by a typed pull because they were another kind
    pub discarded: u64,
    pub malformed: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    metadata_frames: AtomicU64,
    status_changes: AtomicU64,
    discarded: AtomicU64,
    malformed: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn record(&self, kind: FrameKind) {
        let counter = match kind {
            FrameKind::Video => &self.video_frames,
            FrameKind::Audio => &self.audio_frames,
            FrameKind::Metadata => &self.metadata_frames,
            FrameKind::StatusChange => &self.status_changes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            metadata_frames: self.metadata_frames.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Returns the session to `Idle` when a pull ends, however it ends
struct PullGuard<'a>(&'a Mutex<ReceiverState>);

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        if *state == ReceiverState::AwaitingFrame {
            *state = ReceiverState::Idle;
        }
    }
}

/// Slack past the pull deadline before a capture is given up on
const CAPTURE_GRACE: Duration = Duration::from_millis(50);

type CaptureTask = JoinHandle<std::result::Result<Option<Frame>, EngineError>>;

/// A session bound to one source, yielding frames on demand
pub struct Receiver {
    options: ReceiverOptions,
    handle: Arc<dyn EngineReceiver>,
    state: Mutex<ReceiverState>,
    /// Capture still running on the blocking pool
    in_flight: Mutex<Option<CaptureTask>>,
    closed: watch::Sender<bool>,
    default_timeout: Duration,
    counters: Counters,
}

impl Receiver {
    /// Connect to `options.source`
    pub fn open(engine: &dyn Engine, options: ReceiverOptions, settings: &Settings) -> Result<Self> {
        options.validate()?;
        let spec = ReceiverSpec {
            source: options.source.clone(),
            color_format: options.color_format,
            bandwidth: options.bandwidth,
            allow_video_fields: options.allow_video_fields,
            name: options.name.clone(),
            queue_depth: settings.receiver_queue_depth,
        };
        let handle: Arc<dyn EngineReceiver> = Arc::from(engine.open_receiver(&spec)?);
        let (closed, _) = watch::channel(false);

        info!(
            source = %options.source.name,
            color_format = ?options.color_format,
            bandwidth = ?options.bandwidth,
            "Receiver opened"
        );
        Ok(Self {
            options,
            handle,
            state: Mutex::new(ReceiverState::Idle),
            in_flight: Mutex::new(None),
            closed,
            default_timeout: settings.pull_timeout(),
            counters: Counters::default(),
        })
    }

    /// Next frame of any kind. Never drops frames.
    pub async fn pull(&self, timeout: Option<Duration>) -> Result<Frame> {
        self.pull_with_audio(AudioPullOptions::default(), timeout).await
    }

    /// Next frame of any kind, with audio delivered as `audio` asks
    pub async fn pull_with_audio(&self, audio: AudioPullOptions, timeout: Option<Duration>) -> Result<Frame> {
        audio.validate()?;
        self.pull_kind(None, audio, timeout).await
    }

    /// Next video frame, discarding anything else that arrives first
    pub async fn pull_video(&self, timeout: Option<Duration>) -> Result<VideoFrame> {
        let frame = self
            .pull_kind(Some(FrameKind::Video), AudioPullOptions::default(), timeout)
            .await?;
        frame.into_video().ok_or_else(|| Error::MalformedFrame("expected video".to_string()))
    }

    /// Next audio frame in the requested layout, discarding anything else
    pub async fn pull_audio(&self, audio: AudioPullOptions, timeout: Option<Duration>) -> Result<AudioFrame> {
        audio.validate()?;
        let frame = self.pull_kind(Some(FrameKind::Audio), audio, timeout).await?;
        frame.into_audio().ok_or_else(|| Error::MalformedFrame("expected audio".to_string()))
    }

    /// Next metadata frame, discarding anything else
    pub async fn pull_metadata(&self, timeout: Option<Duration>) -> Result<MetadataFrame> {
        let frame = self
            .pull_kind(Some(FrameKind::Metadata), AudioPullOptions::default(), timeout)
            .await?;
        frame
            .into_metadata()
            .ok_or_else(|| Error::MalformedFrame("expected metadata".to_string()))
    }

    async fn pull_kind(
        &self,
        want: Option<FrameKind>,
        audio: AudioPullOptions,
        timeout: Option<Duration>,
    ) -> Result<Frame> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        {
            let mut state = self.state.lock();
            if *state == ReceiverState::Closed {
                return Err(Error::SessionClosed);
            }
            *state = ReceiverState::AwaitingFrame;
        }
        let _guard = PullGuard(&self.state);
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match self.capture(remaining, audio).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    trace!(source = %self.options.source.name, timeout_ms = timeout.as_millis() as u64, "Pull timed out");
                    return Err(Error::Timeout(timeout));
                }
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Err(e) => {
                    warn!(source = %self.options.source.name, error = %e, "Capture failed");
                    return Err(e);
                }
            };

            let kind = frame.kind();
            if want.is_some_and(|want| want != kind) {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                trace!(source = %self.options.source.name, %kind, "Discarding frame");
                if remaining.is_zero() {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::Timeout(timeout));
                }
                continue;
            }

            if let Err(reason) = frame.validate() {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(source = %self.options.source.name, %kind, %reason, "Malformed frame");
                return Err(Error::MalformedFrame(reason));
            }
            self.counters.record(kind);
            return Ok(frame);
        }
    }

    async fn capture(&self, timeout: Duration, audio: AudioPullOptions) -> Result<Option<Frame>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Error::SessionClosed);
        }
        tokio::select! {
            captured = self.join_capture(timeout, audio) => captured,
            _ = wait_closed(closed) => Err(Error::SessionClosed),
            _ = tokio::time::sleep(timeout + CAPTURE_GRACE) => Ok(None),
        }
    }

    /// Await the capture in flight, starting one if there is none. The task
    /// stays in `in_flight` until it finishes, so a cancelled pull loses
    /// no frame.
    async fn join_capture(&self, timeout: Duration, audio: AudioPullOptions) -> Result<Option<Frame>> {
        loop {
            let resumed = {
                let mut in_flight = self.in_flight.lock();
                if in_flight.is_some() {
                    true
                } else {
                    let handle = self.handle.clone();
                    *in_flight = Some(tokio::task::spawn_blocking(move || handle.capture(timeout, &audio)));
                    false
                }
            };

            let joined = poll_fn(|cx| {
                let mut in_flight = self.in_flight.lock();
                let Some(task) = in_flight.as_mut() else {
                    return Poll::Ready(None);
                };
                match Pin::new(task).poll(cx) {
                    Poll::Ready(joined) => {
                        *in_flight = None;
                        Poll::Ready(Some(joined))
                    }
                    Poll::Pending => Poll::Pending,
                }
            })
            .await;

            match joined {
                // Finished and taken by another pull on this receiver
                None => continue,
                // An abandoned capture that came up empty says nothing about this deadline
                Some(Ok(Ok(None))) if resumed => {
                    trace!(source = %self.options.source.name, "Resumed capture was empty");
                    continue;
                }
                Some(joined) => return Ok(joined??),
            }
        }
    }

    /// Release the engine connection. Pulls in flight fail with
    /// [`Error::SessionClosed`]. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == ReceiverState::Closed {
                return;
            }
            *state = ReceiverState::Closed;
        }
        self.closed.send_replace(true);
        self.handle.close();
        let stats = self.stats();
        debug!(?stats, "Receiver statistics");
        info!(source = %self.options.source.name, "Receiver closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ReceiverState::Closed
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.lock()
    }

    pub fn source(&self) -> &Source {
        &self.options.source
    }

    pub fn options(&self) -> &ReceiverOptions {
        &self.options
    }

    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(source = %self.options.source.name, "Receiver dropped without close");
            self.close();
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}
