//! In-process engine
//!
//! ```text
//!                 ┌──────────────── LoopbackNetwork ────────────────┐
//!  LoopbackEngine │  senders: name -> Advertisement                 │
//!  (host "a") ───►│  links:   name -> [Connection (FrameQueue)]     │◄─── LoopbackEngine
//!                 │  watchers: discovery subscriptions              │     (host "b")
//!                 └─────────────────────────────────────────────────┘
//! ```
//!
//! Every engine attached to the same network sees the same senders. A
//! receiver may connect to a name before anything advertises it; frames start
//! flowing once a sender with that name opens.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::clock::FrameClock;
use super::convert::{convert_audio, convert_video, downscale_half, weave_fields};
use super::queue::FrameQueue;
use super::{Discovery, Engine, EngineReceiver, EngineSender, ReceiverSpec, SenderSpec};
use crate::config::{AudioPullOptions, DiscoveryFilter};
use crate::error::EngineError;
use crate::frame::{AudioFrame, Bandwidth, Frame, FrameFieldType, MetadataFrame, StatusChange, VideoFrame};
use crate::protocol::{Capabilities, DiscoveryEvent, Source, StatusCode};

const DEFAULT_GROUP: &str = "public";
const FIRST_PORT: u16 = 5961;
const FALLBACK_FRAME_PERIOD: Duration = Duration::from_millis(40);

/// A machine taking part in the loopback network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackHost {
    pub name: String,
    pub ip: String,
    /// Whether senders on this host show up in passive discovery
    pub advertised: bool,
}

impl LoopbackHost {
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            advertised: true,
        }
    }

    /// Hide this host's senders unless a finder lists its IP explicitly
    pub fn unadvertised(mut self) -> Self {
        self.advertised = false;
        self
    }
}

struct Advertisement {
    source: Source,
    host: LoopbackHost,
    groups: Vec<String>,
    serial: u64,
}

struct Watcher {
    id: Uuid,
    host: LoopbackHost,
    filter: DiscoveryFilter,
    events: Sender<DiscoveryEvent>,
}

/// One receiver attachment. Converts frames to what the receiver asked for.
struct Connection {
    id: Uuid,
    spec: ReceiverSpec,
    queue: FrameQueue,
    pending_field: Mutex<Option<VideoFrame>>,
}

impl Connection {
    fn offer(&self, frame: &Frame) {
        let bandwidth = self.spec.bandwidth;
        match frame {
            Frame::Video(video) => {
                if !bandwidth.carries_video() {
                    return;
                }
                let video = if !self.spec.allow_video_fields && video.frame_format_type.is_field() {
                    match self.weave(video) {
                        Some(woven) => woven,
                        None => return,
                    }
                } else {
                    video.clone()
                };
                let video = if bandwidth == Bandwidth::Lowest {
                    downscale_half(&video)
                } else {
                    video
                };
                self.queue.push(Frame::Video(convert_video(&video, self.spec.color_format)));
            }
            Frame::Audio(_) if !bandwidth.carries_audio() => {}
            other => {
                self.queue.push(other.clone());
            }
        }
    }

    fn weave(&self, field: &VideoFrame) -> Option<VideoFrame> {
        let mut pending = self.pending_field.lock();
        match field.frame_format_type {
            FrameFieldType::Field0 => {
                *pending = Some(field.clone());
                None
            }
            _ => {
                let first = pending.take();
                let woven = first.as_ref().and_then(|first| weave_fields(first, field));
                if woven.is_none() {
                    trace!(connection = %self.id, "dropping unpaired field");
                }
                woven
            }
        }
    }

    fn status(&self, code: StatusCode, description: &str) {
        self.queue.push(Frame::StatusChange(StatusChange::new(code, description)));
    }
}

struct NetworkInner {
    senders: DashMap<String, Arc<Advertisement>>,
    links: DashMap<String, Vec<Arc<Connection>>>,
    watchers: Mutex<Vec<Watcher>>,
    next_serial: AtomicU64,
    next_port: AtomicU16,
}

/// Shared medium connecting loopback engines
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                senders: DashMap::new(),
                links: DashMap::new(),
                watchers: Mutex::new(Vec::new()),
                next_serial: AtomicU64::new(0),
                next_port: AtomicU16::new(FIRST_PORT),
            }),
        }
    }

    /// Names currently advertised, in the order they opened
    pub fn advertised(&self) -> Vec<String> {
        let mut ads: Vec<_> = self.inner.senders.iter().map(|e| e.value().clone()).collect();
        ads.sort_by_key(|ad| ad.serial);
        ads.into_iter().map(|ad| ad.source.name.clone()).collect()
    }

    fn advertise(&self, spec: &SenderSpec, host: &LoopbackHost) -> Result<Arc<Advertisement>, EngineError> {
        let mut watchers = self.inner.watchers.lock();
        if self.inner.senders.contains_key(&spec.name) {
            return Err(EngineError::CreateFailed(format!(
                "sender '{}' is already advertised",
                spec.name
            )));
        }
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let groups = match &spec.groups {
            Some(groups) => split_groups(groups),
            None => vec![DEFAULT_GROUP.to_string()],
        };
        let ad = Arc::new(Advertisement {
            source: Source::new(&spec.name)
                .with_url_address(format!("{}:{}", host.ip, port))
                .with_ip_address(&host.ip),
            host: host.clone(),
            groups,
            serial: self.inner.next_serial.fetch_add(1, Ordering::Relaxed),
        });
        self.inner.senders.insert(spec.name.clone(), ad.clone());

        watchers.retain(|w| {
            !visible(&w.filter, &w.host, &ad) || w.events.send(DiscoveryEvent::Added(ad.source.clone())).is_ok()
        });
        drop(watchers);

        if let Some(links) = self.inner.links.get(&spec.name) {
            for conn in links.iter() {
                conn.status(StatusCode::Connected, &spec.name);
            }
        }
        Ok(ad)
    }

    fn withdraw(&self, name: &str) {
        let mut watchers = self.inner.watchers.lock();
        let Some((_, ad)) = self.inner.senders.remove(name) else {
            return;
        };
        watchers.retain(|w| {
            !visible(&w.filter, &w.host, &ad) || w.events.send(DiscoveryEvent::Removed(name.to_string())).is_ok()
        });
        drop(watchers);

        if let Some(links) = self.inner.links.get(name) {
            for conn in links.iter() {
                conn.status(StatusCode::Disconnected, name);
            }
        }
    }

    fn subscribe(&self, host: &LoopbackHost, filter: &DiscoveryFilter) -> LoopbackDiscovery {
        let (tx, rx) = unbounded();
        let id = Uuid::new_v4();
        let mut watchers = self.inner.watchers.lock();

        let mut initial: Vec<_> = self
            .inner
            .senders
            .iter()
            .filter(|e| visible(filter, host, e.value()))
            .map(|e| e.value().clone())
            .collect();
        initial.sort_by_key(|ad| ad.serial);
        for ad in initial {
            let _ = tx.send(DiscoveryEvent::Added(ad.source.clone()));
        }
        let _ = tx.send(DiscoveryEvent::CycleComplete);

        watchers.push(Watcher {
            id,
            host: host.clone(),
            filter: filter.clone(),
            events: tx,
        });
        LoopbackDiscovery {
            id,
            network: self.clone(),
            events: rx,
            closed: AtomicBool::new(false),
        }
    }

    fn unsubscribe(&self, id: Uuid) {
        self.inner.watchers.lock().retain(|w| w.id != id);
    }

    fn attach(&self, spec: &ReceiverSpec) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            id: Uuid::new_v4(),
            spec: spec.clone(),
            queue: FrameQueue::new(spec.queue_depth),
            pending_field: Mutex::new(None),
        });
        let name = &spec.source.name;
        self.inner.links.entry(name.clone()).or_default().push(conn.clone());
        if self.inner.senders.contains_key(name) {
            conn.status(StatusCode::Connected, name);
        }
        conn
    }

    fn detach(&self, name: &str, id: Uuid) {
        if let Some(mut links) = self.inner.links.get_mut(name) {
            links.retain(|c| c.id != id);
        }
        self.inner.links.remove_if(name, |_, links| links.is_empty());
    }

    fn deliver(&self, name: &str, frame: &Frame) {
        if let Some(links) = self.inner.links.get(name) {
            for conn in links.iter() {
                conn.offer(frame);
            }
        }
    }

    fn connection_count(&self, name: &str) -> usize {
        self.inner.links.get(name).map(|links| links.len()).unwrap_or(0)
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn split_groups(list: &str) -> Vec<String> {
    list.split(',')
        .map(|g| g.trim().to_lowercase())
        .filter(|g| !g.is_empty())
        .collect()
}

fn visible(filter: &DiscoveryFilter, host: &LoopbackHost, ad: &Advertisement) -> bool {
    if ad.host.name == host.name && !filter.show_local_sources {
        return false;
    }
    let wanted = match &filter.groups {
        Some(groups) => split_groups(groups),
        None => vec![DEFAULT_GROUP.to_string()],
    };
    if !wanted.iter().any(|g| ad.groups.contains(g)) {
        return false;
    }
    if ad.host.advertised {
        return true;
    }
    filter
        .extra_ips
        .as_deref()
        .map(|ips| ips.split(',').any(|ip| ip.trim() == ad.host.ip))
        .unwrap_or(false)
}

/// Engine whose transport is a [`LoopbackNetwork`]
pub struct LoopbackEngine {
    network: LoopbackNetwork,
    host: LoopbackHost,
    cpu_supported: bool,
}

impl LoopbackEngine {
    pub fn new(network: LoopbackNetwork, host: LoopbackHost) -> Self {
        Self {
            network,
            host,
            cpu_supported: true,
        }
    }

    /// An engine that reports the running CPU as unsupported
    pub fn unsupported(network: LoopbackNetwork, host: LoopbackHost) -> Self {
        Self {
            cpu_supported: false,
            ..Self::new(network, host)
        }
    }

    pub fn host(&self) -> &LoopbackHost {
        &self.host
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    fn ensure_supported(&self) -> Result<(), EngineError> {
        if self.cpu_supported {
            Ok(())
        } else {
            Err(EngineError::Unavailable("CPU not supported".to_string()))
        }
    }
}

impl Engine for LoopbackEngine {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            version: format!("loopback {}", env!("CARGO_PKG_VERSION")),
            cpu_supported: self.cpu_supported,
        }
    }

    fn discover(&self, filter: &DiscoveryFilter) -> Result<Box<dyn Discovery>, EngineError> {
        self.ensure_supported()?;
        debug!(host = %self.host.name, ?filter, "Starting loopback discovery");
        Ok(Box::new(self.network.subscribe(&self.host, filter)))
    }

    fn open_receiver(&self, spec: &ReceiverSpec) -> Result<Box<dyn EngineReceiver>, EngineError> {
        self.ensure_supported()?;
        let conn = self.network.attach(spec);
        debug!(source = %spec.source.name, connection = %conn.id, "Receiver attached");
        Ok(Box::new(LoopbackReceiver {
            network: self.network.clone(),
            conn,
            closed: AtomicBool::new(false),
        }))
    }

    fn open_sender(&self, spec: &SenderSpec) -> Result<Box<dyn EngineSender>, EngineError> {
        self.ensure_supported()?;
        let ad = self.network.advertise(spec, &self.host)?;
        info!(source = %ad.source, host = %self.host.name, "Sender advertised");
        Ok(Box::new(LoopbackSender {
            network: self.network.clone(),
            source: ad.source.clone(),
            video_clock: spec.clock_video.then(FrameClock::new),
            audio_clock: spec.clock_audio.then(FrameClock::new),
            closed: AtomicBool::new(false),
        }))
    }
}

struct LoopbackDiscovery {
    id: Uuid,
    network: LoopbackNetwork,
    events: Receiver<DiscoveryEvent>,
    closed: AtomicBool,
}

impl Discovery for LoopbackDiscovery {
    fn next_event(&self, timeout: Duration) -> Result<Option<DiscoveryEvent>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.unsubscribe(self.id);
        }
    }
}

impl Drop for LoopbackDiscovery {
    fn drop(&mut self) {
        self.close();
    }
}

struct LoopbackReceiver {
    network: LoopbackNetwork,
    conn: Arc<Connection>,
    closed: AtomicBool,
}

impl EngineReceiver for LoopbackReceiver {
    fn capture(&self, timeout: Duration, audio: &AudioPullOptions) -> Result<Option<Frame>, EngineError> {
        let frame = self.conn.queue.pop_timeout(timeout)?;
        Ok(frame.map(|frame| match frame {
            Frame::Audio(samples) => match convert_audio(&samples, audio) {
                Some(converted) => Frame::Audio(converted),
                None => Frame::Audio(samples),
            },
            other => other,
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.detach(&self.conn.spec.source.name, self.conn.id);
            self.conn.queue.close();
            debug!(
                connection = %self.conn.id,
                dropped = self.conn.queue.overflow_count(),
                "Receiver detached"
            );
        }
    }
}

impl Drop for LoopbackReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

struct LoopbackSender {
    network: LoopbackNetwork,
    source: Source,
    video_clock: Option<FrameClock>,
    audio_clock: Option<FrameClock>,
    closed: AtomicBool,
}

impl LoopbackSender {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

impl EngineSender for LoopbackSender {
    fn source(&self) -> Source {
        self.source.clone()
    }

    fn send_video(&self, frame: &VideoFrame) -> Result<(), EngineError> {
        self.ensure_open()?;
        if let Some(clock) = &self.video_clock {
            clock.wait(frame.duration().unwrap_or(FALLBACK_FRAME_PERIOD));
        }
        self.network.deliver(&self.source.name, &Frame::Video(frame.clone()));
        Ok(())
    }

    fn send_audio(&self, frame: &AudioFrame) -> Result<(), EngineError> {
        self.ensure_open()?;
        if let Some(clock) = &self.audio_clock {
            clock.wait(frame.duration().unwrap_or(FALLBACK_FRAME_PERIOD));
        }
        self.network.deliver(&self.source.name, &Frame::Audio(frame.clone()));
        Ok(())
    }

    fn send_metadata(&self, frame: &MetadataFrame) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.network.deliver(&self.source.name, &Frame::Metadata(frame.clone()));
        Ok(())
    }

    fn connections(&self) -> usize {
        self.network.connection_count(&self.source.name)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.withdraw(&self.source.name);
            info!(source = %self.source.name, "Sender withdrawn");
        }
    }
}

impl Drop for LoopbackSender {
    fn drop(&mut self) {
        self.close();
    }
}
