//! Source discovery
//!
//! A [`Finder`] runs one engine discovery subscription on a background thread
//! and folds its events into a [`SourceRegistry`]. Queries never block on the
//! engine; they read a snapshot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::FinderOptions;
use crate::constants::{DEFAULT_FIND_TIMEOUT_MS, DISCOVERY_POLL_INTERVAL_MS};
use crate::engine::{Discovery, Engine};
use crate::error::{EngineError, Error, Result};
use crate::protocol::{DiscoveryEvent, Source};
use crate::registry::SourceRegistry;

/// Live view of the sources on the network
pub struct Finder {
    options: FinderOptions,
    registry: Arc<SourceRegistry>,
    discovery: Arc<dyn Discovery>,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Finder {
    /// Start discovering immediately
    pub fn new(engine: &dyn Engine, options: FinderOptions) -> Result<Self> {
        let filter = options.to_filter();
        let discovery: Arc<dyn Discovery> = Arc::from(engine.discover(&filter)?);
        let registry = Arc::new(SourceRegistry::new());
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let registry = registry.clone();
            let discovery = discovery.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("ndi-finder".to_string())
                .spawn(move || run_discovery(discovery.as_ref(), &registry, &running))?
        };

        info!(
            show_local = filter.show_local_sources,
            groups = ?filter.groups,
            extra_ips = ?filter.extra_ips,
            "Finder started"
        );
        Ok(Self {
            options,
            registry,
            discovery,
            running,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Sources known right now, in arrival order
    pub fn get_current_sources(&self) -> Vec<Source> {
        self.registry.snapshot()
    }

    /// Wait up to `timeout` for the set of sources to change.
    /// Returns true if it did.
    pub fn wait_for_sources(&self, timeout: Duration) -> bool {
        let seen = self.registry.generation();
        self.registry.wait_for_change(seen, Instant::now() + timeout)
    }

    /// Wait up to `timeout` for the engine to finish a first discovery pass.
    /// Returns early, false, if discovery faults first.
    pub fn wait_for_cycle(&self, timeout: Duration) -> bool {
        self.registry.wait_for_cycle(Instant::now() + timeout)
    }

    /// The fault that stopped discovery, if any. Sources listed after a
    /// fault are the last ones seen before it.
    pub fn error(&self) -> Option<EngineError> {
        self.registry.fault()
    }

    pub fn options(&self) -> &FinderOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        !self.running.load(Ordering::SeqCst)
    }

    /// Stop discovery and release the engine subscription. Idempotent.
    pub fn dispose(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.registry.freeze();
        self.discovery.close();
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
        debug!(sources = self.registry.len(), "Finder disposed");
    }
}

impl Drop for Finder {
    fn drop(&mut self) {
        if !self.is_disposed() {
            warn!("Finder dropped without dispose");
            self.dispose();
        }
    }
}

fn run_discovery(discovery: &dyn Discovery, registry: &SourceRegistry, running: &AtomicBool) {
    let poll = Duration::from_millis(DISCOVERY_POLL_INTERVAL_MS);
    while running.load(Ordering::Relaxed) {
        match discovery.next_event(poll) {
            Ok(Some(DiscoveryEvent::Added(source))) => {
                trace!(source = %source, "Source seen");
                registry.upsert(source);
            }
            Ok(Some(DiscoveryEvent::Removed(name))) => {
                trace!(source = %name, "Source gone");
                registry.remove(&name);
            }
            Ok(Some(DiscoveryEvent::CycleComplete)) => registry.complete_cycle(),
            Ok(None) => {}
            Err(EngineError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "Discovery subscription failed");
                registry.fail(e);
                break;
            }
        }
    }
}

/// Discover once and return what was found.
///
/// Waits up to `timeout` (10s by default) for the engine to complete a
/// discovery pass. An empty result after a completed pass is not an error;
/// no completed pass is [`Error::DiscoveryTimeout`]. A discovery fault is
/// returned as soon as the engine reports it.
pub async fn find(
    engine: Arc<dyn Engine>,
    options: FinderOptions,
    timeout: Option<Duration>,
) -> Result<Vec<Source>> {
    let timeout = timeout.unwrap_or(Duration::from_millis(DEFAULT_FIND_TIMEOUT_MS));
    tokio::task::spawn_blocking(move || {
        let finder = Finder::new(engine.as_ref(), options)?;
        let completed = finder.wait_for_cycle(timeout);
        let sources = finder.get_current_sources();
        let fault = finder.error();
        finder.dispose();
        if let Some(err) = fault {
            return Err(Error::from(err));
        }
        if completed {
            Ok(sources)
        } else {
            debug!(timeout_ms = timeout.as_millis() as u64, "No discovery pass completed");
            Err(Error::DiscoveryTimeout(timeout))
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryFilter;
    use crate::engine::{
        EngineReceiver, EngineSender, LoopbackEngine, LoopbackHost, LoopbackNetwork, ReceiverSpec, SenderSpec,
    };
    use crate::protocol::Capabilities;

    /// Discovery that reports one source, then loses its socket
    struct BrokenDiscovery {
        announced: AtomicBool,
    }

    impl Discovery for BrokenDiscovery {
        fn next_event(&self, _timeout: Duration) -> std::result::Result<Option<DiscoveryEvent>, EngineError> {
            if !self.announced.swap(true, Ordering::SeqCst) {
                return Ok(Some(DiscoveryEvent::Added(Source::new("CAM1"))));
            }
            Err(EngineError::Transport("mdns socket failed".into()))
        }

        fn close(&self) {}
    }

    struct BrokenEngine;

    impl Engine for BrokenEngine {
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                version: "broken".to_string(),
                cpu_supported: true,
            }
        }

        fn discover(&self, _filter: &DiscoveryFilter) -> std::result::Result<Box<dyn Discovery>, EngineError> {
            Ok(Box::new(BrokenDiscovery {
                announced: AtomicBool::new(false),
            }))
        }

        fn open_receiver(&self, _spec: &ReceiverSpec) -> std::result::Result<Box<dyn EngineReceiver>, EngineError> {
            Err(EngineError::CreateFailed("receiver".to_string()))
        }

        fn open_sender(&self, _spec: &SenderSpec) -> std::result::Result<Box<dyn EngineSender>, EngineError> {
            Err(EngineError::CreateFailed("sender".to_string()))
        }
    }

    fn sender_spec(name: &str) -> SenderSpec {
        SenderSpec {
            name: name.to_string(),
            groups: None,
            clock_video: false,
            clock_audio: false,
        }
    }

    fn setup() -> (LoopbackEngine, LoopbackEngine) {
        let network = LoopbackNetwork::new();
        (
            LoopbackEngine::new(network.clone(), LoopbackHost::new("studio", "10.0.0.2")),
            LoopbackEngine::new(network, LoopbackHost::new("desk", "10.0.0.3")),
        )
    }

    #[test]
    fn test_finder_tracks_sources() {
        let (studio, desk) = setup();
        let cam1 = studio.open_sender(&sender_spec("CAM1")).unwrap();
        let finder = Finder::new(&desk, FinderOptions::default()).unwrap();
        assert!(finder.wait_for_cycle(Duration::from_secs(2)));
        assert_eq!(finder.get_current_sources()[0].name, "CAM1");

        let _cam2 = studio.open_sender(&sender_spec("CAM2")).unwrap();
        assert!(finder.wait_for_sources(Duration::from_secs(2)));
        let names: Vec<_> = finder.get_current_sources().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["CAM1", "CAM2"]);

        cam1.close();
        assert!(finder.wait_for_sources(Duration::from_secs(2)));
        assert_eq!(finder.get_current_sources().len(), 1);
        finder.dispose();
    }

    #[test]
    fn test_snapshot_idempotent() {
        let (studio, desk) = setup();
        let _cam1 = studio.open_sender(&sender_spec("CAM1")).unwrap();
        let finder = Finder::new(&desk, FinderOptions::default()).unwrap();
        assert!(finder.wait_for_cycle(Duration::from_secs(2)));
        assert_eq!(finder.get_current_sources(), finder.get_current_sources());
        finder.dispose();
    }

    #[test]
    fn test_dispose_freezes_and_is_idempotent() {
        let (studio, desk) = setup();
        let finder = Finder::new(&desk, FinderOptions::default()).unwrap();
        assert!(finder.wait_for_cycle(Duration::from_secs(2)));
        finder.dispose();
        assert!(finder.is_disposed());

        let _cam1 = studio.open_sender(&sender_spec("CAM1")).unwrap();
        assert!(!finder.wait_for_sources(Duration::from_millis(50)));
        assert!(finder.get_current_sources().is_empty());
        finder.dispose();
    }

    #[test]
    fn test_unavailable_engine() {
        let engine = LoopbackEngine::unsupported(LoopbackNetwork::new(), LoopbackHost::new("old", "10.0.0.9"));
        assert!(matches!(
            Finder::new(&engine, FinderOptions::default()),
            Err(Error::EngineUnavailable(_))
        ));
    }

    #[test]
    fn test_discovery_fault_is_reported() {
        let finder = Finder::new(&BrokenEngine, FinderOptions::default()).unwrap();
        let start = Instant::now();
        assert!(!finder.wait_for_cycle(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            finder.error(),
            Some(EngineError::Transport("mdns socket failed".into()))
        );
        assert_eq!(finder.get_current_sources(), vec![Source::new("CAM1")]);
        finder.dispose();
    }

    #[tokio::test]
    async fn test_find_fails_fast_on_fault() {
        let start = Instant::now();
        let result = find(Arc::new(BrokenEngine), FinderOptions::default(), Some(Duration::from_secs(5))).await;
        match result {
            Err(e @ Error::Engine(EngineError::Transport(_))) => assert!(!e.is_retryable()),
            other => panic!("expected engine fault, got {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_find_returns_empty_after_cycle() {
        let (_, desk) = setup();
        let engine: Arc<dyn Engine> = Arc::new(desk);
        let sources = find(engine, FinderOptions::default(), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert!(sources.is_empty());
    }
}
