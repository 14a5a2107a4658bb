//! # ndi-session
//!
//! Source discovery and frame-exchange sessions for NDI-style networks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Context                                │
//! │                                                                      │
//! │  ┌───────────────────┐   ┌────────────────┐   ┌────────────────┐     │
//! │  │      Finder       │   │    Receiver    │   │     Sender     │     │
//! │  │  ┌─────────────┐  │   │  pull / pull_* │   │  push_*        │     │
//! │  │  │ ndi-finder  │  │   │  Idle ⇄ Await  │   │  clocked sends │     │
//! │  │  │   thread    │  │   └───────┬────────┘   └───────┬────────┘     │
//! │  │  └──────┬──────┘  │           │ spawn_blocking     │              │
//! │  │         ▼         │           │                    │              │
//! │  │  SourceRegistry   │           │                    │              │
//! │  └─────────┬─────────┘           │                    │              │
//! └────────────┼─────────────────────┼────────────────────┼──────────────┘
//!              │ discover            │ capture            │ send
//!              ▼                     ▼                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                    Engine (engine::Engine trait)                     │
//! │      LoopbackEngine: queues, pixel/audio conversion, frame clock     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod finder;
pub mod frame;
pub mod protocol;
#[cfg(feature = "receiver")]
pub mod receiver;
pub mod registry;
#[cfg(feature = "sender")]
pub mod sender;

pub use config::{AudioPullOptions, FilterList, FinderOptions, ReceiverOptions, SenderOptions, Settings};
pub use engine::{Engine, LoopbackEngine, LoopbackHost, LoopbackNetwork};
pub use error::{EngineError, Error, Result};
pub use finder::Finder;
pub use frame::{
    AudioFormat, AudioFrame, Bandwidth, ColorFormat, FourCC, Frame, FrameFieldType, FrameKind,
    MetadataFrame, StatusChange, Timestamp, VideoFrame,
};
pub use protocol::{Capabilities, Source, StatusCode};
#[cfg(feature = "receiver")]
pub use receiver::{Receiver, ReceiverState, ReceiverStats};
#[cfg(feature = "sender")]
pub use sender::{Sender, SenderStats};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Library-wide constants
pub mod constants {
    /// Default pull deadline
    pub const DEFAULT_PULL_TIMEOUT_MS: u64 = 10_000;

    /// Default budget for a one-shot find
    pub const DEFAULT_FIND_TIMEOUT_MS: u64 = 10_000;

    /// Frames buffered per receiver connection
    pub const DEFAULT_RECEIVER_QUEUE_DEPTH: usize = 16;

    /// How often the finder thread checks whether it should stop
    pub const DISCOVERY_POLL_INTERVAL_MS: u64 = 100;
}

/// Version string reported by `engine`
pub fn version(engine: &dyn Engine) -> String {
    engine.capabilities().version
}

/// Whether `engine` can run on this CPU
pub fn is_supported_cpu(engine: &dyn Engine) -> bool {
    engine.capabilities().cpu_supported
}

/// Process-wide entry point.
///
/// Create one at startup, open finders and sessions through it, and call
/// [`Context::shutdown`] when done.
pub struct Context {
    engine: Arc<dyn Engine>,
    settings: Settings,
    capabilities: Capabilities,
}

impl Context {
    /// Initialize with default settings
    pub fn new(engine: Arc<dyn Engine>) -> Result<Self> {
        Self::with_settings(engine, Settings::default())
    }

    /// Initialize with explicit settings.
    /// Fails with [`Error::EngineUnavailable`] if the engine cannot run here.
    pub fn with_settings(engine: Arc<dyn Engine>, settings: Settings) -> Result<Self> {
        settings.validate()?;
        let capabilities = engine.capabilities();
        if !capabilities.cpu_supported {
            return Err(Error::EngineUnavailable(format!(
                "{} does not support this CPU",
                capabilities.version
            )));
        }
        info!(version = %capabilities.version, "Engine initialized");
        Ok(Self {
            engine,
            settings,
            capabilities,
        })
    }

    pub fn version(&self) -> &str {
        &self.capabilities.version
    }

    pub fn is_supported_cpu(&self) -> bool {
        self.capabilities.cpu_supported
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Start a long-lived finder
    pub fn finder(&self, options: FinderOptions) -> Result<Finder> {
        Finder::new(self.engine.as_ref(), options)
    }

    /// Discover once. Options default to the settings' finder section and
    /// the timeout to `find_timeout_ms`.
    pub async fn find(&self, options: Option<FinderOptions>, timeout: Option<Duration>) -> Result<Vec<Source>> {
        let options = options.unwrap_or_else(|| self.settings.finder.clone());
        let timeout = timeout.unwrap_or_else(|| self.settings.find_timeout());
        finder::find(self.engine.clone(), options, Some(timeout)).await
    }

    /// Open a receiver session
    #[cfg(feature = "receiver")]
    pub fn receive(&self, options: ReceiverOptions) -> Result<Receiver> {
        Receiver::open(self.engine.as_ref(), options, &self.settings)
    }

    /// Open a sender session
    #[cfg(feature = "sender")]
    pub fn send(&self, options: SenderOptions) -> Result<Sender> {
        Sender::open(self.engine.as_ref(), options)
    }

    /// Tear down. Sessions opened from this context keep their own engine
    /// handles and must still be closed.
    pub fn shutdown(self) {
        info!(version = %self.capabilities.version, "Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_engine(network: &LoopbackNetwork, host: &str) -> Arc<dyn Engine> {
        Arc::new(LoopbackEngine::new(network.clone(), LoopbackHost::new(host, "10.0.0.2")))
    }

    #[test]
    fn test_unsupported_cpu() {
        let engine: Arc<dyn Engine> = Arc::new(LoopbackEngine::unsupported(
            LoopbackNetwork::new(),
            LoopbackHost::new("old", "10.0.0.9"),
        ));
        assert!(!is_supported_cpu(engine.as_ref()));
        assert!(matches!(Context::new(engine), Err(Error::EngineUnavailable(_))));
    }

    #[test]
    fn test_version() {
        let engine = network_engine(&LoopbackNetwork::new(), "studio");
        let context = Context::new(engine.clone()).unwrap();
        assert!(context.is_supported_cpu());
        assert_eq!(context.version(), version(engine.as_ref()));
        assert!(context.version().contains(env!("CARGO_PKG_VERSION")));
        context.shutdown();
    }

    #[test]
    fn test_rejects_bad_settings() {
        let engine = network_engine(&LoopbackNetwork::new(), "studio");
        let settings = Settings {
            receiver_queue_depth: 0,
            ..Settings::default()
        };
        assert!(matches!(
            Context::with_settings(engine, settings),
            Err(Error::Config(_))
        ));
    }

    #[cfg(feature = "sender")]
    #[tokio::test]
    async fn test_find_uses_settings_defaults() {
        let network = LoopbackNetwork::new();
        let context = Context::new(network_engine(&network, "studio")).unwrap();
        let settings = Settings {
            finder: FinderOptions::default().show_local_sources(true),
            ..Settings::default()
        };
        let local = Context::with_settings(network_engine(&network, "studio"), settings).unwrap();

        let sender = context.send(SenderOptions::new("CAM1")).unwrap();
        assert!(context.find(None, None).await.unwrap().is_empty());
        assert_eq!(local.find(None, None).await.unwrap()[0].name, "CAM1");
        sender.close();
    }
}
