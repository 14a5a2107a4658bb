//! Configuration: per-operation options and process-wide settings
//!
//! Option structs deserialize from loosely shaped input (a group list may be
//! a single string or an array) and are normalized here, once, before any
//! value reaches the engine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_FIND_TIMEOUT_MS, DEFAULT_PULL_TIMEOUT_MS, DEFAULT_RECEIVER_QUEUE_DEPTH};
use crate::error::{Error, Result};
use crate::frame::{AudioFormat, Bandwidth, ColorFormat};
use crate::protocol::Source;

/// A filter given either as one comma-separated string or as a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterList {
    Joined(String),
    Items(Vec<String>),
}

impl FilterList {
    /// Engine-facing form of this filter
    pub fn normalize(&self) -> Option<String> {
        match self {
            FilterList::Joined(joined) => normalize_filter(joined.split(',')),
            FilterList::Items(items) => normalize_filter(items.iter().flat_map(|item| item.split(','))),
        }
    }
}

impl From<&str> for FilterList {
    fn from(value: &str) -> Self {
        FilterList::Joined(value.to_string())
    }
}

impl From<String> for FilterList {
    fn from(value: String) -> Self {
        FilterList::Joined(value)
    }
}

impl From<Vec<String>> for FilterList {
    fn from(value: Vec<String>) -> Self {
        FilterList::Items(value)
    }
}

impl From<Vec<&str>> for FilterList {
    fn from(value: Vec<&str>) -> Self {
        FilterList::Items(value.into_iter().map(str::to_string).collect())
    }
}

/// Trim entries, drop empty ones and join the rest with commas.
/// Returns `None` when nothing remains.
pub fn normalize_filter<'a, I>(items: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = items
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Discovery settings as handed to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub show_local_sources: bool,
    pub groups: Option<String>,
    pub extra_ips: Option<String>,
}

/// Options for creating a finder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FinderOptions {
    /// Include sources running on this host
    pub show_local_sources: bool,
    /// Only show sources in these groups
    pub groups: Option<FilterList>,
    /// Hosts to probe directly, outside of passive discovery
    #[serde(rename = "extraIPs", alias = "extra_ips")]
    pub extra_ips: Option<FilterList>,
}

impl FinderOptions {
    pub fn show_local_sources(mut self, show: bool) -> Self {
        self.show_local_sources = show;
        self
    }

    pub fn groups(mut self, groups: impl Into<FilterList>) -> Self {
        self.groups = Some(groups.into());
        self
    }

    pub fn extra_ips(mut self, extra_ips: impl Into<FilterList>) -> Self {
        self.extra_ips = Some(extra_ips.into());
        self
    }

    pub fn to_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            show_local_sources: self.show_local_sources,
            groups: self.groups.as_ref().and_then(FilterList::normalize),
            extra_ips: self.extra_ips.as_ref().and_then(FilterList::normalize),
        }
    }
}

/// Options for opening a receiver session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverOptions {
    pub source: Source,
    #[serde(default)]
    pub color_format: ColorFormat,
    #[serde(default)]
    pub bandwidth: Bandwidth,
    /// Deliver interlaced video as separate fields
    #[serde(default = "default_true")]
    pub allow_video_fields: bool,
    /// Name this receiver reports to the source
    #[serde(default)]
    pub name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ReceiverOptions {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            color_format: ColorFormat::default(),
            bandwidth: Bandwidth::default(),
            allow_video_fields: true,
            name: None,
        }
    }

    pub fn color_format(mut self, color_format: ColorFormat) -> Self {
        self.color_format = color_format;
        self
    }

    pub fn bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn allow_video_fields(mut self, allow: bool) -> Self {
        self.allow_video_fields = allow;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.name.trim().is_empty() {
            return Err(Error::InvalidOptions("receiver source has no name".to_string()));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(Error::InvalidOptions("receiver name is empty".to_string()));
        }
        Ok(())
    }
}

/// Sample layout requested for audio pulls; conversion happens in the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioPullOptions {
    pub audio_format: AudioFormat,
    /// Headroom in dB for integer conversion
    pub reference_level: f32,
}

impl Default for AudioPullOptions {
    fn default() -> Self {
        Self {
            audio_format: AudioFormat::Float32Separate,
            reference_level: 0.0,
        }
    }
}

impl AudioPullOptions {
    pub fn new(audio_format: AudioFormat, reference_level: f32) -> Self {
        Self {
            audio_format,
            reference_level,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.reference_level.is_finite() {
            return Err(Error::InvalidOptions(format!(
                "reference level {} is not finite",
                self.reference_level
            )));
        }
        Ok(())
    }
}

/// Options for opening a sender session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderOptions {
    pub name: String,
    #[serde(default)]
    pub groups: Option<FilterList>,
    /// Block video pushes to the declared frame rate
    #[serde(default)]
    pub clock_video: bool,
    /// Block audio pushes to the declared sample rate
    #[serde(default)]
    pub clock_audio: bool,
}

impl SenderOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: None,
            clock_video: false,
            clock_audio: false,
        }
    }

    pub fn groups(mut self, groups: impl Into<FilterList>) -> Self {
        self.groups = Some(groups.into());
        self
    }

    pub fn clock_video(mut self, clock: bool) -> Self {
        self.clock_video = clock;
        self
    }

    pub fn clock_audio(mut self, clock: bool) -> Self {
        self.clock_audio = clock;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidOptions("sender name is empty".to_string()));
        }
        if self.name.contains('\0') {
            return Err(Error::InvalidOptions("sender name contains a NUL byte".to_string()));
        }
        Ok(())
    }
}

/// Process-wide defaults, loadable from `settings.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pull_timeout_ms: u64,
    pub find_timeout_ms: u64,
    /// Frames buffered per receiver before the oldest is dropped
    pub receiver_queue_depth: usize,
    pub finder: FinderOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pull_timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
            find_timeout_ms: DEFAULT_FIND_TIMEOUT_MS,
            receiver_queue_depth: DEFAULT_RECEIVER_QUEUE_DEPTH,
            finder: FinderOptions::default(),
        }
    }
}

impl Settings {
    /// Default location of the settings file
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ndi-session").map(|dirs| dirs.config_dir().join("settings.toml"))
    }

    /// Load settings from the default location, or defaults if there is no file
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.receiver_queue_depth == 0 {
            return Err(Error::Config("receiver_queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn find_timeout(&self) -> Duration {
        Duration::from_millis(self.find_timeout_ms)
    }
}
