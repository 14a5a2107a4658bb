//! Data exchanged with the engine outside of media frames

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discoverable network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Display name, unique within a discovery session
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_address: None,
            ip_address: None,
        }
    }

    pub fn with_url_address(mut self, url: impl Into<String>) -> Self {
        self.url_address = Some(url.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Sources identify the same endpoint when their names match
    pub fn same_endpoint(&self, other: &Source) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url_address {
            Some(url) => write!(f, "{} <{}>", self.name, url),
            None => f.write_str(&self.name),
        }
    }
}

/// Incremental update from a discovery subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(Source),
    /// Source with this name stopped advertising
    Removed(String),
    /// The engine finished a full pass over the network
    CycleComplete,
}

/// What the engine reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub version: String,
    pub cpu_supported: bool,
}

/// Code carried by a status-change frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Connection to the source established
    Connected,
    /// Connection to the source lost
    Disconnected,
    /// Source changed its advertised settings
    SourceChanged,
    /// Engine-specific code
    Other(i32),
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Connected => 1,
            StatusCode::Disconnected => 2,
            StatusCode::SourceChanged => 3,
            StatusCode::Other(code) => code,
        }
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        match code {
            1 => StatusCode::Connected,
            2 => StatusCode::Disconnected,
            3 => StatusCode::SourceChanged,
            other => StatusCode::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Connected => f.write_str("connected"),
            StatusCode::Disconnected => f.write_str("disconnected"),
            StatusCode::SourceChanged => f.write_str("source changed"),
            StatusCode::Other(code) => write!(f, "status {}", code),
        }
    }
}
