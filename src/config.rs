//! Codeplug: the static description of systems and their channels
//!
//! Loaded once before the engine starts. Channels reference their system by
//! name; every lookup goes through the codeplug rather than holding on to a
//! session.

use crate::error::{ConsoleError, Result};
use crate::types::{AudioDevices, AudioFormat, RadioId, SiteId, TalkgroupId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One backend radio network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub name: String,
    pub address: String,
    pub port: u16,
    /// The console's own radio id on this system
    pub rid: RadioId,
    pub site: SiteId,
}

impl System {
    /// WebSocket URL for this system's endpoint
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }
}

/// A talkgroup binding on one system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub name: String,
    /// Name of the owning system
    pub system: String,
    pub tgid: TalkgroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    /// How long a voice channel request may stay unanswered before reverting to idle
    pub request_timeout_ms: u64,
    /// Outbound messages buffered per session before sends fail fast
    pub send_queue_depth: usize,
    /// Playback buffer length
    pub playback_buffer_ms: u64,
    /// Period of the request-expiry sweep
    pub expiry_tick_ms: u64,
    pub audio_devices: AudioDevices,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            send_queue_depth: 256,
            playback_buffer_ms: 5_000,
            expiry_tick_ms: 250,
            audio_devices: AudioDevices::default(),
        }
    }
}

impl EngineOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn expiry_tick(&self) -> Duration {
        Duration::from_millis(self.expiry_tick_ms.max(1))
    }

    /// Playback buffer capacity in bytes
    pub fn playback_capacity(&self) -> usize {
        AudioFormat::VOICE.bytes_for_millis(self.playback_buffer_ms)
    }
}

/// Systems, zones and engine options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Codeplug {
    #[serde(default)]
    pub systems: Vec<System>,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub engine: EngineOptions,
}

impl Codeplug {
    /// Load and validate a codeplug from a YAML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::info!("Loading codeplug from {}", path.display());
        Self::parse(&content)
    }

    /// Parse and validate a codeplug from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let codeplug: Codeplug = serde_yaml::from_str(yaml)?;
        codeplug.validate()?;
        Ok(codeplug)
    }

    /// Check that names are unique and every channel resolves to a system.
    pub fn validate(&self) -> Result<()> {
        let mut systems = HashSet::new();
        for system in &self.systems {
            if !systems.insert(system.name.as_str()) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "duplicate system name {:?}",
                    system.name
                )));
            }
        }

        let mut channels = HashSet::new();
        for channel in self.channels() {
            if !channels.insert(channel.name.as_str()) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "duplicate channel name {:?}",
                    channel.name
                )));
            }
            if !systems.contains(channel.system.as_str()) {
                return Err(ConsoleError::InvalidConfig(format!(
                    "channel {:?} references unknown system {:?}",
                    channel.name, channel.system
                )));
            }
        }
        Ok(())
    }

    pub fn system(&self, name: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels().find(|c| c.name == name)
    }

    /// Resolve the system that owns a channel
    pub fn system_for_channel(&self, channel: &str) -> Option<&System> {
        self.channel(channel).and_then(|c| self.system(&c.system))
    }

    /// All channels in zone order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.zones.iter().flat_map(|z| z.channels.iter())
    }

    /// Channels bound to a `(system, tgid)` pair
    pub fn channels_for<'a>(
        &'a self,
        system: &'a str,
        tgid: TalkgroupId,
    ) -> impl Iterator<Item = &'a Channel> + 'a {
        self.channels()
            .filter(move |c| c.system == system && c.tgid == tgid)
    }
}
