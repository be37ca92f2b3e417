use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio unit identifier
pub type RadioId = u32;

/// Talkgroup identifier
pub type TalkgroupId = u32;

/// Site identifier
pub type SiteId = u32;

/// Voice channel (frequency or slot) granted by the network for one transmission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceChannel(pub String);

impl VoiceChannel {
    pub fn new(frequency: impl Into<String>) -> Self {
        Self(frequency.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoiceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoiceChannel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome carried by response messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ResponseType {
    Grant,
    Deny,
    Refuse,
    Fail,
    /// Any status code this console does not know about
    Other(u8),
}

impl ResponseType {
    pub fn is_grant(self) -> bool {
        self == ResponseType::Grant
    }
}

impl From<u8> for ResponseType {
    fn from(code: u8) -> Self {
        match code {
            0 => ResponseType::Grant,
            1 => ResponseType::Deny,
            2 => ResponseType::Refuse,
            3 => ResponseType::Fail,
            other => ResponseType::Other(other),
        }
    }
}

impl From<ResponseType> for u8 {
    fn from(status: ResponseType) -> Self {
        match status {
            ResponseType::Grant => 0,
            ResponseType::Deny => 1,
            ResponseType::Refuse => 2,
            ResponseType::Fail => 3,
            ResponseType::Other(code) => code,
        }
    }
}

/// Connectivity of one system session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    /// Connected, but unit registration has not been granted (yet)
    Connected,
    Registered,
}

impl ConnectionStatus {
    /// Whether channels on this system may transmit
    pub fn is_operational(self) -> bool {
        self == ConnectionStatus::Registered
    }

    /// Whether the transport is up, registered or not
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Registered)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected (unregistered)",
            ConnectionStatus::Registered => "Connected",
        };
        f.write_str(label)
    }
}

/// PCM format shared by the capture and playback devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// 8 kHz, 16-bit, mono
    pub const VOICE: AudioFormat = AudioFormat {
        sample_rate: 8000,
        bits_per_sample: 16,
        channels: 1,
    };

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    /// Number of bytes covering `ms` milliseconds of audio
    pub fn bytes_for_millis(&self, ms: u64) -> usize {
        let bytes = self.bytes_per_second() as u64 * ms / 1000;
        let align = (self.bits_per_sample as u64 / 8) * self.channels as u64;
        (bytes - bytes % align.max(1)) as usize
    }
}

/// Device indices picked by the operator; opening the devices is up to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevices {
    #[serde(default)]
    pub input: Option<usize>,
    #[serde(default)]
    pub output: Option<usize>,
}
