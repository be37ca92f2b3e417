use thiserror::Error;

/// Result type for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Errors that can occur while driving the console engine
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// WebSocket error (endpoint unreachable or handshake rejected)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// The system has no live connection
    #[error("System {0} is not connected")]
    NotConnected(String),

    /// The system is connected but its unit registration was not granted
    #[error("System {0} is not registered")]
    NotRegistered(String),

    /// The outbound queue for the system is full
    #[error("Send queue full for system {0}")]
    QueueFull(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML codeplug parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed inbound protocol message
    #[error("Protocol decode error: {0}")]
    Decode(String),

    /// Codeplug failed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// No system with this name is configured
    #[error("Unknown system: {0}")]
    UnknownSystem(String),

    /// No channel with this name is configured
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Event stream receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}
