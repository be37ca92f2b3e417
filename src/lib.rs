//! Channel session and audio routing engine for trunked radio dispatch consoles
//!
//! A dispatch console monitors and transmits on many talkgroup channels at
//! once, each bound to one of several independent trunking systems. This
//! library provides:
//!
//! - One WebSocket protocol session per system, with unit registration
//! - A voice grant state machine per channel, driven by out-of-order network
//!   responses and operator push-to-talk
//! - Channel selection with group affiliation
//! - Fan-out of one microphone stream to every transmitting channel, and
//!   routing of inbound audio from all systems into one playback buffer
//! - A presentation event stream (connection status, channel state, last
//!   transmitting source)
//!
//! # Quick Start
//!
//! ```no_run
//! use trunk_console::{Codeplug, ConsoleClient, ConsoleEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let codeplug = Codeplug::parse(r#"
//! systems:
//!   - { name: County, address: 10.0.0.5, port: 3000, rid: 1000001, site: 1 }
//! zones:
//!   - name: Fire
//!     channels:
//!       - { name: Fire Dispatch, system: County, tgid: 2001 }
//! "#)?;
//!
//!     let console = ConsoleClient::new(codeplug)?;
//!     let mut events = console.subscribe();
//!     console.connect_all().await;
//!     console.set_selected("Fire Dispatch", true)?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let ConsoleEvent::ChannelStateChanged { view, .. } = event {
//!             println!("{}: {:?}", view.name, view.activity());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Config**: codeplug of systems and zoned channels (YAML)
//! - **Protocol**: JSON message structures and codec
//! - **Connection / Session**: WebSocket transport and per-system session
//! - **Channel**: voice grant state machine
//! - **Selection**: operator selection and PTT intent
//! - **Audio**: capture fan-out, inbound routing, playback buffer
//! - **Dispatch / Client**: event delivery and the public handle

mod audio;
mod channel;
mod client;
mod config;
mod connection;
mod dispatch;
mod error;
pub mod protocol;
mod selection;
mod session;
mod subscription;
mod types;

// Public exports
pub use audio::{AudioRouter, PlaybackBuffer};
pub use channel::{
    ChannelActivity, ChannelStateMachine, ChannelTable, ChannelView, GrantPhase, GrantState,
    Transition,
};
pub use client::ConsoleClient;
pub use config::{Channel, Codeplug, EngineOptions, System, Zone};
pub use connection::SessionEvent;
pub use dispatch::Dispatcher;
pub use error::{ConsoleError, Result};
pub use protocol::{InboundMessage, OutboundMessage};
pub use selection::{SelectionEntry, SelectionSet};
pub use session::{SessionTable, SystemSession, Uplink};
pub use subscription::{ConsoleEvent, EventReceiver};
pub use types::{
    AudioDevices, AudioFormat, ConnectionStatus, RadioId, ResponseType, SiteId, TalkgroupId,
    VoiceChannel,
};
