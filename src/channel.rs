//! Per-channel voice grant lifecycle
//!
//! ```text
//! Idle --PTT down--> Requesting --own GRANT--> TransmitGranted --PTT up--> Idle
//! Idle/any --foreign GRANT--> ReceiveGranted --release/deny--> Idle
//! ```
//!
//! The machine is pure: transitions return the message to send (if any) and
//! leave delivery to the caller. The voice channel lives inside the granted
//! variants, so a channel can never hold one outside those states or hold two
//! at once.

use crate::config::{Channel, System};
use crate::error::{ConsoleError, Result};
use crate::protocol::{OutboundMessage, VoiceChannelRelease, VoiceChannelResponse};
use crate::types::{RadioId, TalkgroupId, VoiceChannel};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Voice grant state of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantState {
    Idle,
    /// Voice channel requested, awaiting the network's answer
    Requesting { since: Instant },
    /// Our own transmission holds the channel
    TransmitGranted {
        voice_channel: VoiceChannel,
        /// Cleared when the channel stops qualifying for capture fan-out;
        /// only set again by the next grant
        capture_enabled: bool,
    },
    /// Another unit is transmitting on this talkgroup
    ReceiveGranted {
        voice_channel: VoiceChannel,
        src_id: RadioId,
    },
}

/// Discriminant of [`GrantState`] for display and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPhase {
    Idle,
    Requesting,
    TransmitGranted,
    ReceiveGranted,
}

/// What a transition produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// The channel's visible state changed
    pub changed: bool,
    /// Message the caller must send to the channel's system
    pub send: Option<OutboundMessage>,
}

impl Transition {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            send: None,
        }
    }

    fn changed_and_send(message: OutboundMessage) -> Self {
        Self {
            changed: true,
            send: Some(message),
        }
    }
}

/// Voice grant state machine for one configured channel
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    name: String,
    system: String,
    tgid: TalkgroupId,
    state: GrantState,
    ptt: bool,
    last_src_id: Option<RadioId>,
}

impl ChannelStateMachine {
    pub fn new(channel: &Channel) -> Self {
        Self {
            name: channel.name.clone(),
            system: channel.system.clone(),
            tgid: channel.tgid,
            state: GrantState::Idle,
            ptt: false,
            last_src_id: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn tgid(&self) -> TalkgroupId {
        self.tgid
    }

    pub fn state(&self) -> &GrantState {
        &self.state
    }

    pub fn phase(&self) -> GrantPhase {
        match self.state {
            GrantState::Idle => GrantPhase::Idle,
            GrantState::Requesting { .. } => GrantPhase::Requesting,
            GrantState::TransmitGranted { .. } => GrantPhase::TransmitGranted,
            GrantState::ReceiveGranted { .. } => GrantPhase::ReceiveGranted,
        }
    }

    pub fn ptt(&self) -> bool {
        self.ptt
    }

    pub fn last_src_id(&self) -> Option<RadioId> {
        self.last_src_id
    }

    /// The held voice channel, own or foreign
    pub fn voice_channel(&self) -> Option<&VoiceChannel> {
        match &self.state {
            GrantState::TransmitGranted { voice_channel, .. }
            | GrantState::ReceiveGranted { voice_channel, .. } => Some(voice_channel),
            GrantState::Idle | GrantState::Requesting { .. } => None,
        }
    }

    /// Voice channel captured audio should be sent on, if capture is enabled
    pub fn capture_target(&self) -> Option<&VoiceChannel> {
        match &self.state {
            GrantState::TransmitGranted {
                voice_channel,
                capture_enabled: true,
            } => Some(voice_channel),
            _ => None,
        }
    }

    /// Whether an inbound frame on `frequency` from `src_id` belongs to this channel
    pub fn accepts_audio(
        &self,
        own_rid: RadioId,
        src_id: RadioId,
        dst_id: TalkgroupId,
        frequency: &VoiceChannel,
    ) -> bool {
        src_id != own_rid
            && dst_id == self.tgid
            && self.voice_channel().is_some_and(|vc| vc == frequency)
    }

    fn reset(&mut self) -> Transition {
        if self.state == GrantState::Idle {
            return Transition::unchanged();
        }
        self.state = GrantState::Idle;
        Transition::changed()
    }

    /// Operator pressed PTT
    ///
    /// Sends a voice channel request from `Idle` or `ReceiveGranted`; a second
    /// press while already keyed does nothing.
    pub fn ptt_down(&mut self, system: &System, now: Instant) -> Transition {
        self.ptt = true;
        match self.state {
            GrantState::Idle | GrantState::ReceiveGranted { .. } => {
                self.state = GrantState::Requesting { since: now };
                Transition::changed_and_send(OutboundMessage::voice_channel_request(
                    system.rid,
                    self.tgid,
                    system.site,
                ))
            }
            GrantState::Requesting { .. } | GrantState::TransmitGranted { .. } => {
                Transition::unchanged()
            }
        }
    }

    /// Roll back a request that could not be sent; the press did not take
    pub fn abort_request(&mut self) -> Transition {
        match self.state {
            GrantState::Requesting { .. } => {
                self.ptt = false;
                self.reset()
            }
            _ => Transition::unchanged(),
        }
    }

    /// Operator released PTT
    ///
    /// Capture stops immediately; the release goes out without waiting for
    /// any acknowledgement.
    pub fn ptt_up(&mut self, system: &System) -> Transition {
        self.ptt = false;
        let held = match &self.state {
            GrantState::Requesting { .. } => None,
            GrantState::TransmitGranted { voice_channel, .. } => Some(voice_channel.clone()),
            GrantState::Idle | GrantState::ReceiveGranted { .. } => {
                return Transition::unchanged()
            }
        };
        self.state = GrantState::Idle;
        Transition::changed_and_send(OutboundMessage::voice_channel_release(
            system.rid,
            self.tgid,
            held,
            system.site,
        ))
    }

    /// Apply a voice channel response
    pub fn on_voice_channel_response(
        &mut self,
        system: &System,
        response: &VoiceChannelResponse,
    ) -> Transition {
        if response.dst_id != self.tgid {
            return self.reset();
        }

        let granted = match (&response.channel, response.status.is_grant()) {
            (Some(channel), true) => channel.clone(),
            _ => {
                if self.phase() != GrantPhase::Idle {
                    tracing::warn!(
                        channel = %self.name,
                        status = ?response.status,
                        src_id = response.src_id,
                        "Voice channel not granted"
                    );
                }
                return self.reset();
            }
        };

        if response.src_id == system.rid {
            // Requesting and TransmitGranted always have PTT held; an own grant
            // seen while idle or receiving is only honored if PTT is still down.
            if self.ptt {
                tracing::info!(channel = %self.name, voice_channel = %granted, "Transmit granted");
                self.state = GrantState::TransmitGranted {
                    voice_channel: granted,
                    capture_enabled: true,
                };
                Transition::changed()
            } else {
                tracing::warn!(
                    channel = %self.name,
                    voice_channel = %granted,
                    "Stale grant after PTT release, releasing"
                );
                Transition {
                    changed: false,
                    send: Some(OutboundMessage::voice_channel_release(
                        system.rid,
                        self.tgid,
                        Some(granted),
                        system.site,
                    )),
                }
            }
        } else {
            tracing::info!(
                channel = %self.name,
                src_id = response.src_id,
                voice_channel = %granted,
                "Receiving"
            );
            self.state = GrantState::ReceiveGranted {
                voice_channel: granted,
                src_id: response.src_id,
            };
            self.last_src_id = Some(response.src_id);
            Transition::changed()
        }
    }

    /// Apply a release announced by the network
    pub fn on_voice_channel_release(
        &mut self,
        system: &System,
        release: &VoiceChannelRelease,
    ) -> Transition {
        if release.dst_id != self.tgid || release.src_id == system.rid {
            return Transition::unchanged();
        }
        self.reset()
    }

    /// Revert an unanswered request older than `timeout`
    ///
    /// PTT stays keyed, so a grant that still arrives while it is held is
    /// taken up.
    pub fn expire_request(&mut self, now: Instant, timeout: Duration) -> Transition {
        match self.state {
            GrantState::Requesting { since } if now.saturating_duration_since(since) >= timeout => {
                tracing::warn!(channel = %self.name, "Voice channel request timed out");
                self.reset()
            }
            _ => Transition::unchanged(),
        }
    }

    /// Stop capture fan-out until the next grant
    pub fn disable_capture(&mut self) -> bool {
        match &mut self.state {
            GrantState::TransmitGranted {
                capture_enabled, ..
            } if *capture_enabled => {
                *capture_enabled = false;
                true
            }
            _ => false,
        }
    }

    /// The owning session went away; any keyed PTT is dropped with it
    pub fn on_disconnected(&mut self) -> Transition {
        let was_keyed = std::mem::replace(&mut self.ptt, false);
        let transition = self.reset();
        Transition {
            changed: transition.changed || was_keyed,
            ..transition
        }
    }

    pub fn view(&self, selected: bool) -> ChannelView {
        ChannelView {
            name: self.name.clone(),
            system: self.system.clone(),
            tgid: self.tgid,
            selected,
            ptt: self.ptt,
            phase: self.phase(),
            voice_channel: self.voice_channel().cloned(),
            last_src_id: self.last_src_id,
        }
    }
}

/// How a channel should be highlighted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelActivity {
    Deselected,
    Selected,
    Transmitting,
    Receiving,
}

/// Snapshot of a channel for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelView {
    pub name: String,
    pub system: String,
    pub tgid: TalkgroupId,
    pub selected: bool,
    pub ptt: bool,
    pub phase: GrantPhase,
    pub voice_channel: Option<VoiceChannel>,
    pub last_src_id: Option<RadioId>,
}

impl ChannelView {
    pub fn activity(&self) -> ChannelActivity {
        match self.phase {
            GrantPhase::TransmitGranted => ChannelActivity::Transmitting,
            GrantPhase::ReceiveGranted => ChannelActivity::Receiving,
            GrantPhase::Idle | GrantPhase::Requesting if self.selected => {
                ChannelActivity::Selected
            }
            GrantPhase::Idle | GrantPhase::Requesting => ChannelActivity::Deselected,
        }
    }

    pub fn last_source_label(&self) -> Option<String> {
        self.last_src_id.map(|id| format!("Last SRC: {}", id))
    }
}

/// All channel state machines, in codeplug order
pub struct ChannelTable {
    channels: Mutex<Vec<ChannelStateMachine>>,
}

impl ChannelTable {
    pub fn new<'a>(channels: impl IntoIterator<Item = &'a Channel>) -> Self {
        Self {
            channels: Mutex::new(channels.into_iter().map(ChannelStateMachine::new).collect()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<ChannelStateMachine>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against one channel
    pub fn with<R>(&self, name: &str, f: impl FnOnce(&mut ChannelStateMachine) -> R) -> Result<R> {
        let mut channels = self.lock();
        let machine = channels
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| ConsoleError::UnknownChannel(name.to_string()))?;
        Ok(f(machine))
    }

    /// Clone of one channel's state machine
    pub fn snapshot(&self, name: &str) -> Option<ChannelStateMachine> {
        self.lock().iter().find(|c| c.name == name).cloned()
    }
}
