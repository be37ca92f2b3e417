//! Applies protocol events and operator intents to the channel state machines
//!
//! Every entry point resolves systems through the codeplug, mutates channel
//! state under the channel table lock, then sends and notifies after the lock
//! is released. Sends never block, so these methods are safe to call from the
//! capture thread, the control thread and the session delivery task alike.

use crate::audio::{AudioRouter, PlaybackBuffer};
use crate::channel::{ChannelTable, ChannelView, GrantPhase};
use crate::config::{Codeplug, System};
use crate::error::{ConsoleError, Result};
use crate::protocol::{InboundMessage, OutboundMessage, VoiceChannelRelease, VoiceChannelResponse};
use crate::selection::{affiliation_request, SelectionEntry, SelectionSet};
use crate::session::Uplink;
use crate::subscription::{ConsoleEvent, EventReceiver};
use crate::types::RadioId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Channel-level engine shared by the client and its tasks
pub struct Dispatcher {
    codeplug: Arc<Codeplug>,
    channels: Arc<ChannelTable>,
    selection: Arc<SelectionSet>,
    router: AudioRouter,
    uplink: Arc<dyn Uplink>,
    notify: broadcast::Sender<ConsoleEvent>,
}

/// Work collected under the channel lock
#[derive(Default)]
struct Effects {
    views: Vec<ChannelView>,
    sends: Vec<(String, OutboundMessage)>,
    sources: Vec<(String, RadioId)>,
}

impl Dispatcher {
    pub fn new(codeplug: Arc<Codeplug>, uplink: Arc<dyn Uplink>) -> Self {
        let channels = Arc::new(ChannelTable::new(codeplug.channels()));
        let selection = Arc::new(SelectionSet::new(codeplug.channels()));
        let playback = PlaybackBuffer::new(codeplug.engine.playback_capacity());
        let router = AudioRouter::new(
            codeplug.clone(),
            selection.clone(),
            channels.clone(),
            playback,
        );
        let (notify, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            codeplug,
            channels,
            selection,
            router,
            uplink,
            notify,
        }
    }

    pub fn codeplug(&self) -> &Codeplug {
        &self.codeplug
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn playback(&self) -> PlaybackBuffer {
        self.router.playback().clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.notify.subscribe())
    }

    pub(crate) fn emit(&self, event: ConsoleEvent) {
        // No subscribers is fine.
        let _ = self.notify.send(event);
    }

    /// Sender shared with the system sessions for status events
    pub(crate) fn notifier(&self) -> broadcast::Sender<ConsoleEvent> {
        self.notify.clone()
    }

    fn system_for(&self, channel: &str) -> Result<&System> {
        let cpg_channel = self
            .codeplug
            .channel(channel)
            .ok_or_else(|| ConsoleError::UnknownChannel(channel.to_string()))?;
        self.codeplug
            .system(&cpg_channel.system)
            .ok_or_else(|| ConsoleError::UnknownSystem(cpg_channel.system.clone()))
    }

    pub fn channel_view(&self, channel: &str) -> Option<ChannelView> {
        let selected = self.selection.is_selected(channel);
        self.channels.snapshot(channel).map(|m| m.view(selected))
    }

    pub fn channel_views(&self) -> Vec<ChannelView> {
        let selected = self.selection.selected_channels();
        self.channels
            .lock()
            .iter()
            .map(|m| m.view(selected.iter().any(|s| s == m.name())))
            .collect()
    }

    /// Selection and PTT state of every channel, in codeplug order
    pub fn selection_entries(&self) -> Vec<SelectionEntry> {
        let selected = self.selection.selected_channels();
        self.channels
            .lock()
            .iter()
            .map(|m| SelectionEntry {
                channel: m.name().to_string(),
                is_selected: selected.iter().any(|s| s == m.name()),
                ptt_state: m.ptt(),
            })
            .collect()
    }

    fn apply(&self, effects: Effects) {
        for (system, message) in effects.sends {
            if let Err(e) = self.uplink.send(&system, message) {
                tracing::warn!(system = %system, "Failed to send: {}", e);
            }
        }
        for (channel, src_id) in effects.sources {
            self.emit(ConsoleEvent::LastSourceChanged { channel, src_id });
        }
        for view in effects.views {
            self.emit(ConsoleEvent::ChannelStateChanged {
                channel: view.name.clone(),
                view,
            });
        }
    }

    /// Handle an inbound message from `system`
    pub fn handle_message(&self, system: &str, message: InboundMessage) {
        match message {
            InboundMessage::VoiceChannelResponse(rsp) => self.on_voice_channel_response(system, &rsp),
            InboundMessage::VoiceChannelRelease(rls) => self.on_voice_channel_release(system, &rls),
            InboundMessage::Audio(frame) => {
                self.router.route_inbound(system, &frame);
            }
            InboundMessage::GroupAffiliationResponse(rsp) => {
                tracing::info!(system = %system, tgid = ?rsp.dst_id, status = ?rsp.status, "Affiliation response");
                self.emit(ConsoleEvent::AffiliationResponse {
                    system: system.to_string(),
                    tgid: rsp.dst_id,
                    status: rsp.status,
                });
            }
            InboundMessage::UnitRegistrationResponse(_) => {
                // Session-level; handled by the client before dispatch.
            }
            InboundMessage::Unhandled(packet_type) => {
                tracing::debug!(system = %system, packet_type, "Ignoring unhandled packet");
            }
        }
    }

    fn on_voice_channel_response(&self, system_name: &str, rsp: &VoiceChannelResponse) {
        let Some(system) = self.codeplug.system(system_name) else {
            return;
        };
        let mut effects = Effects::default();
        {
            let mut channels = self.channels.lock();
            let matching = channels
                .iter_mut()
                .filter(|c| c.system() == system_name && c.tgid() == rsp.dst_id);
            for machine in matching {
                let transition = machine.on_voice_channel_response(system, rsp);
                if transition.changed && machine.phase() == GrantPhase::ReceiveGranted {
                    effects.sources.push((machine.name().to_string(), rsp.src_id));
                }
                if let Some(message) = transition.send {
                    effects.sends.push((system_name.to_string(), message));
                }
                if transition.changed {
                    effects
                        .views
                        .push(machine.view(self.selection.is_selected(machine.name())));
                }
            }
        }
        if effects.views.is_empty() && effects.sends.is_empty() {
            tracing::debug!(system = %system_name, tgid = rsp.dst_id, "Voice channel response matched no change");
        }
        self.apply(effects);
    }

    fn on_voice_channel_release(&self, system_name: &str, rls: &VoiceChannelRelease) {
        let Some(system) = self.codeplug.system(system_name) else {
            return;
        };
        let mut effects = Effects::default();
        {
            let mut channels = self.channels.lock();
            for machine in channels
                .iter_mut()
                .filter(|c| c.system() == system_name && c.tgid() == rls.dst_id)
            {
                if machine.on_voice_channel_release(system, rls).changed {
                    effects
                        .views
                        .push(machine.view(self.selection.is_selected(machine.name())));
                }
            }
        }
        self.apply(effects);
    }

    /// A system's registration was granted: affiliate its selected channels
    pub fn on_registered(&self, system: &str) {
        for channel in self.selection.selected_channels() {
            if let Some((target, message)) = affiliation_request(&self.codeplug, &channel) {
                if target != system {
                    continue;
                }
                if let Err(e) = self.uplink.send(&target, message) {
                    tracing::warn!(system = %target, channel = %channel, "Affiliation failed: {}", e);
                }
            }
        }
    }

    /// A system's session went away: every channel on it drops to idle
    pub fn on_disconnected(&self, system: &str) {
        let mut effects = Effects::default();
        {
            let mut channels = self.channels.lock();
            for machine in channels.iter_mut().filter(|c| c.system() == system) {
                if machine.on_disconnected().changed {
                    effects
                        .views
                        .push(machine.view(self.selection.is_selected(machine.name())));
                }
            }
        }
        self.apply(effects);
    }

    /// Operator pressed PTT on a channel
    ///
    /// # Errors
    ///
    /// `NotRegistered` if the channel's system cannot transmit; any send error
    /// after rolling the channel back to idle.
    pub fn press_ptt(&self, channel: &str) -> Result<()> {
        let system = self.system_for(channel)?;
        let status = self.uplink.status(&system.name);
        if !status.is_operational() {
            return Err(ConsoleError::NotRegistered(system.name.clone()));
        }

        let transition = self
            .channels
            .with(channel, |m| m.ptt_down(system, Instant::now()))?;
        let Some(request) = transition.send else {
            return Ok(());
        };
        self.notify_channel(channel);

        if let Err(e) = self.uplink.send(&system.name, request) {
            tracing::warn!(channel = %channel, "Voice channel request not sent: {}", e);
            self.channels.with(channel, |m| m.abort_request())?;
            self.notify_channel(channel);
            return Err(e);
        }
        tracing::info!(channel = %channel, "Voice channel requested");
        Ok(())
    }

    /// Operator released PTT on a channel
    ///
    /// Capture for the channel stops before this returns, whether or not the
    /// release reaches the network.
    pub fn release_ptt(&self, channel: &str) -> Result<()> {
        let system = self.system_for(channel)?;

        let transition = self.channels.with(channel, |m| m.ptt_up(system))?;
        if transition.changed {
            self.notify_channel(channel);
        }
        if let Some(release) = transition.send {
            self.uplink.send(&system.name, release).map_err(|e| {
                tracing::warn!(channel = %channel, "Voice channel release not sent: {}", e);
                e
            })?;
        }
        Ok(())
    }

    /// Select or deselect a channel; returns true if the selection changed
    ///
    /// Selecting sends one affiliation request when the system is registered.
    pub fn set_selected(&self, channel: &str, selected: bool) -> Result<bool> {
        let system = self.system_for(channel)?;
        if !self.selection.set_selected(channel, selected)? {
            return Ok(false);
        }

        if selected {
            if self.uplink.status(&system.name).is_operational() {
                if let Some((target, message)) = affiliation_request(&self.codeplug, channel) {
                    if let Err(e) = self.uplink.send(&target, message) {
                        tracing::warn!(channel = %channel, "Affiliation failed: {}", e);
                    }
                }
            }
        } else {
            self.channels.with(channel, |m| m.disable_capture())?;
        }
        self.notify_channel(channel);
        Ok(true)
    }

    /// Flip a channel's selection; returns the new value
    pub fn toggle_selected(&self, channel: &str) -> Result<bool> {
        let selected = !self.selection.is_selected(channel);
        self.set_selected(channel, selected)?;
        Ok(selected)
    }

    /// Fan a captured frame out to every transmitting channel
    pub fn capture_frame(&self, frame: &[u8]) -> usize {
        self.router.fan_out(frame, self.uplink.as_ref())
    }

    /// Revert requests left unanswered past the configured timeout
    pub fn expire_requests(&self, now: Instant) {
        let timeout = self.codeplug.engine.request_timeout();
        let mut effects = Effects::default();
        {
            let mut channels = self.channels.lock();
            for machine in channels.iter_mut() {
                if machine.expire_request(now, timeout).changed {
                    effects
                        .views
                        .push(machine.view(self.selection.is_selected(machine.name())));
                }
            }
        }
        self.apply(effects);
    }

    fn notify_channel(&self, channel: &str) {
        if let Some(view) = self.channel_view(channel) {
            self.emit(ConsoleEvent::ChannelStateChanged {
                channel: channel.to_string(),
                view,
            });
        }
    }
}
