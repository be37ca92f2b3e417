//! Audio routing between the operator's devices and the systems
//!
//! One capture stream fans out to every channel holding its own grant; inbound
//! frames from all systems land in one shared playback buffer.

use crate::channel::ChannelTable;
use crate::config::Codeplug;
use crate::protocol::{AudioFrame, OutboundMessage};
use crate::selection::SelectionSet;
use crate::session::Uplink;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bytes per 16-bit sample
const SAMPLE_BYTES: usize = 2;

/// Bounded PCM buffer drained by the playback device
///
/// Writers that would overflow it lose the newest samples.
#[derive(Clone)]
pub struct PlaybackBuffer {
    inner: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes discarded on overflow
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append samples, keeping whole samples only; returns the bytes accepted
    pub fn append(&self, samples: &[u8]) -> usize {
        let mut buf = self.lock();
        let free = self.capacity.saturating_sub(buf.len());
        let take = samples.len().min(free);
        let take = take - take % SAMPLE_BYTES;
        buf.extend(&samples[..take]);
        let discarded = samples.len() - take;
        if discarded > 0 {
            self.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
            tracing::debug!(discarded, "Playback buffer full");
        }
        take
    }

    /// Drain up to `out.len()` bytes; returns the bytes written
    ///
    /// The device adapter fills any remainder with silence.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut buf = self.lock();
        let n = out.len().min(buf.len());
        for (dst, src) in out.iter_mut().zip(buf.drain(..n)) {
            *dst = src;
        }
        n
    }
}

/// Routes captured audio out and received audio in
pub struct AudioRouter {
    codeplug: Arc<Codeplug>,
    selection: Arc<SelectionSet>,
    channels: Arc<ChannelTable>,
    playback: PlaybackBuffer,
}

impl AudioRouter {
    pub fn new(
        codeplug: Arc<Codeplug>,
        selection: Arc<SelectionSet>,
        channels: Arc<ChannelTable>,
        playback: PlaybackBuffer,
    ) -> Self {
        Self {
            codeplug,
            selection,
            channels,
            playback,
        }
    }

    pub fn playback(&self) -> &PlaybackBuffer {
        &self.playback
    }

    /// Send one captured frame to every selected channel holding its own grant
    ///
    /// Called from the capture thread; returns the number of frames queued.
    pub fn fan_out(&self, frame: &[u8], uplink: &dyn Uplink) -> usize {
        let selected = self.selection.selected_channels();
        if selected.is_empty() {
            return 0;
        }

        let mut outgoing = Vec::new();
        {
            let channels = self.channels.lock();
            for machine in channels.iter().filter(|c| selected.iter().any(|s| s == c.name())) {
                let Some(voice_channel) = machine.capture_target() else {
                    continue;
                };
                let Some(system) = self.codeplug.system(machine.system()) else {
                    continue;
                };
                outgoing.push((
                    system.name.clone(),
                    OutboundMessage::voice_frame(
                        system.rid,
                        machine.tgid(),
                        voice_channel.clone(),
                        frame.to_vec(),
                        system.site,
                    ),
                ));
            }
        }

        let mut sent = 0;
        for (system, message) in outgoing {
            match uplink.send(&system, message) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(system = %system, "Dropping captured frame: {}", e),
            }
        }
        sent
    }

    /// Queue a received frame for playback if a selected channel expects it
    ///
    /// Each matching channel appends the samples once. Returns the number of
    /// matching channels.
    pub fn route_inbound(&self, system: &str, frame: &AudioFrame) -> usize {
        let Some(own) = self.codeplug.system(system) else {
            return 0;
        };
        let tag = &frame.voice_channel;
        let selected = self.selection.selected_channels();

        let matches = self
            .channels
            .lock()
            .iter()
            .filter(|c| c.system() == system && selected.iter().any(|s| s == c.name()))
            .filter(|c| c.accepts_audio(own.rid, tag.src_id, tag.dst_id, &tag.frequency))
            .count();

        for _ in 0..matches {
            self.playback.append(&frame.data);
        }
        matches
    }
}
