use crate::config::{Channel, Codeplug};
use crate::error::{ConsoleError, Result};
use crate::protocol::OutboundMessage;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operator intent for one channel
///
/// `ptt_state` is read from the channel's state machine when the entry is
/// built; the selection set itself only tracks membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    pub channel: String,
    pub is_selected: bool,
    pub ptt_state: bool,
}

#[derive(Debug, Clone)]
struct Membership {
    channel: String,
    is_selected: bool,
}

/// Which channels the operator is monitoring
///
/// Membership can change between calls from any thread; callers work from
/// the snapshots returned here.
pub struct SelectionSet {
    entries: Mutex<Vec<Membership>>,
}

impl SelectionSet {
    pub fn new<'a>(channels: impl IntoIterator<Item = &'a Channel>) -> Self {
        let entries = channels
            .into_iter()
            .map(|c| Membership {
                channel: c.name.clone(),
                is_selected: false,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Membership>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, channel: &str, f: impl FnOnce(&mut Membership) -> R) -> Result<R> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.channel == channel)
            .ok_or_else(|| ConsoleError::UnknownChannel(channel.to_string()))?;
        Ok(f(entry))
    }

    /// Set a channel's selection; returns true only if it changed
    pub fn set_selected(&self, channel: &str, selected: bool) -> Result<bool> {
        self.update(channel, |entry| {
            let changed = entry.is_selected != selected;
            entry.is_selected = selected;
            changed
        })
    }

    /// Flip a channel's selection and return the new value
    pub fn toggle(&self, channel: &str) -> Result<bool> {
        self.update(channel, |entry| {
            entry.is_selected = !entry.is_selected;
            entry.is_selected
        })
    }

    pub fn is_selected(&self, channel: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.channel == channel && e.is_selected)
    }

    /// Names of the currently selected channels
    pub fn selected_channels(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.is_selected)
            .map(|e| e.channel.clone())
            .collect()
    }
}

/// Affiliation request for a channel, addressed to its system
pub fn affiliation_request(codeplug: &Codeplug, channel: &str) -> Option<(String, OutboundMessage)> {
    let cpg_channel = codeplug.channel(channel)?;
    let system = codeplug.system(&cpg_channel.system)?;
    Some((
        system.name.clone(),
        OutboundMessage::group_affiliation(system.rid, cpg_channel.tgid, system.site),
    ))
}
