use crate::channel::ChannelView;
use crate::error::{ConsoleError, Result};
use crate::types::{ConnectionStatus, RadioId, ResponseType, TalkgroupId};
use tokio::sync::broadcast;

/// State change for the presentation layer
///
/// Delivered from the engine's own tasks; marshaling onto a UI thread is the
/// receiver's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// A system session changed connectivity
    ConnectionStatusChanged {
        system: String,
        status: ConnectionStatus,
    },

    /// A channel's grant state or selection changed
    ChannelStateChanged { channel: String, view: ChannelView },

    /// A foreign unit started transmitting on a channel
    LastSourceChanged { channel: String, src_id: RadioId },

    /// The network answered a group affiliation request
    AffiliationResponse {
        system: String,
        tgid: Option<TalkgroupId>,
        status: ResponseType,
    },
}

/// Receiver for console events
pub struct EventReceiver {
    rx: broadcast::Receiver<ConsoleEvent>,
}

impl EventReceiver {
    pub(crate) fn new(rx: broadcast::Receiver<ConsoleEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Fails with `ConnectionClosed` once the engine has shut down.
    pub async fn recv(&mut self) -> Result<ConsoleEvent> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => ConsoleError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                ConsoleError::ChannelError(format!("Lagged by {} events", n))
            }
        })
    }

    /// Try to receive an event without waiting
    ///
    /// Returns `None` if no event is available.
    pub fn try_recv(&mut self) -> Result<Option<ConsoleEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(ConsoleError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(ConsoleError::ChannelError(format!("Lagged by {} events", n)))
            }
        }
    }
}
