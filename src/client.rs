use crate::audio::PlaybackBuffer;
use crate::channel::ChannelView;
use crate::config::Codeplug;
use crate::connection::SessionEvent;
use crate::dispatch::Dispatcher;
use crate::error::{ConsoleError, Result};
use crate::protocol::InboundMessage;
use crate::selection::SelectionEntry;
use crate::session::{SessionTable, SystemSession, Uplink};
use crate::subscription::EventReceiver;
use crate::types::{AudioDevices, ConnectionStatus};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Dispatch console engine
///
/// The `ConsoleClient` owns one [`SystemSession`] per configured system, a
/// delivery task that applies inbound protocol events to the channels, and
/// the audio router. Operator actions (`set_selected`, `press_ptt`,
/// `release_ptt`) and `capture_frame` are synchronous and never wait on the
/// network, so they can be called from a UI thread or an audio callback.
///
/// Must be created inside a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use trunk_console::{Codeplug, ConsoleClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let codeplug = Codeplug::load_from("codeplug.yml")?;
///     let console = ConsoleClient::new(codeplug)?;
///     console.connect_all().await;
///
///     console.set_selected("Fire1", true)?;
///     console.press_ptt("Fire1")?;
///     console.capture_frame(&[0u8; 1600]);
///     console.release_ptt("Fire1")?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConsoleClient {
    inner: Arc<Inner>,
    _tasks: Arc<Tasks>,
}

struct Inner {
    codeplug: Arc<Codeplug>,
    sessions: Arc<SessionTable>,
    dispatcher: Dispatcher,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

struct Tasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for Tasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl ConsoleClient {
    /// Validate the codeplug and start the delivery task
    ///
    /// No connections are made until [`connect_all`](Self::connect_all) or
    /// [`connect_system`](Self::connect_system).
    pub fn new(codeplug: Codeplug) -> Result<Self> {
        codeplug.validate()?;
        let codeplug = Arc::new(codeplug);
        let sessions = Arc::new(SessionTable::new());
        let uplink: Arc<dyn Uplink> = sessions.clone();
        let dispatcher = Dispatcher::new(codeplug.clone(), uplink);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();

        let inner = Arc::new(Inner {
            codeplug,
            sessions,
            dispatcher,
            events_tx,
        });

        let tick = inner.codeplug.engine.expiry_tick();
        let loop_inner = inner.clone();
        let delivery = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(event) => loop_inner.process(event),
                        None => break,
                    },
                    _ = ticker.tick() => loop_inner.dispatcher.expire_requests(Instant::now()),
                }
            }
        });

        Ok(Self {
            inner,
            _tasks: Arc::new(Tasks {
                handles: vec![delivery],
            }),
        })
    }

    pub fn codeplug(&self) -> &Codeplug {
        &self.inner.codeplug
    }

    pub fn audio_devices(&self) -> AudioDevices {
        self.inner.codeplug.engine.audio_devices
    }

    /// Connect every configured system concurrently
    ///
    /// Failures are reported per system and through the event stream; a
    /// failed system stays `Disconnected`.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let names: Vec<String> = self
            .inner
            .codeplug
            .systems
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let results = join_all(names.iter().map(|name| self.connect_system(name))).await;
        names.into_iter().zip(results).collect()
    }

    /// Create a fresh session for one system and connect it
    ///
    /// Any previous session for the system is dropped and its late events are
    /// ignored. This is also the explicit reconnect.
    pub async fn connect_system(&self, name: &str) -> Result<()> {
        let system = self
            .inner
            .codeplug
            .system(name)
            .cloned()
            .ok_or_else(|| ConsoleError::UnknownSystem(name.to_string()))?;

        let session = Arc::new(SystemSession::new(
            system,
            self.inner.dispatcher.notifier(),
        ));
        if let Some(previous) = self.inner.sessions.insert(session.clone()) {
            if previous.mark_disconnected() {
                self.inner.dispatcher.on_disconnected(name);
            }
        }

        let depth = self.inner.codeplug.engine.send_queue_depth;
        session.connect(depth, self.inner.events_tx.clone()).await
    }

    /// Alias for [`connect_system`](Self::connect_system)
    pub async fn reconnect(&self, name: &str) -> Result<()> {
        self.connect_system(name).await
    }

    /// Close one system's connection
    pub fn disconnect_system(&self, name: &str) -> Result<()> {
        let session = self
            .inner
            .sessions
            .get(name)
            .ok_or_else(|| ConsoleError::UnknownSystem(name.to_string()))?;
        if session.mark_disconnected() {
            self.inner.dispatcher.on_disconnected(name);
        }
        Ok(())
    }

    /// The current session for a system, if one was created
    pub fn session(&self, name: &str) -> Option<Arc<SystemSession>> {
        self.inner.sessions.get(name)
    }

    pub fn status(&self, name: &str) -> ConnectionStatus {
        Uplink::status(self.inner.sessions.as_ref(), name)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.inner.dispatcher.subscribe()
    }

    pub fn set_selected(&self, channel: &str, selected: bool) -> Result<bool> {
        self.inner.dispatcher.set_selected(channel, selected)
    }

    pub fn toggle_selected(&self, channel: &str) -> Result<bool> {
        self.inner.dispatcher.toggle_selected(channel)
    }

    pub fn selected_channels(&self) -> Vec<String> {
        self.inner.dispatcher.selection().selected_channels()
    }

    /// Selection and PTT state of every channel
    pub fn selection_entries(&self) -> Vec<SelectionEntry> {
        self.inner.dispatcher.selection_entries()
    }

    pub fn press_ptt(&self, channel: &str) -> Result<()> {
        self.inner.dispatcher.press_ptt(channel)
    }

    pub fn release_ptt(&self, channel: &str) -> Result<()> {
        self.inner.dispatcher.release_ptt(channel)
    }

    pub fn set_ptt(&self, channel: &str, pressed: bool) -> Result<()> {
        if pressed {
            self.press_ptt(channel)
        } else {
            self.release_ptt(channel)
        }
    }

    /// Feed one captured PCM frame; returns the number of frames queued
    pub fn capture_frame(&self, frame: &[u8]) -> usize {
        self.inner.dispatcher.capture_frame(frame)
    }

    /// Handle to the shared playback buffer for the output device
    pub fn playback(&self) -> PlaybackBuffer {
        self.inner.dispatcher.playback()
    }

    pub fn channel_view(&self, channel: &str) -> Option<ChannelView> {
        self.inner.dispatcher.channel_view(channel)
    }

    pub fn channel_views(&self) -> Vec<ChannelView> {
        self.inner.dispatcher.channel_views()
    }

    /// Close every session
    pub fn shutdown(&self) {
        for session in self.inner.sessions.all() {
            let name = session.system().name.clone();
            if session.mark_disconnected() {
                self.inner.dispatcher.on_disconnected(&name);
            }
        }
    }
}

impl Inner {
    /// Apply one event from a session's reader task
    fn process(&self, event: SessionEvent) {
        let Some(session) = self.sessions.current(event.system(), event.session()) else {
            tracing::debug!(system = %event.system(), "Ignoring event from superseded session");
            return;
        };

        match event {
            SessionEvent::Message {
                system,
                message: InboundMessage::UnitRegistrationResponse(rsp),
                ..
            } => {
                if let Some(status) = session.apply_registration(rsp.status) {
                    if status.is_operational() {
                        self.dispatcher.on_registered(&system);
                    }
                }
            }
            SessionEvent::Message {
                system, message, ..
            } => self.dispatcher.handle_message(&system, message),
            SessionEvent::Disconnected { system, .. } => {
                if session.mark_disconnected() {
                    self.dispatcher.on_disconnected(&system);
                }
            }
        }
    }
}
