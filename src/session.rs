use crate::config::System;
use crate::connection::{Connection, SessionEvent};
use crate::error::{ConsoleError, Result};
use crate::protocol::{self, OutboundMessage};
use crate::subscription::ConsoleEvent;
use crate::types::{ConnectionStatus, ResponseType};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Where the engine sends protocol messages
///
/// Implemented by [`SessionTable`]; the system is resolved by name on every
/// call so a recreated session is picked up without stale references.
pub trait Uplink: Send + Sync {
    /// Queue a message for a system without blocking
    fn send(&self, system: &str, message: OutboundMessage) -> Result<()>;

    /// Current connection status of a system
    fn status(&self, system: &str) -> ConnectionStatus;
}

/// Protocol session with one system
///
/// Every status change is published as a
/// [`ConsoleEvent::ConnectionStatusChanged`] while the status lock is held, so
/// subscribers see changes in the order they happened. Lock order is
/// connection, then status.
pub struct SystemSession {
    system: System,
    id: Uuid,
    status: Mutex<ConnectionStatus>,
    connection: Mutex<Option<Connection>>,
    notify: broadcast::Sender<ConsoleEvent>,
}

impl SystemSession {
    pub fn new(system: System, notify: broadcast::Sender<ConsoleEvent>) -> Self {
        Self {
            system,
            id: Uuid::new_v4(),
            status: Mutex::new(ConnectionStatus::Disconnected),
            connection: Mutex::new(None),
            notify,
        }
    }

    /// Generation id carried by every event from this session
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `next` to the current status; publishes and returns the new
    /// status if it changed
    fn transition(
        &self,
        next: impl FnOnce(ConnectionStatus) -> Option<ConnectionStatus>,
    ) -> Option<ConnectionStatus> {
        let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let status = next(*current).filter(|s| s != &*current)?;
        *current = status;
        // No subscribers is fine.
        let _ = self.notify.send(ConsoleEvent::ConnectionStatusChanged {
            system: self.system.name.clone(),
            status,
        });
        Some(status)
    }

    fn set_status(&self, status: ConnectionStatus) -> bool {
        self.transition(|_| Some(status)).is_some()
    }

    /// Connect to the system and send the unit registration request
    ///
    /// On failure the status is left at `Disconnected`; there is no retry.
    pub async fn connect(
        &self,
        queue_depth: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        self.open(queue_depth, events).await?;
        self.register();
        Ok(())
    }

    /// Establish the transport without registering
    async fn open(
        &self,
        queue_depth: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        self.set_status(ConnectionStatus::Connecting);

        let connection = match Connection::connect(
            &self.system.url(),
            self.system.name.clone(),
            self.id,
            queue_depth,
            events,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(system = %self.system.name, "Connection failed: {}", e);
                self.set_status(ConnectionStatus::Disconnected);
                return Err(e);
            }
        };

        self.attach(connection)
    }

    /// Install an established connection
    ///
    /// Only a session still `Connecting` takes it: if the link was reported
    /// lost while the handshake finished, the connection is dropped and the
    /// session stays `Disconnected`.
    fn attach(&self, connection: Connection) -> Result<()> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let connected = self.transition(|current| {
            (current == ConnectionStatus::Connecting).then_some(ConnectionStatus::Connected)
        });
        if connected.is_none() {
            tracing::warn!(system = %self.system.name, "Connection lost during handshake");
            return Err(ConsoleError::ConnectionClosed);
        }
        *slot = Some(connection);
        Ok(())
    }

    /// Send the unit registration request for this console's rid and site
    fn register(&self) {
        let registration = OutboundMessage::unit_registration(self.system.rid, self.system.site);
        match self.send_message(&registration) {
            Ok(()) => tracing::info!(
                system = %self.system.name,
                rid = self.system.rid,
                site = self.system.site,
                "Unit registration requested"
            ),
            Err(e) => {
                tracing::warn!(system = %self.system.name, "Failed to send unit registration: {}", e)
            }
        }
    }

    /// Queue a protocol message
    ///
    /// Never blocks: fails with `NotConnected` when there is no connection and
    /// with `QueueFull` when the writer is behind.
    pub fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        let connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let connection = connection
            .as_ref()
            .ok_or_else(|| ConsoleError::NotConnected(self.system.name.clone()))?;
        let text = protocol::encode(message)?;
        tracing::debug!(system = %self.system.name, "Sending: {}", text);
        connection.try_send(text)
    }

    /// Apply a unit registration response; returns the new status if it changed
    pub(crate) fn apply_registration(&self, status: ResponseType) -> Option<ConnectionStatus> {
        self.transition(|current| {
            if !current.is_connected() {
                return None;
            }
            if status.is_grant() {
                tracing::info!(system = %self.system.name, "Unit registration granted");
                Some(ConnectionStatus::Registered)
            } else {
                tracing::warn!(system = %self.system.name, ?status, "Unit registration refused");
                Some(ConnectionStatus::Connected)
            }
        })
    }

    /// Drop the connection; returns true if the status changed
    pub(crate) fn mark_disconnected(&self) -> bool {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        slot.take();
        let changed = self.set_status(ConnectionStatus::Disconnected);
        if changed {
            tracing::info!(system = %self.system.name, "Session disconnected");
        }
        changed
    }
}

/// Current session per system name
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<SystemSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, system: &str) -> Option<Arc<SystemSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(system)
            .cloned()
    }

    /// Install a session, returning the one it replaces
    pub fn insert(&self, session: Arc<SystemSession>) -> Option<Arc<SystemSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.system().name.clone(), session)
    }

    /// The current session for `system` if it has generation `id`
    pub fn current(&self, system: &str, id: Uuid) -> Option<Arc<SystemSession>> {
        self.get(system).filter(|s| s.id() == id)
    }

    pub fn all(&self) -> Vec<Arc<SystemSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl Uplink for SessionTable {
    fn send(&self, system: &str, message: OutboundMessage) -> Result<()> {
        let session = self
            .get(system)
            .ok_or_else(|| ConsoleError::UnknownSystem(system.to_string()))?;
        session.send_message(&message)
    }

    fn status(&self, system: &str) -> ConnectionStatus {
        self.get(system)
            .map(|s| s.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }
}
