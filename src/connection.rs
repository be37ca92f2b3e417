use crate::error::{ConsoleError, Result};
use crate::protocol::{self, InboundMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

/// Event pushed by a session's reader task
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A decoded inbound message
    Message {
        system: String,
        session: Uuid,
        message: InboundMessage,
    },
    /// The connection ended; sent exactly once per connection
    Disconnected { system: String, session: Uuid },
}

impl SessionEvent {
    pub fn system(&self) -> &str {
        match self {
            SessionEvent::Message { system, .. } | SessionEvent::Disconnected { system, .. } => {
                system
            }
        }
    }

    pub fn session(&self) -> Uuid {
        match self {
            SessionEvent::Message { session, .. } | SessionEvent::Disconnected { session, .. } => {
                *session
            }
        }
    }
}

/// Low-level WebSocket connection to one system
pub struct Connection {
    system: String,
    /// Bounded queue feeding the writer task
    ws_tx: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Connect to a WebSocket URL and start the reader and writer tasks
    pub async fn connect(
        url: &str,
        system: String,
        session: Uuid,
        queue_depth: usize,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        tracing::info!(system = %system, "Connecting to {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(queue_depth.max(1));

        let writer_system = system.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!(system = %writer_system, "Failed to send message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader_system = system.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::debug!(system = %reader_system, "Received: {}", text);
                        match protocol::decode(&text) {
                            Ok(message) => {
                                let event = SessionEvent::Message {
                                    system: reader_system.clone(),
                                    session,
                                    message,
                                };
                                if events.send(event).is_err() {
                                    // Dispatcher is gone; nobody left to deliver to.
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(system = %reader_system, "Dropping inbound message: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(system = %reader_system, "WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(system = %reader_system, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            let _ = events.send(SessionEvent::Disconnected {
                system: reader_system,
                session,
            });
        });

        Ok(Self {
            system,
            ws_tx,
            reader,
            writer,
        })
    }

    /// Queue a text frame without waiting
    ///
    /// Fails fast with [`ConsoleError::QueueFull`] when the writer is behind.
    pub fn try_send(&self, text: String) -> Result<()> {
        self.ws_tx.try_send(Message::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConsoleError::QueueFull(self.system.clone()),
            mpsc::error::TrySendError::Closed(_) => ConsoleError::ConnectionClosed,
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
