//! Shared fixtures for the integration tests
//!
//! - `codeplug` - one system, a few channels on it
//! - `Recorder` - in-memory `Uplink` that records every send
//! - `MockSystem` - in-process WebSocket endpoint standing in for a trunking system

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use trunk_console::{
    Channel, Codeplug, ConnectionStatus, ConsoleError, EngineOptions, OutboundMessage, Result,
    System, Uplink, Zone,
};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// System "A" (rid 100, site 1) with Fire1 (tgid 200), Fire2 (201) and a
/// second binding of tgid 200 on system "B"
pub fn codeplug(port: u16) -> Codeplug {
    Codeplug {
        systems: vec![
            System {
                name: "A".to_string(),
                address: "127.0.0.1".to_string(),
                port,
                rid: 100,
                site: 1,
            },
            System {
                name: "B".to_string(),
                address: "127.0.0.1".to_string(),
                port: 1,
                rid: 500,
                site: 2,
            },
        ],
        zones: vec![
            Zone {
                name: "Fire".to_string(),
                channels: vec![
                    Channel {
                        name: "Fire1".to_string(),
                        system: "A".to_string(),
                        tgid: 200,
                    },
                    Channel {
                        name: "Fire2".to_string(),
                        system: "A".to_string(),
                        tgid: 201,
                    },
                ],
            },
            Zone {
                name: "Mutual Aid".to_string(),
                channels: vec![Channel {
                    name: "Aid1".to_string(),
                    system: "B".to_string(),
                    tgid: 200,
                }],
            },
        ],
        engine: EngineOptions::default(),
    }
}

/// Uplink that records sends instead of writing to a socket
pub struct Recorder {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    status: Mutex<ConnectionStatus>,
    link_down: AtomicBool,
}

impl Recorder {
    pub fn registered() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            status: Mutex::new(ConnectionStatus::Registered),
            link_down: AtomicBool::new(false),
        }
    }

    pub fn with_status(status: ConnectionStatus) -> Self {
        let recorder = Self::registered();
        recorder.set_status(status);
        recorder
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Make every send fail as if the connection dropped
    pub fn cut_link(&self) {
        self.link_down.store(true, Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Uplink for Recorder {
    fn send(&self, system: &str, message: OutboundMessage) -> Result<()> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(ConsoleError::NotConnected(system.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((system.to_string(), message));
        Ok(())
    }

    fn status(&self, _system: &str) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }
}

/// One-connection WebSocket server speaking the console protocol
pub struct MockSystem {
    pub port: u16,
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl MockSystem {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (in_tx, inbound) = mpsc::unbounded_channel();
        let (outbound, mut out_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(&text).unwrap();
                            let _ = in_tx.send(value);
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    },
                    out = out_rx.recv() => match out {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = write.close().await;
                            break;
                        }
                    },
                }
            }
        });

        Self {
            port,
            inbound,
            outbound,
        }
    }

    /// Next message received from the console
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for console message")
            .expect("mock connection ended")
    }

    /// Next message of a packet type, skipping audio and anything else
    pub async fn recv_type(&mut self, packet_type: u8) -> Value {
        loop {
            let value = self.recv().await;
            if value["type"] == packet_type {
                return value;
            }
        }
    }

    pub fn send_json(&self, value: Value) {
        self.outbound
            .send(Message::Text(value.to_string()))
            .unwrap();
    }

    pub fn send_raw(&self, text: &str) {
        self.outbound.send(Message::Text(text.to_string())).unwrap();
    }

    pub fn grant_registration(&self) {
        self.send_json(json!({"type": 9, "data": {"Status": 0}}));
    }

    pub fn voice_response(&self, status: u8, src_id: u32, dst_id: u32, channel: &str) {
        self.send_json(json!({
            "type": 7,
            "data": {"Status": status, "SrcId": src_id, "DstId": dst_id, "Channel": channel}
        }));
    }

    pub fn voice_release(&self, src_id: u32, dst_id: u32) {
        self.send_json(json!({"type": 6, "data": {"SrcId": src_id, "DstId": dst_id}}));
    }

    /// Audio frame tagged `{src_id, dst_id, frequency}`; `b64` is the payload
    pub fn audio(&self, src_id: u32, dst_id: u32, frequency: &str, b64: &str) {
        self.send_json(json!({
            "type": 1,
            "data": {
                "Data": b64,
                "VoiceChannel": {"SrcId": src_id, "DstId": dst_id, "Frequency": frequency},
                "Site": 1
            }
        }));
    }

    /// Close the connection from the server side
    pub fn close(self) {
        drop(self.outbound);
    }
}

/// Poll `cond` until it holds or the wait elapses
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
