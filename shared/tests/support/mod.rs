//! Scripted in-process MQTT 3.1.1 broker for integration tests
//!
//! Speaks just enough of the protocol for rumqttc: CONNECT, PUBLISH (all QoS
//! levels), PUBREL, SUBSCRIBE, UNSUBSCRIBE, PINGREQ and DISCONNECT. Messages are
//! forwarded to matching subscribers at QoS 0.

#![allow(dead_code)]

use cmdrelay_shared::topics;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PUBREL: u8 = 6;
const SUBSCRIBE: u8 = 8;
const UNSUBSCRIBE: u8 = 10;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

/// A message some client published
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

struct Subscriber {
    conn: u64,
    filter: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

struct Connection {
    id: u64,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct BrokerState {
    ack_publishes: AtomicBool,
    connack_code: AtomicU8,
    next_conn: AtomicU64,
    published: Mutex<Vec<Published>>,
    subscribers: Mutex<Vec<Subscriber>>,
    connections: Mutex<Vec<Connection>>,
}

pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    accept_task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState::default());
        state.ack_publishes.store(true, Ordering::SeqCst);

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept(socket, accept_state.clone());
            }
        });

        Self {
            addr,
            state,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Withhold PUBACK/PUBREC while false
    pub fn set_ack_publishes(&self, ack: bool) {
        self.state.ack_publishes.store(ack, Ordering::SeqCst);
    }

    /// CONNACK return code for new connections; 0 accepts
    pub fn set_connack_code(&self, code: u8) {
        self.state.connack_code.store(code, Ordering::SeqCst);
    }

    /// Close every client connection; the listener keeps accepting
    pub fn drop_connections(&self) {
        let connections: Vec<Connection> =
            self.state.connections.lock().unwrap().drain(..).collect();
        let mut subscribers = self.state.subscribers.lock().unwrap();
        for connection in connections {
            subscribers.retain(|s| s.conn != connection.id);
            for task in connection.tasks {
                task.abort();
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn has_subscriber(&self, filter: &str) -> bool {
        self.state
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.filter == filter)
    }

    pub async fn wait_for_subscriber(&self, filter: &str) {
        wait_until(|| self.has_subscriber(filter), &format!("subscriber on {filter}")).await;
    }

    pub async fn wait_for_published(&self, topic: &str, count: usize) -> Vec<Published> {
        wait_until(
            || self.published_on(topic).len() >= count,
            &format!("{count} publishes on {topic}"),
        )
        .await;
        self.published_on(topic)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

/// Poll `condition` every 10ms for up to five seconds
pub async fn wait_until(condition: impl Fn() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}

fn accept(socket: TcpStream, state: Arc<BrokerState>) {
    let id = state.next_conn.fetch_add(1, Ordering::SeqCst);
    let (reader, mut writer) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
    let read_task = tokio::spawn(serve(id, reader, tx, state.clone()));

    state.connections.lock().unwrap().push(Connection {
        id,
        tasks: vec![read_task, write_task],
    });
}

async fn serve(
    id: u64,
    mut reader: OwnedReadHalf,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<BrokerState>,
) {
    while let Some((header, body)) = read_packet(&mut reader).await {
        match header >> 4 {
            CONNECT => {
                let code = state.connack_code.load(Ordering::SeqCst);
                let _ = tx.send(vec![0x20, 0x02, 0x00, code]);
                if code != 0 {
                    break;
                }
            }
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
                let mut offset = 2 + topic_len;
                let mut pkid = [0u8; 2];
                if qos > 0 {
                    pkid = [body[offset], body[offset + 1]];
                    offset += 2;
                }
                let payload = body[offset..].to_vec();

                if qos > 0 && state.ack_publishes.load(Ordering::SeqCst) {
                    let ack = if qos == 1 { 0x40 } else { 0x50 };
                    let _ = tx.send(vec![ack, 0x02, pkid[0], pkid[1]]);
                }

                let frame = publish_frame(&topic, &payload);
                for subscriber in state.subscribers.lock().unwrap().iter() {
                    if topics::matches(&subscriber.filter, &topic) {
                        let _ = subscriber.tx.send(frame.clone());
                    }
                }
                state.published.lock().unwrap().push(Published {
                    topic,
                    payload,
                    qos,
                });
            }
            PUBREL => {
                let _ = tx.send(vec![0x70, 0x02, body[0], body[1]]);
            }
            SUBSCRIBE => {
                let mut offset = 2;
                let mut granted = Vec::new();
                while offset + 2 <= body.len() {
                    let len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
                    let filter = String::from_utf8_lossy(&body[offset + 2..offset + 2 + len])
                        .into_owned();
                    offset += 2 + len + 1;
                    state.subscribers.lock().unwrap().push(Subscriber {
                        conn: id,
                        filter,
                        tx: tx.clone(),
                    });
                    granted.push(0x00);
                }
                let mut suback = vec![0x90, 2 + granted.len() as u8, body[0], body[1]];
                suback.extend(granted);
                let _ = tx.send(suback);
            }
            UNSUBSCRIBE => {
                let _ = tx.send(vec![0xB0, 0x02, body[0], body[1]]);
            }
            PINGREQ => {
                let _ = tx.send(vec![0xD0, 0x00]);
            }
            DISCONNECT => break,
            _ => {}
        }
    }

    state.subscribers.lock().unwrap().retain(|s| s.conn != id);
    state.connections.lock().unwrap().retain(|c| c.id != id);
}

async fn read_packet(reader: &mut OwnedReadHalf) -> Option<(u8, Vec<u8>)> {
    let header = reader.read_u8().await.ok()?;

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await.ok()?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return None;
        }
    }

    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn publish_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x30];
    let mut remaining = 2 + topic.len() + payload.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if remaining == 0 {
            break;
        }
    }
    frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}
