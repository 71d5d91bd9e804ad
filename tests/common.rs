//! Common test harness utilities for integration tests.
//!
//! Provides:
//! - An in-process pubsub server simulator wired through the same
//!   `Connector`/`Connection` path the TCP transport uses
//! - A raw HTTP client for exercising the gateway
//! - A capture sink standing in for the fan-out distribution service
//!
//! All helpers use only existing dependencies.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use chrono::Utc;
use photon::feed::FeedEntry;
use photon::wire::{
    ConnectAuth, ConnectError, Connection, ConnectionDriver, Connector, Credentials, Iq, IqBody,
    Jid, Message, PubsubEvent, PubsubRequest, PubsubResponse, Stanza,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const GOOD_PASSWORD: &str = "sekrit";

/// Shared state of the simulated pubsub server.
pub struct SimState {
    pub service: Jid,
    connects: AtomicUsize,
    anon_seq: AtomicUsize,
    /// Per-topic entries, newest first.
    entries: Mutex<HashMap<String, Vec<FeedEntry>>>,
    /// (node, inbound sender) pairs for connections that subscribed.
    subscribers: Mutex<Vec<(String, mpsc::Sender<Stanza>)>>,
    /// Topics whose subscribe requests are rejected with forbidden.
    rejected_nodes: Mutex<Vec<String>>,
    /// When set, queries go unanswered (for timeout tests).
    drop_replies: AtomicBool,
}

impl SimState {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn seed_entry(&self, node: &str, entry: FeedEntry) {
        self.entries
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push(entry);
    }

    pub fn reject_node(&self, node: &str) {
        self.rejected_nodes.lock().unwrap().push(node.to_string());
    }

    pub fn set_drop_replies(&self, drop: bool) {
        self.drop_replies.store(drop, Ordering::SeqCst);
    }

    pub fn entries_for(&self, node: &str) -> Vec<FeedEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or_default()
    }
}

/// Connector backed by the simulator. Every accepted connection gets its own
/// responder task; the state (entries, subscribers) is shared.
#[derive(Clone)]
pub struct SimConnector {
    pub state: Arc<SimState>,
}

impl SimConnector {
    pub fn new(service_domain: &str) -> Self {
        Self {
            state: Arc::new(SimState {
                service: Jid::domain(service_domain),
                connects: AtomicUsize::new(0),
                anon_seq: AtomicUsize::new(0),
                entries: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                rejected_nodes: Mutex::new(Vec::new()),
                drop_replies: AtomicBool::new(false),
            }),
        }
    }
}

impl Connector for SimConnector {
    async fn connect(&self, auth: ConnectAuth<'_>) -> Result<Connection, ConnectError> {
        let jid = match auth {
            ConnectAuth::Credentials(Credentials { jid, password }) => {
                if password != GOOD_PASSWORD {
                    return Err(ConnectError::Unauthorized);
                }
                jid.bare().with_resource("http")
            }
            ConnectAuth::Anonymous => {
                let seq = self.state.anon_seq.fetch_add(1, Ordering::SeqCst);
                Jid::domain(self.state.service.domain_part())
                    .with_local(format!("anon-{seq}"))
                    .with_resource("http")
            }
        };
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let (connection, driver) = Connection::channel(jid);
        let state = self.state.clone();
        tokio::spawn(run_responder(state, driver));
        Ok(connection)
    }
}

async fn run_responder(state: Arc<SimState>, mut driver: ConnectionDriver) {
    while let Some(stanza) = driver.outbound_rx.recv().await {
        if state.drop_replies.load(Ordering::SeqCst) {
            continue;
        }
        let Stanza::Iq(iq) = stanza else { continue };
        match &iq.body {
            IqBody::Get(PubsubRequest::Items { node, .. }) => {
                let entries = state.entries_for(node);
                let reply = sim_reply(
                    &state,
                    &iq,
                    IqBody::Result(Some(PubsubResponse::Items {
                        node: node.clone(),
                        entries,
                    })),
                );
                let _ = driver.inbound_tx.send(reply).await;
            }
            IqBody::Set(PubsubRequest::Subscribe { node }) => {
                let rejected = state.rejected_nodes.lock().unwrap().contains(node);
                let body = if rejected {
                    IqBody::Error(photon::wire::StanzaError::new(
                        photon::wire::ErrorCondition::Forbidden,
                    ))
                } else {
                    state
                        .subscribers
                        .lock()
                        .unwrap()
                        .push((node.clone(), driver.inbound_tx.clone()));
                    IqBody::Result(Some(PubsubResponse::Subscribed { node: node.clone() }))
                };
                let reply = sim_reply(&state, &iq, body);
                let _ = driver.inbound_tx.send(reply).await;
            }
            IqBody::Set(PubsubRequest::Publish { node, entry }) => {
                {
                    let mut entries = state.entries.lock().unwrap();
                    entries
                        .entry(node.clone())
                        .or_default()
                        .insert(0, entry.clone());
                }
                let reply = sim_reply(
                    &state,
                    &iq,
                    IqBody::Result(Some(PubsubResponse::Published {
                        node: node.clone(),
                        id: entry.id.clone(),
                    })),
                );
                let _ = driver.inbound_tx.send(reply).await;

                // Push the event to every subscriber of the topic.
                let event = Stanza::Message(Message {
                    id: None,
                    from: Some(state.service.clone()),
                    to: None,
                    event: Some(PubsubEvent {
                        node: node.clone(),
                        items: vec![entry.clone()],
                    }),
                });
                let targets: Vec<mpsc::Sender<Stanza>> = state
                    .subscribers
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(n, _)| n == node)
                    .map(|(_, tx)| tx.clone())
                    .collect();
                for tx in targets {
                    let _ = tx.send(event.clone()).await;
                }
            }
            _ => {
                let reply = sim_reply(&state, &iq, IqBody::Result(None));
                let _ = driver.inbound_tx.send(reply).await;
            }
        }
    }
}

fn sim_reply(state: &SimState, request: &Iq, body: IqBody) -> Stanza {
    Stanza::Iq(Iq {
        id: request.id.clone(),
        from: Some(state.service.clone()),
        to: request.from.clone(),
        body,
    })
}

pub fn entry(id: &str, content: &str) -> FeedEntry {
    FeedEntry::new(id, content, Utc::now())
}

// ---------------------------------------------------------------------------
// Raw HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Issue one HTTP request against a bound address and read the full reply.
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, String)],
    body: Option<&str>,
) -> HttpReply {
    let mut stream = TcpStream::connect(addr).await.expect("connect gateway");
    let body = body.unwrap_or("");
    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: test\r\n");
    for (name, value) in headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read reply");
    parse_reply(&raw)
}

fn parse_reply(raw: &[u8]) -> HttpReply {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete reply head");
    let head = std::str::from_utf8(&raw[..head_end]).expect("utf-8 head");
    let mut lines = head.split("\r\n");
    let status_line = lines.next().expect("status line");
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse()
        .expect("numeric status");
    let headers = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    let body = String::from_utf8_lossy(&raw[head_end + 4..]).to_string();
    HttpReply {
        status,
        headers,
        body,
    }
}

pub fn basic_auth(user: &str, password: &str) -> String {
    use base64::Engine;
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
}

// ---------------------------------------------------------------------------
// Fan-out capture sink
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CapturedPost {
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

/// Tiny HTTP server standing in for the distribution service. Records every
/// POST and answers 200.
pub async fn start_capture_sink() -> (SocketAddr, mpsc::UnboundedReceiver<CapturedPost>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind sink");
    let addr = listener.local_addr().expect("sink addr");
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(post) = read_post(&mut stream).await {
                    let _ = tx.send(post);
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                    .await;
            });
        }
    });
    (addr, rx)
}

async fn read_post(stream: &mut TcpStream) -> Option<CapturedPost> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();
    let mut authorization = None;
    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("authorization") {
                authorization = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = raw[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    Some(CapturedPost {
        path,
        authorization,
        body,
    })
}
