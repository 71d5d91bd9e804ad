//! Persistent connections to the pubsub server.
//!
//! A [`Connection`] is the session-facing handle: the bound address, an
//! outbound stanza sender, a single-consumer inbound receiver, and a shutdown
//! signal. [`Connector`] abstracts connection establishment so that
//! authentication failures surface structurally ([`ConnectError::Unauthorized`])
//! instead of by matching error prose, and so tests can substitute an
//! in-process transport through the same construction path the TCP transport
//! uses.

use crate::wire::codec::{self, WireError};
use crate::wire::{ErrorCondition, Jid, Stanza};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

const CHANNEL_DEPTH: usize = 64;

/// Login material for an authenticated connection.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub jid: Jid,
    pub password: String,
}

/// How a connection should authenticate.
#[derive(Debug, Clone, Copy)]
pub enum ConnectAuth<'a> {
    Credentials(&'a Credentials),
    Anonymous,
}

/// Establishment failures, classified structurally.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("authentication rejected by the pubsub server")]
    Unauthorized,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Opens connections. Implemented by the TCP transport and by test harnesses.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        auth: ConnectAuth<'_>,
    ) -> impl Future<Output = Result<Connection, ConnectError>> + Send;
}

/// Session-facing handle for one live connection.
pub struct Connection {
    jid: Jid,
    outbound: mpsc::Sender<Stanza>,
    inbound: Option<mpsc::Receiver<Stanza>>,
    shutdown: watch::Sender<bool>,
}

/// The transport-facing half produced alongside a [`Connection`]. The TCP
/// transport pumps it against a socket; tests drive it directly as the remote
/// peer.
pub struct ConnectionDriver {
    pub jid: Jid,
    pub outbound_rx: mpsc::Receiver<Stanza>,
    pub inbound_tx: mpsc::Sender<Stanza>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Build a connection and its driver, linked by bounded channels.
    pub fn channel(jid: Jid) -> (Connection, ConnectionDriver) {
        let (outbound, outbound_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (inbound_tx, inbound) = mpsc::channel(CHANNEL_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);
        (
            Connection {
                jid: jid.clone(),
                outbound,
                inbound: Some(inbound),
                shutdown,
            },
            ConnectionDriver {
                jid,
                outbound_rx,
                inbound_tx,
                shutdown_rx,
            },
        )
    }

    /// The address the server bound this connection to.
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn sender(&self) -> mpsc::Sender<Stanza> {
        self.outbound.clone()
    }

    /// Take the inbound receiver. There is exactly one consumer; the session's
    /// demultiplexer claims it at construction.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<Stanza>> {
        self.inbound.take()
    }

    /// Signal the transport to stop. Safe to call repeatedly.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("jid", &self.jid).finish()
    }
}

// ---------------------------------------------------------------------------
// Connect handshake
// ---------------------------------------------------------------------------

/// Frames exchanged before stanza traffic starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Handshake {
    Hello {
        domain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<HelloCredentials>,
    },
    Welcome {
        jid: Jid,
    },
    Rejected {
        condition: ErrorCondition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloCredentials {
    pub jid: Jid,
    pub password: String,
}

// ---------------------------------------------------------------------------
// TCP transport
// ---------------------------------------------------------------------------

/// Connects over TCP and pumps frames with a reader and a writer task.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    server: String,
    domain: String,
}

impl TcpConnector {
    pub fn new(server: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            domain: domain.into(),
        }
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, auth: ConnectAuth<'_>) -> Result<Connection, ConnectError> {
        let stream = TcpStream::connect(&self.server)
            .await
            .map_err(|err| ConnectError::Transport(err.to_string()))?;
        let (mut rd, mut wr) = stream.into_split();

        let hello = Handshake::Hello {
            domain: self.domain.clone(),
            credentials: match auth {
                ConnectAuth::Credentials(creds) => Some(HelloCredentials {
                    jid: creds.jid.clone(),
                    password: creds.password.clone(),
                }),
                ConnectAuth::Anonymous => None,
            },
        };
        codec::write_frame(&mut wr, &hello)
            .await
            .map_err(transport)?;

        let jid = match codec::read_frame::<_, Handshake>(&mut rd)
            .await
            .map_err(transport)?
        {
            Some(Handshake::Welcome { jid }) => jid,
            Some(Handshake::Rejected {
                condition: ErrorCondition::NotAuthorized,
                ..
            }) => return Err(ConnectError::Unauthorized),
            Some(Handshake::Rejected { condition, text }) => {
                return Err(ConnectError::Transport(format!(
                    "handshake rejected: {condition}{}",
                    text.map(|t| format!(" ({t})")).unwrap_or_default()
                )))
            }
            Some(Handshake::Hello { .. }) => {
                return Err(ConnectError::Transport(
                    "unexpected hello from server".to_string(),
                ))
            }
            None => {
                return Err(ConnectError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
        };

        let (connection, driver) = Connection::channel(jid);
        let ConnectionDriver {
            mut outbound_rx,
            inbound_tx,
            shutdown_rx,
            ..
        } = driver;

        let mut writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = outbound_rx.recv() => match next {
                        Some(stanza) => {
                            if let Err(err) = codec::write_frame(&mut wr, &stanza).await {
                                tracing::warn!("outbound frame write failed: {err}");
                                break;
                            }
                        }
                        None => break,
                    },
                    changed = writer_shutdown.changed() => {
                        if changed.is_err() || *writer_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut reader_shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = codec::read_frame::<_, Stanza>(&mut rd) => match frame {
                        Ok(Some(stanza)) => {
                            if inbound_tx.send(stanza).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!("inbound frame read failed: {err}");
                            break;
                        }
                    },
                    changed = reader_shutdown.changed() => {
                        if changed.is_err() || *reader_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(connection)
    }
}

fn transport(err: WireError) -> ConnectError {
    ConnectError::Transport(err.to_string())
}
