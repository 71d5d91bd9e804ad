//! Wire layer for the pubsub protocol: addressing, typed stanzas, the frame
//! codec, and connection establishment.

pub mod codec;
pub mod connection;
pub mod jid;
pub mod stanza;

pub use codec::{read_frame, write_frame, WireError, MAX_FRAME_BYTES};
pub use connection::{
    ConnectAuth, ConnectError, Connection, ConnectionDriver, Connector, Credentials, Handshake,
    HelloCredentials, TcpConnector,
};
pub use jid::{Jid, JidError};
pub use stanza::{
    ErrorCondition, Iq, IqBody, Message, Presence, PubsubEvent, PubsubRequest, PubsubResponse,
    Stanza, StanzaError,
};
