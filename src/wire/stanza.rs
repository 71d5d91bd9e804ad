//! Typed model of the pubsub protocol's wire units.
//!
//! Every frame on a connection is one [`Stanza`]. Queries and their replies
//! are `Iq` stanzas correlated by id; push-style publish notifications arrive
//! as `Message` stanzas carrying a [`PubsubEvent`]; `Presence` announces
//! availability to a domain.

use crate::feed::FeedEntry;
use crate::wire::Jid;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stanza {
    Iq(Iq),
    Message(Message),
    Presence(Presence),
}

impl Stanza {
    /// The correlation id, if this stanza carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => Some(&iq.id),
            Stanza::Message(msg) => msg.id.as_deref(),
            Stanza::Presence(_) => None,
        }
    }

    pub fn as_iq(&self) -> Option<&Iq> {
        match self {
            Stanza::Iq(iq) => Some(iq),
            _ => None,
        }
    }

    /// Synthesized terminal error delivered when no reply arrived before the
    /// correlation window elapsed. Indistinguishable at the caller boundary
    /// from a genuine error reply.
    pub fn reply_timeout(id: impl Into<String>) -> Stanza {
        Stanza::Iq(Iq {
            id: id.into(),
            from: None,
            to: None,
            body: IqBody::Error(
                StanzaError::new(ErrorCondition::ServiceUnavailable)
                    .with_text("no reply before the correlation window elapsed"),
            ),
        })
    }
}

/// A query or its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iq {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Jid>,
    pub body: IqBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IqBody {
    Get(PubsubRequest),
    Set(PubsubRequest),
    Result(Option<PubsubResponse>),
    Error(StanzaError),
}

impl Iq {
    /// Build a success acknowledgment for a query the remote peer initiated:
    /// same id, addressing reversed.
    pub fn acknowledge(request: &Iq) -> Iq {
        Iq {
            id: request.id.clone(),
            from: request.to.clone(),
            to: request.from.clone(),
            body: IqBody::Result(None),
        }
    }

    pub fn error(&self) -> Option<&StanzaError> {
        match &self.body {
            IqBody::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&PubsubResponse> {
        match &self.body {
            IqBody::Result(payload) => payload.as_ref(),
            _ => None,
        }
    }
}

/// Operations this side issues against a pubsub service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PubsubRequest {
    Subscribe { node: String },
    Publish { node: String, entry: FeedEntry },
    Items { node: String, max: Option<usize> },
}

/// Reply payloads for [`PubsubRequest`] operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PubsubResponse {
    Subscribed { node: String },
    Published { node: String, id: String },
    Items { node: String, entries: Vec<FeedEntry> },
}

/// Push notification for newly published items on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<PubsubEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubsubEvent {
    pub node: String,
    pub items: Vec<FeedEntry>,
}

/// Availability announcement toward a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Jid>,
}

/// Defined error conditions a peer can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    BadRequest,
    Conflict,
    Forbidden,
    InternalServerError,
    ItemNotFound,
    NotAuthorized,
    ServiceUnavailable,
}

impl ErrorCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCondition::BadRequest => "bad-request",
            ErrorCondition::Conflict => "conflict",
            ErrorCondition::Forbidden => "forbidden",
            ErrorCondition::InternalServerError => "internal-server-error",
            ErrorCondition::ItemNotFound => "item-not-found",
            ErrorCondition::NotAuthorized => "not-authorized",
            ErrorCondition::ServiceUnavailable => "service-unavailable",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-level failure attached to an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StanzaError {
    pub condition: ErrorCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StanzaError {
    pub fn new(condition: ErrorCondition) -> Self {
        Self {
            condition,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} ({text})", self.condition),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl std::error::Error for StanzaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_echoes_id_and_reverses_addressing() {
        let request = Iq {
            id: "q1".into(),
            from: Some("peer@example.org".parse().unwrap()),
            to: Some("gateway@example.org".parse().unwrap()),
            body: IqBody::Get(PubsubRequest::Items {
                node: "news".into(),
                max: None,
            }),
        };
        let ack = Iq::acknowledge(&request);
        assert_eq!(ack.id, "q1");
        assert_eq!(ack.from, request.to);
        assert_eq!(ack.to, request.from);
        assert!(matches!(ack.body, IqBody::Result(None)));
    }

    #[test]
    fn reply_timeout_is_a_service_unavailable_error() {
        let stanza = Stanza::reply_timeout("q9");
        assert_eq!(stanza.id(), Some("q9"));
        let err = stanza.as_iq().unwrap().error().unwrap();
        assert_eq!(err.condition, ErrorCondition::ServiceUnavailable);
    }

    #[test]
    fn presence_has_no_correlation_id() {
        let stanza = Stanza::Presence(Presence {
            from: None,
            to: Some(Jid::domain("example.org")),
        });
        assert_eq!(stanza.id(), None);
    }
}
