//! HTTP gateway surface: feed resources over plain HTTP, backed by the
//! session layer.
//!
//! `GET /feed/{service}/{node...}` subscribes the resolved session to the
//! topic and returns its current items as Atom or JSON; `POST` to the same
//! path publishes a new entry. The session id travels in the `X-Session-Id`
//! request/response header pair; credentials arrive as HTTP Basic. One
//! request per connection keeps the loop simple.

use crate::core::time::Clock;
use crate::feed::{self, FeedEntry};
use crate::session::{ProviderError, SessionProvider, SubscribeError};
use crate::wire::{
    Connector, Credentials, ErrorCondition, IqBody, Jid, PubsubRequest, PubsubResponse, Stanza,
    StanzaError,
};
use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Header carrying the session id in both directions. Matched
/// case-insensitively on the way in.
pub const SESSION_HEADER: &str = "X-Session-Id";

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 1 << 20;

/// Request counters surfaced by the telemetry endpoint.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
}

impl GatewayMetrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Bind the gateway listener and serve until shutdown is signaled.
/// Returns the bound address.
pub async fn start<N, C>(
    bind: &str,
    provider: Arc<SessionProvider<N, C>>,
    metrics: Arc<GatewayMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr>
where
    N: Connector,
    C: Clock,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind gateway on {bind}"))?;
    let addr = listener.local_addr().context("gateway local addr")?;
    tracing::info!("gateway listening on {}", addr);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        let provider = provider.clone();
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_conn(stream, provider, metrics).await {
                                tracing::debug!("gateway connection error: {err:#}");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!("gateway accept error: {err}");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
    Ok(addr)
}

async fn handle_conn<N, C>(
    mut stream: TcpStream,
    provider: Arc<SessionProvider<N, C>>,
    metrics: Arc<GatewayMetrics>,
) -> Result<()>
where
    N: Connector,
    C: Clock,
{
    let request = read_request(&mut stream).await?;
    metrics.record_request();
    let response = route(&request, &provider).await;
    write_response(&mut stream, &response).await
}

async fn route<N, C>(request: &HttpRequest, provider: &SessionProvider<N, C>) -> HttpResponse
where
    N: Connector,
    C: Clock,
{
    let Some((service, node)) = parse_feed_path(&request.path) else {
        return HttpResponse::error(404, "no such resource");
    };
    let service: Jid = match service.parse() {
        Ok(jid) => jid,
        Err(_) => return HttpResponse::error(400, "invalid service address"),
    };
    match request.method.as_str() {
        "GET" => get_feed(request, provider, &service, &node).await,
        "POST" => post_entry(request, provider, &service, &node).await,
        _ => HttpResponse::error(405, "method not allowed"),
    }
}

async fn get_feed<N, C>(
    request: &HttpRequest,
    provider: &SessionProvider<N, C>,
    service: &Jid,
    node: &str,
) -> HttpResponse
where
    N: Connector,
    C: Clock,
{
    let resolved = match resolve_session(request, provider).await {
        Ok(resolved) => resolved,
        Err(response) => return *response,
    };

    // Keep the subscription warm so pushed items flow to fan-out; a
    // rejection here is the topic telling us to go away.
    if let Err(err) = resolved.session.subscribe(service, node).await {
        return match err {
            SubscribeError::Rejected(stanza_err) => condition_response(&stanza_err),
            SubscribeError::Evicted => HttpResponse::error(502, "subscription state lost"),
        };
    }

    let reply = resolved
        .session
        .send_query(
            service.clone(),
            IqBody::Get(PubsubRequest::Items {
                node: node.to_string(),
                max: None,
            }),
        )
        .await;
    let entries = match reply {
        Ok(Stanza::Iq(iq)) => match iq.body {
            IqBody::Result(Some(PubsubResponse::Items { entries, .. })) => entries,
            IqBody::Error(err) => return condition_response(&err),
            _ => return HttpResponse::error(502, "unexpected reply from pubsub service"),
        },
        Ok(_) => return HttpResponse::error(502, "unexpected reply from pubsub service"),
        Err(err) => return HttpResponse::error(502, &err.to_string()),
    };

    let wants_atom = request
        .header("accept")
        .is_some_and(|accept| accept.contains("atom"));
    let mut response = if wants_atom {
        HttpResponse::new(
            200,
            "application/atom+xml",
            feed::feed_to_atom(&service.to_string(), node, &entries).into_bytes(),
        )
    } else {
        HttpResponse::new(
            200,
            "application/json",
            feed::feed_to_json(&entries).into_bytes(),
        )
    };
    if let Some(id) = resolved.assigned_id {
        response = response.with_header(SESSION_HEADER, id);
    }
    response
}

#[derive(Debug, Deserialize)]
struct PublishPayload {
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

async fn post_entry<N, C>(
    request: &HttpRequest,
    provider: &SessionProvider<N, C>,
    service: &Jid,
    node: &str,
) -> HttpResponse
where
    N: Connector,
    C: Clock,
{
    let payload: PublishPayload = match serde_json::from_slice(&request.body) {
        Ok(payload) => payload,
        Err(err) => return HttpResponse::error(400, &format!("invalid entry payload: {err}")),
    };
    if payload.content.is_empty() {
        return HttpResponse::error(400, "entry content must not be empty");
    }

    let resolved = match resolve_session(request, provider).await {
        Ok(resolved) => resolved,
        Err(response) => return *response,
    };

    let mut entry = FeedEntry::new(
        uuid::Uuid::new_v4().simple().to_string(),
        payload.content,
        Utc::now(),
    );
    entry = match payload.author {
        Some(author) => entry.with_author(author),
        None => entry.with_author(resolved.session.jid().bare().to_string()),
    };
    if let Some(title) = payload.title {
        entry = entry.with_title(title);
    }
    let entry_id = entry.id.clone();

    let reply = resolved
        .session
        .send_query(
            service.clone(),
            IqBody::Set(PubsubRequest::Publish {
                node: node.to_string(),
                entry,
            }),
        )
        .await;
    let published_id = match reply {
        Ok(Stanza::Iq(iq)) => match iq.body {
            IqBody::Result(Some(PubsubResponse::Published { id, .. })) => id,
            IqBody::Result(_) => entry_id,
            IqBody::Error(err) => return condition_response(&err),
            _ => return HttpResponse::error(502, "unexpected reply from pubsub service"),
        },
        Ok(_) => return HttpResponse::error(502, "unexpected reply from pubsub service"),
        Err(err) => return HttpResponse::error(502, &err.to_string()),
    };

    let mut response = HttpResponse::new(
        201,
        "application/json",
        json!({ "id": published_id }).to_string().into_bytes(),
    );
    if let Some(id) = resolved.assigned_id {
        response = response.with_header(SESSION_HEADER, id);
    }
    response
}

async fn resolve_session<N, C>(
    request: &HttpRequest,
    provider: &SessionProvider<N, C>,
) -> Result<crate::session::Resolved<C>, Box<HttpResponse>>
where
    N: Connector,
    C: Clock,
{
    let credentials = match parse_basic_auth(request) {
        Ok(credentials) => credentials,
        Err(reason) => return Err(Box::new(HttpResponse::error(400, &reason))),
    };
    provider
        .resolve(request.header(SESSION_HEADER), credentials.as_ref())
        .await
        .map_err(|err| {
            Box::new(match err {
                ProviderError::Unauthorized => HttpResponse::error(401, "authentication rejected")
                    .with_header("WWW-Authenticate", "Basic realm=\"photon\"".to_string()),
                ProviderError::Connection(detail) => HttpResponse::error(502, &detail),
            })
        })
}

/// `/feed/{service}/{node...}` — the node may itself contain slashes.
fn parse_feed_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix("/feed/")?;
    let (service, node) = rest.split_once('/')?;
    if service.is_empty() || node.is_empty() {
        return None;
    }
    Some((service.to_string(), node.to_string()))
}

fn parse_basic_auth(request: &HttpRequest) -> Result<Option<Credentials>, String> {
    let Some(value) = request.header("authorization") else {
        return Ok(None);
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| "malformed authorization header".to_string())?;
    let text =
        String::from_utf8(decoded).map_err(|_| "malformed authorization header".to_string())?;
    let (user, password) = text
        .split_once(':')
        .ok_or_else(|| "authorization is missing a password".to_string())?;
    let jid: Jid = user
        .parse()
        .map_err(|_| format!("invalid account address: {user}"))?;
    Ok(Some(Credentials {
        jid,
        password: password.to_string(),
    }))
}

fn condition_response(err: &StanzaError) -> HttpResponse {
    let status = match err.condition {
        ErrorCondition::ItemNotFound => 404,
        ErrorCondition::Forbidden | ErrorCondition::NotAuthorized => 403,
        ErrorCondition::BadRequest => 400,
        ErrorCondition::Conflict => 409,
        ErrorCondition::ServiceUnavailable | ErrorCondition::InternalServerError => 502,
    };
    HttpResponse::error(status, &err.to_string())
}

// ---------------------------------------------------------------------------
// Minimal HTTP plumbing
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    status: u16,
    content_type: String,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

impl HttpResponse {
    fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body,
            headers: Vec::new(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::new(
            status,
            "application/json",
            json!({ "error": message }).to_string().into_bytes(),
        )
    }

    fn with_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }
}

async fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before the request head completed");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            anyhow::bail!("request head too large");
        }
    };

    let head = std::str::from_utf8(&buf[..head_end]).context("request head is not utf-8")?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().context("missing request line")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing method")?.to_string();
    let path = parts.next().context("missing path")?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        anyhow::bail!("request body too large");
    }
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before the request body completed");
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(headers: Vec<(String, String)>) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            path: "/feed/s/n".into(),
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn feed_paths_keep_slashes_inside_the_node() {
        assert_eq!(
            parse_feed_path("/feed/pubsub.example.org/user@example.org/posts"),
            Some((
                "pubsub.example.org".to_string(),
                "user@example.org/posts".to_string()
            ))
        );
        assert_eq!(parse_feed_path("/feed/onlyservice"), None);
        assert_eq!(parse_feed_path("/other"), None);
    }

    #[test]
    fn session_header_matches_case_insensitively() {
        let request = request_with(vec![("x-session-ID".into(), "abc".into())]);
        assert_eq!(request.header(SESSION_HEADER), Some("abc"));
    }

    #[test]
    fn basic_auth_decodes_to_credentials() {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode("alice@example.org:sekrit");
        let request = request_with(vec![("Authorization".into(), format!("Basic {encoded}"))]);
        let creds = parse_basic_auth(&request).unwrap().unwrap();
        assert_eq!(creds.jid.to_string(), "alice@example.org");
        assert_eq!(creds.password, "sekrit");
    }

    #[test]
    fn malformed_basic_auth_is_a_bad_request() {
        let request = request_with(vec![("Authorization".into(), "Basic ???".into())]);
        assert!(parse_basic_auth(&request).is_err());

        let missing_password = base64::engine::general_purpose::STANDARD.encode("alice");
        let request = request_with(vec![(
            "Authorization".into(),
            format!("Basic {missing_password}"),
        )]);
        assert!(parse_basic_auth(&request).is_err());
    }

    #[test]
    fn other_auth_schemes_are_ignored() {
        let request = request_with(vec![("Authorization".into(), "Bearer tok".into())]);
        assert!(parse_basic_auth(&request).unwrap().is_none());
    }

    #[test]
    fn protocol_conditions_map_to_http_statuses() {
        let cases = [
            (ErrorCondition::ItemNotFound, 404),
            (ErrorCondition::Forbidden, 403),
            (ErrorCondition::NotAuthorized, 403),
            (ErrorCondition::ServiceUnavailable, 502),
            (ErrorCondition::Conflict, 409),
        ];
        for (condition, status) in cases {
            let response = condition_response(&StanzaError::new(condition));
            assert_eq!(response.status, status, "{condition}");
        }
    }
}
