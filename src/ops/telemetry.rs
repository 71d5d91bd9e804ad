//! Tracing initialization and the ops HTTP endpoint.
//!
//! The endpoint serves plain-text counters on `/metrics`, liveness and
//! readiness probes, and a runtime log-level control backed by the
//! subscriber's reload handle.

use crate::core::time::Clock;
use crate::fanout::Forwarder;
use crate::gateway::GatewayMetrics;
use crate::session::SessionProvider;
use crate::wire::Connector;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

pub type LogHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize JSON logging with a reloadable level filter.
pub fn init_tracing(log_level: Option<&str>) -> Result<LogHandle> {
    let level = log_level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(filter);
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(handle)
}

/// Everything the ops endpoint reports on.
pub struct TelemetrySources<N: Connector, C: Clock> {
    pub provider: Arc<SessionProvider<N, C>>,
    pub forwarder: Option<Arc<Forwarder>>,
    pub gateway: Arc<GatewayMetrics>,
    pub log_handle: Option<LogHandle>,
}

/// Bind the ops endpoint and serve until shutdown. Returns the bound address.
pub async fn start_http<N, C>(
    bind: &str,
    sources: TelemetrySources<N, C>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr>
where
    N: Connector,
    C: Clock,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind telemetry endpoint on {bind}"))?;
    let addr = listener.local_addr().context("telemetry local addr")?;
    tracing::info!("telemetry endpoint listening on {}", addr);
    let sources = Arc::new(sources);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((mut socket, _addr)) => {
                        let sources = sources.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_conn(&mut socket, &sources).await {
                                tracing::warn!("telemetry handler error: {err:#}");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!("telemetry accept error: {err}");
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
    socket: &mut tokio::net::TcpStream,
    sources: &TelemetrySources<N, C>,
) -> Result<()>
where
    N: Connector,
    C: Clock,
{
    let mut buf = [0u8; 4096];
    let n = socket.read(&mut buf).await?;
    let req = String::from_utf8_lossy(&buf[..n]);
    let first = req.lines().next().unwrap_or("");
    let target = first.split_whitespace().nth(1).unwrap_or("/");
    let (route, query) = target.split_once('?').unwrap_or((target, ""));

    let (status, body, content_type) = match route {
        "/metrics" => (200, collect_metrics(sources), "text/plain"),
        "/livez" => (200, "ok".to_string(), "text/plain"),
        "/readyz" => (200, "ok".to_string(), "text/plain"),
        "/v1/loglevel" => {
            if let Some(handle) = &sources.log_handle {
                if let Some(level) = query.strip_prefix("level=") {
                    if let Ok(filter) = EnvFilter::try_new(level) {
                        let _ = handle.modify(|f| *f = filter);
                        tracing::info!(level, "log level reloaded");
                    }
                }
            }
            (200, "{\"status\":\"ok\"}".to_string(), "application/json")
        }
        _ => (404, "not found".to_string(), "text/plain"),
    };
    let resp = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    socket.write_all(resp.as_bytes()).await?;
    Ok(())
}

fn collect_metrics<N, C>(sources: &TelemetrySources<N, C>) -> String
where
    N: Connector,
    C: Clock,
{
    let sessions = sources.provider.session_count();
    let subscriptions = sources.provider.subscription_count();
    let anonymous = sources.provider.context().has_anonymous() as u8;
    let requests = sources.gateway.requests();
    let (published, failed) = sources
        .forwarder
        .as_ref()
        .map(|f| (f.published(), f.failed()))
        .unwrap_or((0, 0));
    format!(
        "photon_sessions {}\nphoton_subscriptions {}\nphoton_anonymous_session {}\nphoton_gateway_requests_total {}\nphoton_fanout_published_total {}\nphoton_fanout_failed_total {}\n",
        sessions, subscriptions, anonymous, requests, published, failed,
    )
}
