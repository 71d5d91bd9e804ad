use crate::core::config::Config;
use crate::core::time::Clock;
use crate::fanout::Forwarder;
use crate::gateway::{self, GatewayMetrics};
use crate::ops::telemetry::{self, LogHandle, TelemetrySources};
use crate::session::{GatewayContext, SessionProvider, SessionTimeouts};
use crate::wire::TcpConnector;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

/// Runtime scaffold: wires config, context, provider, forwarder, and the two
/// HTTP surfaces, then waits for shutdown.
pub struct Runtime<C: Clock> {
    config: Config,
    clock: C,
    provider: Arc<SessionProvider<TcpConnector, C>>,
    forwarder: Option<Arc<Forwarder>>,
    gateway_metrics: Arc<GatewayMetrics>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    log_handle: Option<LogHandle>,
    gateway_addr: Option<SocketAddr>,
    telemetry_addr: Option<SocketAddr>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C, log_handle: Option<LogHandle>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let forwarder = config
            .fanout
            .as_ref()
            .map(|f| Arc::new(Forwarder::new(f.base_url.as_str(), f.realm.as_str(), &f.key)));
        let connector = TcpConnector::new(
            config.upstream.server.as_str(),
            config.upstream.domain.as_str(),
        );
        let context = Arc::new(GatewayContext::new());
        let provider = Arc::new(SessionProvider::new(
            connector,
            clock.clone(),
            context,
            config.cache.session_ttl(),
            SessionTimeouts {
                reply_ttl: config.cache.reply_ttl(),
                subscription_ttl: config.cache.subscription_ttl(),
            },
            forwarder.clone(),
        ));
        Ok(Self {
            config,
            clock,
            provider,
            forwarder,
            gateway_metrics: Arc::new(GatewayMetrics::default()),
            shutdown_tx,
            shutdown_rx,
            log_handle,
            gateway_addr: None,
            telemetry_addr: None,
        })
    }

    /// Start the services and wait for shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start_services().await?;
        self.handle_shutdown().await
    }

    pub fn clock(&self) -> C {
        self.clock.clone()
    }

    pub fn provider(&self) -> Arc<SessionProvider<TcpConnector, C>> {
        self.provider.clone()
    }

    /// Bound gateway address once started.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    /// Bound telemetry address once started, if configured.
    pub fn telemetry_addr(&self) -> Option<SocketAddr> {
        self.telemetry_addr
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Test helper: start services without waiting for SIGINT.
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.start_services().await
    }

    /// Test helper: stop background tasks.
    pub fn shutdown_for_tests(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn start_services(&mut self) -> Result<()> {
        self.provider.spawn_sweeper(self.shutdown_rx.clone());
        if let Some(bind) = &self.config.telemetry.metrics_bind {
            let sources = TelemetrySources {
                provider: self.provider.clone(),
                forwarder: self.forwarder.clone(),
                gateway: self.gateway_metrics.clone(),
                log_handle: self.log_handle.clone(),
            };
            let addr = telemetry::start_http(bind, sources, self.shutdown_rx.clone()).await?;
            self.telemetry_addr = Some(addr);
        }
        let addr = gateway::start(
            &self.config.gateway.bind,
            self.provider.clone(),
            self.gateway_metrics.clone(),
            self.shutdown_rx.clone(),
        )
        .await?;
        self.gateway_addr = Some(addr);
        Ok(())
    }

    async fn handle_shutdown(&mut self) -> Result<()> {
        let mut external = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received");
            }
            _ = external.changed() => {
                tracing::info!("shutdown requested by component");
            }
        }
        self.shutdown_tx
            .send(true)
            .context("failed to broadcast shutdown")?;
        Ok(())
    }
}
