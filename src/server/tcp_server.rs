use super::ListenerSet;
use crate::config::{SimulatorConfig, TcpConfig};
use crate::engine::Engine;
use crate::sinks::{EventSink, MetricsSink, ModeCounters, TracingEventSink};
use crate::{Result, SimError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct AcceptLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs one accept loop per configured port and hands every connection to
/// the shared [`Engine`]
///
/// # Examples
///
/// ```no_run
/// use tcpsim::{SimulatorConfig, TcpConfig, TcpSimServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = TcpSimServer::new(&SimulatorConfig::default());
///     let addr = server
///         .add_listener(TcpConfig {
///             conversation: true,
///             ..TcpConfig::new(9000)
///         })
///         .await?;
///     println!("conversation mode on {addr}");
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct TcpSimServer {
    bind_host: String,
    listeners: Arc<ListenerSet>,
    engine: Arc<Engine>,
    accept_loops: Mutex<HashMap<u16, AcceptLoop>>,
    shutdown_signal: Arc<broadcast::Sender<()>>,
}

impl TcpSimServer {
    /// Creates a server with no listeners yet; see [`add_listener`](Self::add_listener).
    pub fn new(config: &SimulatorConfig) -> Self {
        Self::with_sinks(
            config,
            Arc::new(ModeCounters::default()),
            Arc::new(TracingEventSink),
        )
    }

    pub fn with_sinks(
        config: &SimulatorConfig,
        metrics: Arc<dyn MetricsSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let listeners = Arc::new(ListenerSet::new(&config.host_label));
        let engine = Arc::new(Engine::with_sinks(listeners.clone(), metrics, events));
        let (shutdown_signal, _) = broadcast::channel(1);
        Self {
            bind_host: config.bind_host.clone(),
            listeners,
            engine,
            accept_loops: Mutex::new(HashMap::new()),
            shutdown_signal: Arc::new(shutdown_signal),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn listeners(&self) -> &Arc<ListenerSet> {
        &self.listeners
    }

    /// Binds `config.port` (0 picks a free port), stores the config and
    /// starts accepting.
    ///
    /// A config that does not resolve is rejected before anything is bound.
    pub async fn add_listener(&self, config: TcpConfig) -> Result<SocketAddr> {
        config.clone().resolve()?;
        if self.accept_loops.lock().contains_key(&config.port) {
            return Err(SimError::InvalidConfig(format!(
                "port {} already has a listener",
                config.port
            )));
        }

        let listener = TcpListener::bind((self.bind_host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        let listener_id = self.listeners.open(port);
        if let Err(e) = self.engine.set_config(port, config) {
            self.listeners.close(port);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::accept_loop(
            listener,
            port,
            listener_id.clone(),
            self.engine.clone(),
            cancel.clone(),
        ));
        self.accept_loops.lock().insert(port, AcceptLoop { cancel, task });

        info!(address = %addr, %listener_id, "TCP listener started");
        Ok(addr)
    }

    async fn accept_loop(
        listener: TcpListener,
        port: u16,
        listener_id: String,
        engine: Arc<Engine>,
        cancel: CancellationToken,
    ) {
        let mut last_request_id = 0u64;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            last_request_id += 1;
                            let request_id = last_request_id;
                            info!(%addr, port, request_id, "Accepted connection");

                            let engine = engine.clone();
                            tokio::spawn(async move {
                                engine.serve_connection(port, request_id, stream).await;
                            });
                        }
                        Err(e) => {
                            error!(port, error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        info!(port, %listener_id, accepted = last_request_id, "Accept loop stopped");
    }

    /// Stops accepting on `port` and force-closes the connections it accepted.
    ///
    /// The port's config and history stay in place.
    pub async fn stop_listener(&self, port: u16) -> Result<usize> {
        let Some(accept) = self.accept_loops.lock().remove(&port) else {
            return Err(SimError::UnknownPort(port));
        };
        let listener_id = self.listeners.close(port).unwrap_or_default();

        accept.cancel.cancel();
        if let Err(e) = accept.task.await {
            warn!(port, error = %e, "Accept loop ended abnormally");
        }

        let closed = self.engine.close_listener_connections(&listener_id);
        info!(port, %listener_id, closed, "TCP listener stopped");
        Ok(closed)
    }

    /// Stops `port` and forgets its config; the history stays queryable.
    ///
    /// Returns the number of connections that were force-closed.
    pub async fn remove_listener(&self, port: u16) -> Result<usize> {
        let closed = self.stop_listener(port).await?;
        self.engine.store().remove_config(port);
        info!(port, "TCP listener removed");
        Ok(closed)
    }

    /// Rebinds `port` under a new listener id with its current config.
    pub async fn restart_listener(&self, port: u16) -> Result<SocketAddr> {
        let config = self
            .engine
            .store()
            .get_config(port)
            .ok_or(SimError::UnknownPort(port))?;
        self.stop_listener(port).await?;
        self.add_listener(config).await
    }

    /// Stops every listener.
    pub async fn shutdown(&self) {
        let ports: Vec<u16> = self.accept_loops.lock().keys().copied().collect();
        for port in ports {
            if let Err(e) = self.stop_listener(port).await {
                warn!(port, error = %e, "Failed to stop listener");
            }
        }
    }

    /// Serves until Ctrl-C or [`shutdown_signal`](Self::shutdown_signal) fires,
    /// then stops every listener.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_signal.subscribe();
        info!(ports = ?self.listeners.open_ports(), "TCP simulator running");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal, stopping listeners");
            }
            _ = shutdown_rx.recv() => {
                info!("Received internal shutdown signal, stopping listeners");
            }
        }

        self.shutdown().await;
        info!("TCP simulator stopped");
        Ok(())
    }

    /// Returns a sender that stops [`run`](Self::run) when signalled
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_signal.as_ref().clone()
    }
}
