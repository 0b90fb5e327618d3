//! The TCP connection engine
//!
//! [`Engine`] ties the per-port [`ConfigStore`], the live
//! [`ActiveConnectionRegistry`] and the sinks together, and turns an accepted
//! stream into a running [`ConnectionHandler`].

mod echo_buffer;
mod handler;
mod modes;
mod registry;
mod report;
mod status;
mod store;

pub use echo_buffer::EchoBuffer;
pub use handler::ConnectionHandler;
pub use modes::Verdict;
pub use registry::{ActiveConnection, ActiveConnectionRegistry};
pub use report::ConnectionReport;
pub use status::{CloseCause, ConnectionStatus, SharedStatus};
pub use store::{ConfigStore, ConnectionHistory};

use crate::config::{Mode, TcpConfig};
use crate::{Result, SimError};
use crate::sinks::{ConnectionEvent, EventSink, MetricsSink, ModeCounters, TracingEventSink};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, warn};

/// What the engine needs to know about the listeners feeding it
pub trait ListenerOracle: Send + Sync {
    fn is_listener_open(&self, port: u16) -> bool;

    /// Current listener id for `port`; changes every time the port is reopened
    fn listener_id(&self, port: u16) -> String;

    /// Label prefixed to every message the server sends on `port`
    fn host_label(&self, port: u16) -> String;
}

/// Connection engine shared by every accept loop
pub struct Engine {
    store: ConfigStore,
    registry: ActiveConnectionRegistry,
    oracle: Arc<dyn ListenerOracle>,
    metrics: Arc<dyn MetricsSink>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    /// Creates an engine counting modes in memory and logging events.
    pub fn new(oracle: Arc<dyn ListenerOracle>) -> Self {
        Self::with_sinks(
            oracle,
            Arc::new(ModeCounters::default()),
            Arc::new(TracingEventSink),
        )
    }

    pub fn with_sinks(
        oracle: Arc<dyn ListenerOracle>,
        metrics: Arc<dyn MetricsSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store: ConfigStore::new(oracle.clone()),
            registry: ActiveConnectionRegistry::new(),
            oracle,
            metrics,
            events,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn registry(&self) -> &ActiveConnectionRegistry {
        &self.registry
    }

    pub fn set_config(&self, port: u16, config: TcpConfig) -> Result<TcpConfig> {
        self.store.set_config(port, config)
    }

    /// Serves one accepted connection until it closes.
    ///
    /// Returns `false` without touching the stream when `port` has no config.
    pub async fn serve_connection<S>(&self, port: u16, request_id: u64, conn: S) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(mut config) = self.store.get_config(port) else {
            warn!(port, request_id, "No TCP config for port, connection not served");
            return false;
        };
        let listener_id = self.oracle.listener_id(port);
        config.listener_id = listener_id.clone();

        let status: SharedStatus = Arc::new(Mutex::new(ConnectionStatus::new(
            port,
            request_id,
            &listener_id,
        )));
        let cancel = CancellationToken::new();
        self.registry.register(
            &listener_id,
            request_id,
            ActiveConnection {
                port,
                config: config.clone(),
                status: status.clone(),
                cancel: cancel.clone(),
            },
        );
        self.store.append_history(
            port,
            ConnectionHistory {
                config: config.clone(),
                status: status.clone(),
            },
        );
        self.metrics.connection_started(config.mode.as_str());
        self.events
            .publish(ConnectionEvent::Opened(ConnectionReport::capture(
                &config, &status,
            )))
            .await;

        let span = tracing::info_span!("connection", port, request_id, mode = %config.mode);
        let handler = ConnectionHandler::new(conn, config.clone(), status, self.oracle.clone(), cancel);
        let status = handler.run().instrument(span).await;

        self.registry.deregister(&listener_id, request_id);
        self.events
            .publish(ConnectionEvent::Closed(ConnectionReport::capture(
                &config, &status,
            )))
            .await;
        true
    }

    /// Force-closes every live connection accepted under `listener_id`.
    pub fn close_listener_connections(&self, listener_id: &str) -> usize {
        self.registry.close_all(listener_id)
    }

    pub fn active_connections(&self, port: Option<u16>) -> Vec<ConnectionReport> {
        self.registry.connections(port)
    }

    /// History for `port` (or every port), optionally only connections that
    /// ran `mode`
    pub fn history(&self, port: Option<u16>, mode: Option<Mode>) -> Vec<ConnectionReport> {
        self.store
            .history(port, mode)
            .iter()
            .map(ConnectionHistory::report)
            .collect()
    }

    /// [`history`](Self::history) filtered by a mode name such as `"stream"`.
    ///
    /// An empty name means no filter; an unknown one is an error.
    pub fn history_by_name(&self, port: Option<u16>, mode: &str) -> Result<Vec<ConnectionReport>> {
        let mode = match mode.trim() {
            "" => None,
            name => Some(
                Mode::from_name(name)
                    .ok_or_else(|| SimError::InvalidConfig(format!("unknown mode {name:?}")))?,
            ),
        };
        Ok(self.history(port, mode))
    }

    pub fn clear_history(&self, port: Option<u16>) {
        self.store.clear_history(port)
    }
}
