use super::report::ConnectionReport;
use super::status::SharedStatus;
use crate::config::TcpConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A live connection as seen from outside its handler
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub port: u16,
    pub config: TcpConfig,
    pub status: SharedStatus,
    /// Cancelling this forces the handler's pending I/O to fail
    pub cancel: CancellationToken,
}

/// Live connections grouped by listener id
#[derive(Debug, Default)]
pub struct ActiveConnectionRegistry {
    listeners: Mutex<HashMap<String, HashMap<u64, ActiveConnection>>>,
}

impl ActiveConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener_id: &str, request_id: u64, connection: ActiveConnection) {
        self.listeners
            .lock()
            .entry(listener_id.to_string())
            .or_default()
            .insert(request_id, connection);
    }

    pub fn deregister(&self, listener_id: &str, request_id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(connections) = listeners.get_mut(listener_id) {
            connections.remove(&request_id);
            if connections.is_empty() {
                listeners.remove(listener_id);
            }
        }
    }

    /// Force-closes every connection accepted by `listener_id`.
    ///
    /// Entries are removed by their own handlers as they wind down.
    pub fn close_all(&self, listener_id: &str) -> usize {
        let listeners = self.listeners.lock();
        let Some(connections) = listeners.get(listener_id) else {
            return 0;
        };
        for connection in connections.values() {
            connection.cancel.cancel();
        }
        info!(listener_id, count = connections.len(), "Force-closed listener connections");
        connections.len()
    }

    pub fn count(&self) -> usize {
        self.listeners.lock().values().map(HashMap::len).sum()
    }

    /// Reports for live connections on `port`, or on every port
    pub fn connections(&self, port: Option<u16>) -> Vec<ConnectionReport> {
        let listeners = self.listeners.lock();
        let mut reports: Vec<ConnectionReport> = listeners
            .values()
            .flat_map(HashMap::values)
            .filter(|c| port.is_none_or(|p| c.port == p))
            .map(|c| ConnectionReport::capture(&c.config, &c.status))
            .collect();
        reports.sort_by_key(|r| (r.status.port, r.status.request_id));
        reports
    }
}
