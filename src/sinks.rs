//! Where connection events and per-mode counts go
//!
//! The engine only talks to the [`EventSink`] and [`MetricsSink`] traits.
//! [`TracingEventSink`] and [`ModeCounters`] are the defaults used by the
//! binary.

use crate::config::Mode;
use crate::engine::ConnectionReport;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Lifecycle notification for one connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "report", rename_all = "camelCase")]
pub enum ConnectionEvent {
    Opened(ConnectionReport),
    Closed(ConnectionReport),
}

impl ConnectionEvent {
    pub fn report(&self) -> &ConnectionReport {
        match self {
            ConnectionEvent::Opened(report) | ConnectionEvent::Closed(report) => report,
        }
    }
}

/// Receives connection lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ConnectionEvent);
}

/// Counts connections per mode
pub trait MetricsSink: Send + Sync {
    /// Called once per served connection with the mode's name
    fn connection_started(&self, mode: &str);
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: ConnectionEvent) {
        let status = &event.report().status;
        match &event {
            ConnectionEvent::Opened(_) => info!(
                port = status.port,
                request_id = status.request_id,
                listener_id = %status.listener_id,
                "Connection opened"
            ),
            ConnectionEvent::Closed(_) => info!(
                port = status.port,
                request_id = status.request_id,
                bytes_read = status.total_bytes_read,
                bytes_sent = status.total_bytes_sent,
                client_closed = status.client_closed,
                error_closed = status.error_closed,
                "Connection finished"
            ),
        }
    }
}

/// In-memory connection counts keyed by mode name
#[derive(Debug, Default)]
pub struct ModeCounters {
    counts: Mutex<HashMap<String, u64>>,
}

impl ModeCounters {
    pub fn count(&self, mode: Mode) -> u64 {
        self.counts.lock().get(mode.as_str()).copied().unwrap_or(0)
    }
}

impl MetricsSink for ModeCounters {
    fn connection_started(&self, mode: &str) {
        *self.counts.lock().entry(mode.to_string()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use crate::engine::ConnectionStatus;

    #[test]
    fn test_mode_counters() {
        let counters = ModeCounters::default();
        counters.connection_started(Mode::Echo.as_str());
        counters.connection_started(Mode::Echo.as_str());
        counters.connection_started(Mode::Stream.as_str());

        assert_eq!(counters.count(Mode::Echo), 2);
        assert_eq!(counters.count(Mode::Stream), 1);
        assert_eq!(counters.count(Mode::Conversation), 0);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = ConnectionEvent::Opened(ConnectionReport {
            status: ConnectionStatus::new(8080, 3, "8080-1"),
            config: TcpConfig::new(8080),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "opened");
        assert_eq!(json["report"]["status"]["requestId"], 3);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_events() {
        let report = ConnectionReport {
            status: ConnectionStatus::new(8080, 1, "8080-1"),
            config: TcpConfig::new(8080),
        };
        TracingEventSink.publish(ConnectionEvent::Closed(report.clone())).await;
        assert_eq!(ConnectionEvent::Closed(report.clone()).report(), &report);
    }
}
