use super::status::{ConnectionStatus, SharedStatus};
use crate::config::TcpConfig;
use serde::{Deserialize, Serialize};

/// A connection as reported by the inspection operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub status: ConnectionStatus,
    pub config: TcpConfig,
}

impl ConnectionReport {
    /// Copies the current state of a live status
    pub fn capture(config: &TcpConfig, status: &SharedStatus) -> Self {
        Self {
            status: status.lock().clone(),
            config: config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_capture_and_render() {
        let config = TcpConfig::new(7000);
        let status = Arc::new(Mutex::new(ConnectionStatus::new(7000, 2, "7000-1")));
        status.lock().record_read(12);

        let report = ConnectionReport::capture(&config, &status);
        status.lock().record_read(3);
        assert_eq!(report.status.total_bytes_read, 12);

        let json = serde_json::to_string_pretty(&[report.clone()]).unwrap();
        let parsed: Vec<ConnectionReport> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].status.listener_id, "7000-1");
        assert_eq!(parsed[0].config.port, 7000);
        assert!(json.contains("\"totalBytesRead\": 12"));
    }
}
