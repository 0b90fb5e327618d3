use super::ListenerOracle;
use super::report::ConnectionReport;
use super::status::SharedStatus;
use crate::config::{Mode, StreamRequest, TcpConfig, TimingField};
use crate::{Result, SimError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One connection in a port's history
///
/// The config is a snapshot taken when the connection started; the status
/// is the live handle, so readers see updates until the connection closes.
#[derive(Debug, Clone)]
pub struct ConnectionHistory {
    pub config: TcpConfig,
    pub status: SharedStatus,
}

impl ConnectionHistory {
    pub fn report(&self) -> ConnectionReport {
        ConnectionReport::capture(&self.config, &self.status)
    }
}

#[derive(Default)]
struct StoreInner {
    configs: HashMap<u16, TcpConfig>,
    history: HashMap<u16, Vec<ConnectionHistory>>,
}

/// Per-port configs and connection history
pub struct ConfigStore {
    inner: Mutex<StoreInner>,
    oracle: Arc<dyn ListenerOracle>,
}

impl ConfigStore {
    pub fn new(oracle: Arc<dyn ListenerOracle>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            oracle,
        }
    }

    /// Validates, resolves and stores a full config for `port`.
    ///
    /// A config with unparseable fields is rejected as a whole and the
    /// previous config stays in place.
    pub fn set_config(&self, port: u16, mut config: TcpConfig) -> Result<TcpConfig> {
        config.port = port;
        config.resolve()?;
        config.listener_id = self.oracle.listener_id(port);

        let mut inner = self.inner.lock();
        inner.configs.insert(port, config.clone());
        inner.history.entry(port).or_default();
        info!(port, mode = %config.mode, listener_id = %config.listener_id, "TCP config applied");
        Ok(config)
    }

    pub fn get_config(&self, port: u16) -> Option<TcpConfig> {
        self.inner.lock().configs.get(&port).cloned()
    }

    pub fn remove_config(&self, port: u16) -> Option<TcpConfig> {
        self.inner.lock().configs.remove(&port)
    }

    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.inner.lock().configs.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Applies `change` to the stored config of `port` and re-resolves it.
    ///
    /// Nothing is stored if the port is unknown, `change` fails, or the
    /// result does not resolve.
    pub fn update_config<F>(&self, port: u16, change: F) -> Result<TcpConfig>
    where
        F: FnOnce(&mut TcpConfig) -> Result<()>,
    {
        let mut inner = self.inner.lock();
        let current = inner.configs.get(&port).ok_or(SimError::UnknownPort(port))?;
        let mut updated = current.clone();
        change(&mut updated)?;
        updated.resolve()?;
        debug!(port, mode = %updated.mode, "TCP config updated");
        inner.configs.insert(port, updated.clone());
        Ok(updated)
    }

    pub fn set_timing(&self, port: u16, field: TimingField, value: &str) -> Result<TcpConfig> {
        self.update_config(port, |config| config.set_timing(field, value))
    }

    pub fn set_stream_params(&self, port: u16, request: &StreamRequest) -> Result<TcpConfig> {
        self.update_config(port, |config| config.set_stream_request(request))
    }

    pub fn set_expected_payload_length(&self, port: u16, length: usize) -> Result<TcpConfig> {
        self.update_config(port, |config| {
            config.set_expected_payload_length(length);
            Ok(())
        })
    }

    pub fn set_expected_payload(&self, port: u16, payload: Vec<u8>) -> Result<TcpConfig> {
        self.update_config(port, |config| {
            config.set_expected_payload(payload);
            Ok(())
        })
    }

    pub fn set_response_payloads(
        &self,
        port: u16,
        payloads: Vec<String>,
        keep_open: bool,
        respond_after_read: bool,
    ) -> Result<TcpConfig> {
        self.update_config(port, |config| {
            config.response_payloads = payloads;
            config.keep_open = keep_open;
            config.respond_after_read = respond_after_read;
            config.enable_mode(Mode::ResponsePayload);
            Ok(())
        })
    }

    pub fn set_echo_response(&self, port: u16, size: usize, delay: &str) -> Result<TcpConfig> {
        self.update_config(port, |config| {
            config.echo_response_size = size;
            config.set_timing(TimingField::EchoResponseDelay, delay)
        })
    }

    /// Turns exactly one mode on for `port`
    pub fn enable_mode(&self, port: u16, mode: Mode) -> Result<TcpConfig> {
        self.update_config(port, |config| {
            config.enable_mode(mode);
            Ok(())
        })
    }

    pub fn append_history(&self, port: u16, entry: ConnectionHistory) {
        self.inner.lock().history.entry(port).or_default().push(entry);
    }

    /// History for one port or all ports, optionally filtered by the mode
    /// each connection actually ran with
    pub fn history(&self, port: Option<u16>, mode: Option<Mode>) -> Vec<ConnectionHistory> {
        let inner = self.inner.lock();
        let mut ports: Vec<u16> = match port {
            Some(port) => vec![port],
            None => inner.history.keys().copied().collect(),
        };
        ports.sort_unstable();

        ports
            .iter()
            .filter_map(|port| inner.history.get(port))
            .flatten()
            .filter(|entry| mode.is_none_or(|mode| entry.config.mode == mode))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self, port: Option<u16>) {
        let mut inner = self.inner.lock();
        match port {
            Some(port) => {
                if let Some(entries) = inner.history.get_mut(&port) {
                    entries.clear();
                }
            }
            None => inner.history.values_mut().for_each(Vec::clear),
        }
        info!(?port, "Connection history cleared");
    }
}
