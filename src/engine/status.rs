use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Status handle shared read-only with the history and the active registry
pub type SharedStatus = Arc<Mutex<ConnectionStatus>>;

/// Why a connection ended
///
/// Each cause maps onto exactly one terminal flag of [`ConnectionStatus`].
#[derive(Error, Debug)]
pub enum CloseCause {
    #[error("client closed the connection")]
    ClientClosed,

    #[error("server closed the connection")]
    ServerClosed,

    #[error("read timed out")]
    ReadTimeout,

    #[error("connection was idle for too long")]
    IdleTimeout,

    #[error("connection life expired")]
    LifeTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloseCause {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CloseCause::ReadTimeout
                | CloseCause::IdleTimeout
                | CloseCause::LifeTimeout
                | CloseCause::WriteTimeout
        )
    }
}

/// Bookkeeping for one accepted connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionStatus {
    pub port: u16,
    pub request_id: u64,
    pub listener_id: String,

    #[serde(with = "humantime_serde")]
    pub connection_start_time: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub connection_close_time: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub first_byte_in_at: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub last_byte_in_at: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub first_byte_out_at: Option<SystemTime>,
    #[serde(with = "humantime_serde")]
    pub last_byte_out_at: Option<SystemTime>,

    pub total_bytes_read: u64,
    pub total_bytes_sent: u64,
    pub total_reads: u64,
    pub total_writes: u64,

    pub client_closed: bool,
    pub server_closed: bool,
    pub error_closed: bool,
    pub read_timeout: bool,
    pub idle_timeout: bool,
    pub life_timeout: bool,
    pub closed: bool,
}

impl ConnectionStatus {
    pub fn new(port: u16, request_id: u64, listener_id: &str) -> Self {
        Self {
            port,
            request_id,
            listener_id: listener_id.to_string(),
            connection_start_time: Some(SystemTime::now()),
            ..Default::default()
        }
    }

    pub fn record_read(&mut self, n: usize) {
        if self.closed || n == 0 {
            return;
        }
        let now = SystemTime::now();
        self.first_byte_in_at.get_or_insert(now);
        self.last_byte_in_at = Some(now);
        self.total_bytes_read += n as u64;
        self.total_reads += 1;
    }

    pub fn record_write(&mut self, n: usize) {
        if self.closed || n == 0 {
            return;
        }
        let now = SystemTime::now();
        self.first_byte_out_at.get_or_insert(now);
        self.last_byte_out_at = Some(now);
        self.total_bytes_sent += n as u64;
        self.total_writes += 1;
    }

    /// Sets the flag for `cause` without closing the connection
    pub fn record_cause(&mut self, cause: &CloseCause) {
        if self.closed {
            return;
        }
        match cause {
            CloseCause::ClientClosed => self.client_closed = true,
            CloseCause::ServerClosed => self.server_closed = true,
            CloseCause::ReadTimeout => self.read_timeout = true,
            CloseCause::IdleTimeout => self.idle_timeout = true,
            CloseCause::LifeTimeout => self.life_timeout = true,
            CloseCause::WriteTimeout | CloseCause::Io(_) => self.error_closed = true,
        }
    }

    /// Records the final cause and freezes the status
    pub fn record_close(&mut self, cause: &CloseCause) {
        self.record_cause(cause);
        if !self.closed {
            self.closed = true;
            self.connection_close_time = Some(SystemTime::now());
        }
    }
}
