use thiserror::Error;

/// Error types for the tcpsim library
#[derive(Error, Debug)]
pub enum SimError {
    /// Socket-level errors (bind, accept, read, write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more configuration fields could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The port has no TCP configuration and is not a managed listener
    #[error("Port {0} is not a managed TCP listener")]
    UnknownPort(u16),

    /// JSON encoding or decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for the tcpsim library
pub type Result<T> = std::result::Result<T, SimError>;

pub mod config;
pub mod engine;
pub mod server;
pub mod sinks;
pub mod timing;

// Re-export main types for convenience
pub use config::{Mode, SimulatorConfig, StreamRequest, TcpConfig, TimingField};
pub use engine::{
    CloseCause, ConnectionHistory, ConnectionReport, ConnectionStatus, Engine, ListenerOracle,
};
pub use server::{ListenerSet, TcpSimServer};
pub use sinks::{EventSink, MetricsSink, ModeCounters, TracingEventSink};
