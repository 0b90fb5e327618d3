//! Listener behaviour configuration
//!
//! `TcpConfig` describes how one listening port treats the connections it
//! accepts; `SimulatorConfig` is the file format the binary starts from.

pub mod mode;
pub mod simulator;
pub mod tcp_config;

pub use mode::Mode;
pub use simulator::SimulatorConfig;
pub use tcp_config::{StreamRequest, TcpConfig, TimingField, Timings};
