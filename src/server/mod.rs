//! Listeners feeding the engine
//!
//! [`ListenerSet`] tracks which ports are open and under which listener id;
//! [`TcpSimServer`] binds the sockets and runs one accept loop per port.

mod listener_set;
mod tcp_server;

pub use listener_set::ListenerSet;
pub use tcp_server::TcpSimServer;
