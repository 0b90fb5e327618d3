use crate::engine::ListenerOracle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Open ports and the id of the listener currently serving each
///
/// Every [`open`](Self::open) issues a fresh id, so connections accepted by an
/// earlier incarnation of the same port can tell they were replaced.
#[derive(Debug)]
pub struct ListenerSet {
    host_label: String,
    open: Mutex<HashMap<u16, String>>,
    generation: AtomicU64,
}

impl ListenerSet {
    pub fn new(host_label: &str) -> Self {
        Self {
            host_label: host_label.to_string(),
            open: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Marks `port` open under a new listener id and returns it.
    pub fn open(&self, port: u16) -> String {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{port}-{generation}");
        self.open.lock().insert(port, id.clone());
        id
    }

    /// Marks `port` closed, returning the id it was open under.
    pub fn close(&self, port: u16) -> Option<String> {
        self.open.lock().remove(&port)
    }

    pub fn open_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.open.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

impl ListenerOracle for ListenerSet {
    fn is_listener_open(&self, port: u16) -> bool {
        self.open.lock().contains_key(&port)
    }

    fn listener_id(&self, port: u16) -> String {
        self.open.lock().get(&port).cloned().unwrap_or_default()
    }

    fn host_label(&self, _port: u16) -> String {
        self.host_label.clone()
    }
}
