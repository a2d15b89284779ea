//! Nullable socket pool — records dials and sends without touching the
//! network.

use std::collections::HashSet;
use std::sync::Mutex;

use obol_daemon::{DisconnectReason, EventSender, Pool, PoolError};
use obol_messages::Message;

#[derive(Default)]
struct PoolState {
    /// Live connections, by address.
    conns: HashSet<String>,
    /// Addresses we dialed (successfully) that are still live.
    dialed: HashSet<String>,
    /// Every dial ever attempted, in order.
    dial_attempts: Vec<String>,
    /// Addresses whose dials should fail.
    fail_dials: HashSet<String>,
    /// Addresses whose sends should fail.
    fail_sends: HashSet<String>,
    default_connections: HashSet<String>,
    sent: Vec<(String, Message)>,
    broadcasts: Vec<Message>,
    disconnects: Vec<(String, DisconnectReason)>,
    clear_stale_calls: usize,
    send_pings_calls: usize,
    shut_down: bool,
}

/// A test pool that records everything and optionally reports connects and
/// disconnects back through an [`EventSender`].
#[derive(Default)]
pub struct NullPool {
    state: Mutex<PoolState>,
    events: Mutex<Option<EventSender>>,
}

impl NullPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the daemon's event sender in so that dials and disconnects
    /// produce the corresponding events, like a real pool would.
    pub fn set_events(&self, events: EventSender) {
        *self.events.lock().unwrap() = Some(events);
    }

    /// Simulate an accepted inbound connection (no event is emitted; push
    /// one through the [`EventSender`] to drive the daemon).
    pub fn add_connection(&self, addr: &str) {
        self.state.lock().unwrap().conns.insert(addr.to_string());
    }

    /// Make future dials to `addr` fail.
    pub fn fail_dial(&self, addr: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_dials
            .insert(addr.to_string());
    }

    /// Make future sends to `addr` fail.
    pub fn fail_send(&self, addr: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_sends
            .insert(addr.to_string());
    }

    pub fn set_default_connection(&self, addr: &str) {
        self.state
            .lock()
            .unwrap()
            .default_connections
            .insert(addr.to_string());
    }

    // -- Assertion helpers -----------------------------------------------------

    pub fn sent(&self) -> Vec<(String, Message)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn broadcasts(&self) -> Vec<Message> {
        self.state.lock().unwrap().broadcasts.clone()
    }

    pub fn disconnects(&self) -> Vec<(String, DisconnectReason)> {
        self.state.lock().unwrap().disconnects.clone()
    }

    pub fn dialed(&self) -> Vec<String> {
        let mut v: Vec<String> = self.state.lock().unwrap().dialed.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn dial_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().dial_attempts.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().unwrap().shut_down
    }
}

impl Pool for NullPool {
    fn connect(&self, addr: &str) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock().unwrap();
            state.dial_attempts.push(addr.to_string());
            if state.fail_dials.contains(addr) {
                return Err(PoolError::DialFailed {
                    addr: addr.to_string(),
                    cause: "connection refused".to_string(),
                });
            }
            state.conns.insert(addr.to_string());
            state.dialed.insert(addr.to_string());
        }
        // Real pools call back on dial completion; mirror that. This runs
        // on the daemon's dial worker, so the blocking send is legal.
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            events.connected_blocking(addr, true);
        }
        Ok(())
    }

    fn disconnect(&self, addr: &str, reason: DisconnectReason) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock().unwrap();
            state.conns.remove(addr);
            state.dialed.remove(addr);
            state.disconnects.push((addr.to_string(), reason));
        }
        let events = self.events.lock().unwrap().clone();
        if let Some(events) = events {
            events.disconnected(addr, reason);
        }
        Ok(())
    }

    fn send_message(&self, addr: &str, msg: Message) -> Result<(), PoolError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends.contains(addr) {
            return Err(PoolError::SendFailed {
                addr: addr.to_string(),
                cause: "broken pipe".to_string(),
            });
        }
        if !state.conns.contains(addr) {
            return Err(PoolError::NoSuchConnection(addr.to_string()));
        }
        state.sent.push((addr.to_string(), msg));
        Ok(())
    }

    fn broadcast_message(&self, msg: Message) -> Result<(), PoolError> {
        self.state.lock().unwrap().broadcasts.push(msg);
        Ok(())
    }

    fn size(&self) -> Result<usize, PoolError> {
        Ok(self.state.lock().unwrap().conns.len())
    }

    fn outgoing_connections_num(&self) -> Result<usize, PoolError> {
        let state = self.state.lock().unwrap();
        Ok(state.conns.intersection(&state.dialed).count())
    }

    fn is_conn_exist(&self, addr: &str) -> Result<bool, PoolError> {
        Ok(self.state.lock().unwrap().conns.contains(addr))
    }

    fn is_default_connection(&self, addr: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .default_connections
            .contains(addr)
    }

    fn is_max_default_connections_reached(&self) -> Result<bool, PoolError> {
        Ok(false)
    }

    fn clear_stale_connections(&self) -> Result<(), PoolError> {
        self.state.lock().unwrap().clear_stale_calls += 1;
        Ok(())
    }

    fn send_pings(&self) -> Result<(), PoolError> {
        self.state.lock().unwrap().send_pings_calls += 1;
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        state.conns.clear();
        state.dialed.clear();
    }
}
