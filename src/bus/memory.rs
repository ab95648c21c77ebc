//! In-process bus
//!
//! [`MemoryBus`] routes signals between connections created from the same
//! bus according to their match rules, and answers method calls with
//! service closures registered through [`MemoryBus::serve`]. Every message a
//! connection sends is appended to a journal that can be inspected later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smol::channel::{self, Receiver, Sender};

use crate::bus::{BusConnection, BusError, BusMessage, MatchRule, MessageKind, Transport, Value};

type ServiceHandler = Arc<dyn Fn(&BusMessage) -> Result<Vec<Value>, BusError> + Send + Sync>;

struct Peer {
    inbox: Sender<BusMessage>,
    rules: Vec<MatchRule>,
}

struct BusState {
    available: bool,
    next_peer: u64,
    next_serial: u32,
    peers: HashMap<String, Peer>,
    services: HashMap<String, ServiceHandler>,
    journal: Vec<BusMessage>,
}

impl BusState {
    fn stamp(&mut self, message: &mut BusMessage, sender: &str) {
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        message.set_serial(self.next_serial);
        message.set_sender(sender);
    }

    fn broadcast(&self, message: &BusMessage) {
        for (name, peer) in &self.peers {
            if message.destination().is_some_and(|d| d != name) {
                continue;
            }
            if peer.rules.iter().any(|rule| rule.matches(message)) {
                // A full or closed inbox drops the signal, like a bus would
                // for a peer that stopped reading.
                if peer.inbox.try_send(message.clone()).is_err() {
                    tracing::debug!(peer = %name, %message, "signal dropped");
                }
            }
        }
    }
}

/// A bus living entirely inside the current process
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                available: true,
                next_peer: 1,
                next_serial: 0,
                peers: HashMap::new(),
                services: HashMap::new(),
                journal: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent [`connect`](Transport::connect) calls fail
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Answer method calls addressed to `destination` with `handler`
    ///
    /// The handler receives the call and returns the reply body. Registering
    /// the same destination again replaces the previous handler.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// bus.serve("am.dbus.interface", |_call| Ok(vec![Value::Int32(5), Value::Int32(0)]));
    /// ```
    pub fn serve<F>(&self, destination: impl Into<String>, handler: F)
    where
        F: Fn(&BusMessage) -> Result<Vec<Value>, BusError> + Send + Sync + 'static,
    {
        self.lock().services.insert(destination.into(), Arc::new(handler));
    }

    /// Deliver a signal as if an outside party had sent it
    ///
    /// Emitted signals are not journaled.
    pub fn emit(&self, mut message: BusMessage) {
        let mut state = self.lock();
        state.stamp(&mut message, "org.freedesktop.DBus");
        state.broadcast(&message);
    }

    /// Messages sent by connections of this bus, oldest first
    pub fn journal(&self) -> Vec<BusMessage> {
        self.lock().journal.clone()
    }

    /// Signals in the journal with the given member
    pub fn sent_signals(&self, member: &str) -> Vec<BusMessage> {
        self.lock()
            .journal
            .iter()
            .filter(|m| m.kind() == MessageKind::Signal && m.member() == Some(member))
            .cloned()
            .collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Match rules currently installed by any connection
    pub fn match_rules(&self) -> Vec<MatchRule> {
        self.lock()
            .peers
            .values()
            .flat_map(|peer| peer.rules.iter().cloned())
            .collect()
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.lock().peers.len()
    }
}

impl Transport for MemoryBus {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, BusError> {
        let mut state = self.lock();
        if !state.available {
            return Err(BusError::Unavailable("memory bus is offline".to_string()));
        }

        let name = format!(":1.{}", state.next_peer);
        state.next_peer += 1;

        let (tx, rx) = channel::unbounded();
        state.peers.insert(
            name.clone(),
            Peer {
                inbox: tx,
                rules: Vec::new(),
            },
        );
        tracing::debug!(peer = %name, "memory bus connection opened");

        Ok(MemoryConnection {
            name,
            inbox: rx,
            bus: self.clone(),
        })
    }
}

/// A connection to a [`MemoryBus`]
pub struct MemoryConnection {
    name: String,
    inbox: Receiver<BusMessage>,
    bus: MemoryBus,
}

impl BusConnection for MemoryConnection {
    fn unique_name(&self) -> &str {
        &self.name
    }

    fn add_match(&self, rule: MatchRule) -> Result<(), BusError> {
        let mut state = self.bus.lock();
        let peer = state.peers.get_mut(&self.name).ok_or(BusError::Disconnected)?;
        tracing::debug!(peer = %self.name, %rule, "match rule added");
        peer.rules.push(rule);
        Ok(())
    }

    fn send(&self, mut message: BusMessage) -> Result<(), BusError> {
        let mut state = self.bus.lock();
        if !state.peers.contains_key(&self.name) {
            return Err(BusError::Disconnected);
        }
        state.stamp(&mut message, &self.name);
        state.journal.push(message.clone());
        if message.kind() == MessageKind::Signal {
            state.broadcast(&message);
        }
        Ok(())
    }

    async fn call(&self, mut message: BusMessage) -> Result<BusMessage, BusError> {
        if message.kind() != MessageKind::MethodCall {
            return Err(BusError::InvalidMessage(format!(
                "{:?} is not a method call",
                message.kind()
            )));
        }
        let destination = message
            .destination()
            .ok_or_else(|| BusError::InvalidMessage("method call without destination".to_string()))?
            .to_string();

        let handler = {
            let mut state = self.bus.lock();
            if !state.peers.contains_key(&self.name) {
                return Err(BusError::Disconnected);
            }
            state.stamp(&mut message, &self.name);
            state.journal.push(message.clone());
            state.services.get(&destination).cloned()
        };

        let handler = handler.ok_or(BusError::NoService(destination))?;
        let body = handler(&message)?;
        Ok(BusMessage::method_return(&message).args(body))
    }

    async fn recv(&self) -> Option<BusMessage> {
        self.inbox.recv().await.ok()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.bus.lock().peers.remove(&self.name);
        tracing::debug!(peer = %self.name, "memory bus connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_routed_by_match_rule() {
        let bus = MemoryBus::new();
        let listener = bus.connect().await.unwrap();
        let talker = bus.connect().await.unwrap();

        listener
            .add_match(MatchRule::signal().interface("org.clp.appmanager.notes"))
            .unwrap();

        let wanted = BusMessage::signal("/org/clp/appmanager/notes", "org.clp.appmanager.notes", "stop").unwrap();
        let ignored = BusMessage::signal("/org/clp/appmanager/mail", "org.clp.appmanager.mail", "stop").unwrap();
        talker.send(ignored).unwrap();
        talker.send(wanted).unwrap();

        let received = listener.recv().await.unwrap();
        assert_eq!(received.interface(), Some("org.clp.appmanager.notes"));
        assert_eq!(received.sender(), Some(talker.unique_name()));
        assert_eq!(bus.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_method_call_served() {
        let bus = MemoryBus::new();
        bus.serve("am.dbus.interface", |call| {
            let id = call.reader().read_i32()?;
            Ok(vec![Value::Int32(id * 10), Value::Int32(0)])
        });

        let conn = bus.connect().await.unwrap();
        let call = BusMessage::method_call("am.dbus.interface", "/app_manager", "am.dbus.interface", "app_launch_call")
            .unwrap()
            .arg(4i32);
        let reply = conn.call(call).await.unwrap();

        let mut reader = reply.reader();
        assert_eq!(reader.read_i32().unwrap(), 40);
        assert_eq!(reader.read_i32().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_call_without_service() {
        let bus = MemoryBus::new();
        let conn = bus.connect().await.unwrap();
        let call = BusMessage::method_call("nobody.home", "/nobody", "nobody.home", "Ping").unwrap();
        assert!(matches!(conn.call(call).await, Err(BusError::NoService(_))));
    }

    #[tokio::test]
    async fn test_unavailable_bus() {
        let bus = MemoryBus::new();
        bus.set_available(false);
        assert!(matches!(bus.connect().await, Err(BusError::Unavailable(_))));
        assert_eq!(bus.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_connection() {
        let bus = MemoryBus::new();
        let conn = bus.connect().await.unwrap();
        conn.add_match(MatchRule::signal()).unwrap();
        assert_eq!(bus.connection_count(), 1);
        assert_eq!(bus.match_rules().len(), 1);

        drop(conn);
        assert_eq!(bus.connection_count(), 0);
        assert!(bus.match_rules().is_empty());
    }

    #[tokio::test]
    async fn test_emit_is_not_journaled() {
        let bus = MemoryBus::new();
        let conn = bus.connect().await.unwrap();
        conn.add_match(MatchRule::signal().interface("org.clp.appmanager")).unwrap();

        bus.emit(BusMessage::signal("/org/clp/appmanager", "org.clp.appmanager", "stop").unwrap());
        assert!(conn.recv().await.unwrap().is_signal("org.clp.appmanager", "stop"));
        assert!(bus.journal().is_empty());
    }
}
