//! Message-bus collaborator boundary
//!
//! The library talks to the Application-Manager daemon, the window manager
//! and other application instances through a bus that delivers typed,
//! addressed messages. This module defines what the library needs from such
//! a bus ([`Transport`] and [`BusConnection`]) and ships [`MemoryBus`], an
//! in-process implementation that also serves as a scripted daemon in tests.

mod memory;
mod message;

use std::fmt;
use std::future::Future;

pub use memory::{MemoryBus, MemoryConnection};
pub use message::{ArgReader, BusMessage, MessageKind, Value};

/// Errors reported by the bus layer
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("connection closed")]
    Disconnected,

    #[error("no service named {0:?} on the bus")]
    NoService(String),

    #[error("remote error {name}: {message}")]
    Remote { name: String, message: String },

    #[error("argument {position}: expected {expected}, found {found}")]
    ArgumentMismatch {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Outcome reported back to the bus after a filter has seen a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerResult {
    /// The message was consumed
    Handled,
    /// The message is left for other filters on the same connection
    Unhandled,
}

/// Selects which broadcast messages a connection receives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    kind: Option<MessageKind>,
    interface: Option<String>,
    member: Option<String>,
}

impl MatchRule {
    /// Match every signal
    pub fn signal() -> Self {
        Self {
            kind: Some(MessageKind::Signal),
            ..Self::default()
        }
    }

    /// Restrict the rule to one interface
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Restrict the rule to one member
    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn interface_name(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Check whether a message satisfies every constraint of this rule
    pub fn matches(&self, message: &BusMessage) -> bool {
        if self.kind.is_some_and(|kind| kind != message.kind()) {
            return false;
        }
        let interface_ok = self
            .interface
            .as_deref()
            .is_none_or(|interface| message.interface() == Some(interface));
        let member_ok = self
            .member
            .as_deref()
            .is_none_or(|member| message.member() == Some(member));
        interface_ok && member_ok
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind {
            let kind = match kind {
                MessageKind::Signal => "signal",
                MessageKind::MethodCall => "method_call",
                MessageKind::MethodReturn => "method_return",
                MessageKind::Error => "error",
            };
            parts.push(format!("type='{kind}'"));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{interface}'"));
        }
        if let Some(member) = &self.member {
            parts.push(format!("member='{member}'"));
        }
        f.write_str(&parts.join(","))
    }
}

/// An open session on the bus
///
/// Signals are fire-and-forget: [`send`](BusConnection::send) returns as soon
/// as the bus has accepted the message. Method calls wait for the reply.
pub trait BusConnection: Send + Sync {
    /// Unique name the bus assigned to this connection
    fn unique_name(&self) -> &str;

    /// Ask the bus to deliver broadcasts matching `rule` to this connection
    fn add_match(&self, rule: MatchRule) -> Result<(), BusError>;

    /// Send a message without waiting for any acknowledgement
    fn send(&self, message: BusMessage) -> Result<(), BusError>;

    /// Send a method call and wait for its reply
    ///
    /// Error replies are returned as [`BusError::Remote`].
    fn call(&self, message: BusMessage) -> impl Future<Output = Result<BusMessage, BusError>> + Send;

    /// Wait for the next inbound message, `None` once the connection is closed
    fn recv(&self) -> impl Future<Output = Option<BusMessage>> + Send;
}

/// Something that can open bus connections
pub trait Transport {
    type Connection: BusConnection;

    /// Open a new connection to the system bus
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BusError>> + Send;
}
