//! Typed bus messages
//!
//! A message is addressed by object path, interface and member, and carries
//! an ordered body of typed values:
//!
//! ```text
//! Signal:       path, interface, member, [body]
//! MethodCall:   destination, path, interface, member, [body]
//! MethodReturn: reply_serial, [body]
//! Error:        reply_serial, error_name, [message]
//! ```

use std::fmt;

use crate::bus::BusError;

/// A single typed argument in a message body
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Str(String),
    Array(Vec<Value>),
    Struct(Vec<Value>),
}

impl Value {
    /// Signature-style type name, used in mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "b",
            Value::Int32(_) => "i",
            Value::UInt32(_) => "u",
            Value::Str(_) => "s",
            Value::Array(_) => "a",
            Value::Struct(_) => "r",
        }
    }

    /// Build a string array from any sequence of strings
    pub fn string_array(items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Value::Array(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Kind of bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Signal,
    MethodCall,
    MethodReturn,
    Error,
}

/// A message travelling over the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    kind: MessageKind,
    serial: u32,
    reply_serial: Option<u32>,
    sender: Option<String>,
    destination: Option<String>,
    path: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    body: Vec<Value>,
}

impl BusMessage {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: 0,
            reply_serial: None,
            sender: None,
            destination: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            body: Vec::new(),
        }
    }

    /// Create a signal
    ///
    /// Fails when the path is not absolute or the interface or member is empty.
    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Result<Self, BusError> {
        let mut msg = Self::empty(MessageKind::Signal);
        msg.path = Some(checked_path(path.into())?);
        msg.interface = Some(checked_name("interface", interface.into())?);
        msg.member = Some(checked_name("member", member.into())?);
        Ok(msg)
    }

    /// Create a method call addressed to a named service
    pub fn method_call(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Result<Self, BusError> {
        let mut msg = Self::empty(MessageKind::MethodCall);
        msg.destination = Some(checked_name("destination", destination.into())?);
        msg.path = Some(checked_path(path.into())?);
        msg.interface = Some(checked_name("interface", interface.into())?);
        msg.member = Some(checked_name("member", member.into())?);
        Ok(msg)
    }

    /// Create a successful reply to `call`
    pub fn method_return(call: &BusMessage) -> Self {
        let mut msg = Self::empty(MessageKind::MethodReturn);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg
    }

    /// Create an error reply to `call`
    pub fn error(call: &BusMessage, name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut msg = Self::empty(MessageKind::Error);
        msg.reply_serial = Some(call.serial);
        msg.destination = call.sender.clone();
        msg.error_name = Some(name.into());
        msg.body.push(Value::Str(message.into()));
        msg
    }

    /// Append an argument to the body
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.body.push(value.into());
        self
    }

    /// Append several arguments to the body
    pub fn args(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.body.extend(values);
        self
    }

    /// Restrict delivery to a single peer
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub(crate) fn set_sender(&mut self, sender: &str) {
        self.sender = Some(sender.to_string());
    }

    pub(crate) fn set_serial(&mut self, serial: u32) {
        self.serial = serial;
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// Whether this is a signal with the given interface and member
    pub fn is_signal(&self, interface: &str, member: &str) -> bool {
        self.kind == MessageKind::Signal
            && self.interface.as_deref() == Some(interface)
            && self.member.as_deref() == Some(member)
    }

    /// Sequential typed reader over the body
    pub fn reader(&self) -> ArgReader<'_> {
        ArgReader {
            values: &self.body,
            position: 0,
        }
    }

    /// Turn an error reply into a [`BusError::Remote`]
    pub fn into_result(self) -> Result<Self, BusError> {
        if self.kind != MessageKind::Error {
            return Ok(self);
        }
        let message = match self.body.first() {
            Some(Value::Str(s)) => s.clone(),
            _ => String::new(),
        };
        Err(BusError::Remote {
            name: self.error_name.unwrap_or_default(),
            message,
        })
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}.{} path={} sender={}",
            self.kind,
            self.interface.as_deref().unwrap_or("-"),
            self.member.as_deref().unwrap_or("-"),
            self.path.as_deref().unwrap_or("-"),
            self.sender.as_deref().unwrap_or("-"),
        )
    }
}

fn checked_path(path: String) -> Result<String, BusError> {
    if !path.starts_with('/') || path.contains("//") {
        return Err(BusError::InvalidMessage(format!("invalid object path {path:?}")));
    }
    Ok(path)
}

fn checked_name(what: &str, name: String) -> Result<String, BusError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidMessage(format!("invalid {what} {name:?}")));
    }
    Ok(name)
}

/// Reads body arguments in order, checking each type
pub struct ArgReader<'a> {
    values: &'a [Value],
    position: usize,
}

impl<'a> ArgReader<'a> {
    /// Reader over a bare sequence of values, such as array elements
    pub fn new(values: &'a [Value]) -> Self {
        Self { values, position: 0 }
    }

    fn next_value(&mut self, expected: &'static str) -> Result<&'a Value, BusError> {
        let value = self
            .values
            .get(self.position)
            .ok_or(BusError::ArgumentMismatch {
                position: self.position,
                expected,
                found: "nothing",
            })?;
        self.position += 1;
        Ok(value)
    }

    fn mismatch(&self, expected: &'static str, found: &Value) -> BusError {
        BusError::ArgumentMismatch {
            position: self.position - 1,
            expected,
            found: found.type_name(),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, BusError> {
        match self.next_value("b")? {
            Value::Bool(v) => Ok(*v),
            other => Err(self.mismatch("b", other)),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, BusError> {
        match self.next_value("i")? {
            Value::Int32(v) => Ok(*v),
            other => Err(self.mismatch("i", other)),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, BusError> {
        match self.next_value("u")? {
            Value::UInt32(v) => Ok(*v),
            other => Err(self.mismatch("u", other)),
        }
    }

    pub fn read_str(&mut self) -> Result<&'a str, BusError> {
        match self.next_value("s")? {
            Value::Str(v) => Ok(v),
            other => Err(self.mismatch("s", other)),
        }
    }

    pub fn read_array(&mut self) -> Result<&'a [Value], BusError> {
        match self.next_value("a")? {
            Value::Array(v) => Ok(v),
            other => Err(self.mismatch("a", other)),
        }
    }

    pub fn read_struct(&mut self) -> Result<ArgReader<'a>, BusError> {
        match self.next_value("r")? {
            Value::Struct(fields) => Ok(ArgReader {
                values: fields,
                position: 0,
            }),
            other => Err(self.mismatch("r", other)),
        }
    }

    /// Read an array whose elements must all be strings
    pub fn read_str_array(&mut self) -> Result<Vec<&'a str>, BusError> {
        let position = self.position;
        let items = self.read_array()?;
        items
            .iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.as_str()),
                other => Err(BusError::ArgumentMismatch {
                    position,
                    expected: "as",
                    found: other.type_name(),
                }),
            })
            .collect()
    }

    /// Read an array whose elements must all be `i32`
    pub fn read_i32_array(&mut self) -> Result<Vec<i32>, BusError> {
        let position = self.position;
        let items = self.read_array()?;
        items
            .iter()
            .map(|item| match item {
                Value::Int32(v) => Ok(*v),
                other => Err(BusError::ArgumentMismatch {
                    position,
                    expected: "ai",
                    found: other.type_name(),
                }),
            })
            .collect()
    }

    /// Number of arguments not yet read
    pub fn remaining(&self) -> usize {
        self.values.len().saturating_sub(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_construction() {
        let msg = BusMessage::signal("/org/clp/appmanager/calendar", "org.clp.appmanager.calendar", "exec")
            .unwrap()
            .arg(2u32)
            .arg(Value::string_array(["calendar", "2024-01-01"]));

        assert_eq!(msg.kind(), MessageKind::Signal);
        assert!(msg.is_signal("org.clp.appmanager.calendar", "exec"));
        assert!(!msg.is_signal("org.clp.appmanager.calendar", "stop"));

        let mut reader = msg.reader();
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_str_array().unwrap(), vec!["calendar", "2024-01-01"]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        assert!(matches!(
            BusMessage::signal("relative/path", "a.b", "stop"),
            Err(BusError::InvalidMessage(_))
        ));
        assert!(matches!(
            BusMessage::signal("/ok", "", "stop"),
            Err(BusError::InvalidMessage(_))
        ));
        assert!(matches!(
            BusMessage::method_call("svc", "/ok", "a.b", "has space"),
            Err(BusError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_reader_type_mismatch() {
        let msg = BusMessage::signal("/p", "a.b", "m")
            .unwrap()
            .arg("not a number");

        let err = msg.reader().read_u32().unwrap_err();
        assert!(matches!(
            err,
            BusError::ArgumentMismatch {
                position: 0,
                expected: "u",
                found: "s"
            }
        ));
    }

    #[test]
    fn test_reader_missing_argument() {
        let msg = BusMessage::signal("/p", "a.b", "m").unwrap();
        assert!(matches!(
            msg.reader().read_i32(),
            Err(BusError::ArgumentMismatch { found: "nothing", .. })
        ));
    }

    #[test]
    fn test_str_array_rejects_mixed_elements() {
        let msg = BusMessage::signal("/p", "a.b", "m")
            .unwrap()
            .arg(Value::Array(vec![Value::Str("a".into()), Value::Int32(1)]));
        assert!(msg.reader().read_str_array().is_err());
    }

    #[test]
    fn test_error_reply_into_result() {
        let mut call = BusMessage::method_call("svc", "/svc", "svc.iface", "Do").unwrap();
        call.set_sender(":1.4");
        call.set_serial(9);

        let reply = BusMessage::error(&call, "svc.Error.Failed", "nope");
        assert_eq!(reply.reply_serial(), Some(9));
        assert_eq!(reply.destination(), Some(":1.4"));

        match reply.into_result() {
            Err(BusError::Remote { name, message }) => {
                assert_eq!(name, "svc.Error.Failed");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected {other:?}"),
        }

        let ok = BusMessage::method_return(&call).arg(1i32);
        assert!(ok.into_result().is_ok());
    }
}
