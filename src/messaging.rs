//! Messaging channel
//!
//! Messages go to an instance by name (`"app"` or `"app:<id>"`) as a
//! `Message` signal carrying `(count, [target, args...])`. Delivery is
//! fire-and-forget; nothing tells the sender whether the target is alive.

use crate::bus::{BusConnection, BusMessage, Value};
use crate::dispatch::{SIGNAL_MESSAGE, SIGNAL_STOP};
use crate::error::{Error, Result};
use crate::session::Session;

impl<C: BusConnection> Session<C> {
    /// Send `args` to the instance named `target`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// session.send_message("notes:2", &["open", "/tmp/todo.txt"])?;
    /// ```
    pub fn send_message<S: AsRef<str>>(&self, target: &str, args: &[S]) -> Result<()> {
        let count = u32::try_from(args.len())
            .map_err(|_| Error::InvalidArgument(format!("{} arguments", args.len())))?;
        let payload = Value::string_array(
            std::iter::once(target).chain(args.iter().map(AsRef::as_ref)),
        );

        let signal = self.instance_signal(target, SIGNAL_MESSAGE)?.arg(count).arg(payload);
        self.connection.send(signal)?;
        tracing::debug!(instance = %target, args = args.len(), "message sent");
        Ok(())
    }

    /// Ask the instance named `target` to stop
    pub fn stop_instance(&self, target: &str) -> Result<()> {
        let signal = self.instance_signal(target, SIGNAL_STOP)?;
        self.connection.send(signal)?;
        tracing::debug!(instance = %target, "stop sent");
        Ok(())
    }

    fn instance_signal(&self, target: &str, member: &str) -> Result<BusMessage> {
        let address = self.config.address_scheme().derive_for_instance(target)?;
        BusMessage::signal(address.object_path(), address.interface(), member)
            .map_err(|e| Error::SignalConstruction(e.to_string()))
    }
}
