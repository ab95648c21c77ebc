//! Inbound signal dispatch
//!
//! Every inbound message is classified by `(interface, member)` against a
//! fixed, ordered rule table; the first exclusive match wins. Messages that
//! match nothing are reported as [`HandlerResult::Unhandled`] so other
//! filters on the same connection still see them.
//!
//! | interface         | member                  | event                        |
//! |-------------------|-------------------------|------------------------------|
//! | own               | `stop`                  | stop (not exclusive)         |
//! | app manager       | `stop`                  | stop                         |
//! | window manager    | `UserInteractionGained` | focus gained, own pid only   |
//! | window manager    | `UserInteractionLost`   | focus lost, own pid only     |
//! | app manager       | `rotate`                | ignored                      |
//! | own               | `exec`                  | exec with forwarded args     |
//! | app manager       | `AppExit`               | death with the exited pid    |
//! | own               | `Message`               | message with forwarded args  |
//!
//! A stop on the own interface runs the stop handler and is still reported
//! as unhandled, because its rule does not end the table walk.

mod slots;

use std::sync::Arc;

use crate::bus::{BusError, BusMessage, HandlerResult, MessageKind};

pub use slots::{AppEvent, ArgsHandler, CallbackSlots, ExitHandler, NotifyHandler, Slot, SlotKind};

pub const SIGNAL_STOP: &str = "stop";
pub const SIGNAL_EXEC: &str = "exec";
pub const SIGNAL_ROTATE: &str = "rotate";
pub const SIGNAL_APP_EXIT: &str = "AppExit";
pub const SIGNAL_MESSAGE: &str = "Message";
pub const SIGNAL_FOCUS_GAINED: &str = "UserInteractionGained";
pub const SIGNAL_FOCUS_LOST: &str = "UserInteractionLost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Own,
    AppManager,
    WindowManager,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    scope: Scope,
    member: &'static str,
    slot: SlotKind,
    exclusive: bool,
}

const fn rule(scope: Scope, member: &'static str, slot: SlotKind) -> Rule {
    Rule {
        scope,
        member,
        slot,
        exclusive: true,
    }
}

const RULES: &[Rule] = &[
    Rule {
        exclusive: false,
        ..rule(Scope::Own, SIGNAL_STOP, SlotKind::Stop)
    },
    rule(Scope::AppManager, SIGNAL_STOP, SlotKind::Stop),
    rule(Scope::WindowManager, SIGNAL_FOCUS_GAINED, SlotKind::FocusGained),
    rule(Scope::WindowManager, SIGNAL_FOCUS_LOST, SlotKind::FocusLost),
    rule(Scope::AppManager, SIGNAL_ROTATE, SlotKind::Rotate),
    rule(Scope::Own, SIGNAL_EXEC, SlotKind::Exec),
    rule(Scope::AppManager, SIGNAL_APP_EXIT, SlotKind::Death),
    rule(Scope::Own, SIGNAL_MESSAGE, SlotKind::Message),
];

/// Routes inbound signals of one session to its callback slots
#[derive(Debug, Clone)]
pub struct Dispatcher {
    own_interface: String,
    app_manager_interface: String,
    window_manager_interface: String,
    process_id: u32,
    slots: Arc<CallbackSlots>,
}

impl Dispatcher {
    pub fn new(
        own_interface: impl Into<String>,
        app_manager_interface: impl Into<String>,
        window_manager_interface: impl Into<String>,
        process_id: u32,
        slots: Arc<CallbackSlots>,
    ) -> Self {
        Self {
            own_interface: own_interface.into(),
            app_manager_interface: app_manager_interface.into(),
            window_manager_interface: window_manager_interface.into(),
            process_id,
            slots,
        }
    }

    pub fn slots(&self) -> &Arc<CallbackSlots> {
        &self.slots
    }

    fn interface_for(&self, scope: Scope) -> &str {
        match scope {
            Scope::Own => &self.own_interface,
            Scope::AppManager => &self.app_manager_interface,
            Scope::WindowManager => &self.window_manager_interface,
        }
    }

    /// Handle one inbound message
    pub fn dispatch(&self, message: &BusMessage) -> HandlerResult {
        if message.kind() != MessageKind::Signal {
            return HandlerResult::Unhandled;
        }

        tracing::debug!(
            interface = message.interface().unwrap_or("-"),
            member = message.member().unwrap_or("-"),
            sender = message.sender().unwrap_or("-"),
            "signal received"
        );

        for rule in RULES {
            if !message.is_signal(self.interface_for(rule.scope), rule.member) {
                continue;
            }

            if let Err(e) = self.apply(rule.slot, message) {
                tracing::warn!(
                    member = rule.member,
                    error = %e,
                    "malformed signal payload"
                );
                return HandlerResult::Unhandled;
            }

            if rule.exclusive {
                return HandlerResult::Handled;
            }
        }

        HandlerResult::Unhandled
    }

    fn apply(&self, slot: SlotKind, message: &BusMessage) -> Result<(), BusError> {
        // Rotation is reserved; the signal is consumed without effect
        if slot == SlotKind::Rotate {
            return Ok(());
        }
        // Payloads are only decoded for slots that have a handler
        if !self.slots.is_set(slot) {
            return Ok(());
        }
        if let Some(event) = self.decode(slot, message)? {
            self.slots.deliver(&event);
        }
        Ok(())
    }

    /// Decode the payload of a matched signal into an event
    ///
    /// Focus changes of other processes decode to `None`.
    pub fn decode(&self, slot: SlotKind, message: &BusMessage) -> Result<Option<AppEvent>, BusError> {
        let event = match slot {
            SlotKind::Stop => AppEvent::Stop,
            SlotKind::Rotate => AppEvent::Rotate,
            SlotKind::FocusGained | SlotKind::FocusLost => {
                let pid = message.reader().read_i32()?;
                if u32::try_from(pid).ok() != Some(self.process_id) {
                    return Ok(None);
                }
                if slot == SlotKind::FocusGained {
                    AppEvent::FocusGained
                } else {
                    AppEvent::FocusLost
                }
            }
            SlotKind::Death => AppEvent::Death {
                pid: message.reader().read_u32()?,
            },
            SlotKind::Exec => AppEvent::Exec(decode_forwarded_args(message)?),
            SlotKind::Message => AppEvent::Message(decode_forwarded_args(message)?),
        };
        Ok(Some(event))
    }
}

/// Decode a `(count, [destination, args...])` payload into `args`
///
/// The leading destination name is dropped. A count larger than the array
/// is malformed.
pub fn decode_forwarded_args(message: &BusMessage) -> Result<Vec<String>, BusError> {
    let mut reader = message.reader();
    let count = reader.read_u32()?;
    let items = reader.read_str_array()?;

    let Some((_destination, args)) = items.split_first() else {
        return Err(BusError::InvalidMessage(
            "forwarded arguments lack the destination name".to_string(),
        ));
    };
    if count as usize > items.len() {
        return Err(BusError::InvalidMessage(format!(
            "argument count {count} exceeds {} strings",
            items.len()
        )));
    }

    Ok(args.iter().map(|arg| arg.to_string()).collect())
}
