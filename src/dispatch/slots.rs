//! Registered event callbacks
//!
//! Each slot holds at most one handler; registering again replaces it. Slots
//! can be swapped while a dispatch is running: the dispatcher works with the
//! handler it loaded, the next message sees the new one.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Handler without arguments (stop, rotate, focus changes)
pub type NotifyHandler = Box<dyn Fn() + Send + Sync>;

/// Handler receiving forwarded arguments (exec, message)
pub type ArgsHandler = Box<dyn Fn(&[String]) + Send + Sync>;

/// Handler receiving the process id of an exited application
pub type ExitHandler = Box<dyn Fn(u32) + Send + Sync>;

/// A single replaceable callback
pub struct Slot<F> {
    handler: ArcSwapOption<F>,
}

impl<F> Default for Slot<F> {
    fn default() -> Self {
        Self {
            handler: ArcSwapOption::empty(),
        }
    }
}

impl<F> Slot<F> {
    pub fn set(&self, handler: F) {
        self.handler.store(Some(Arc::new(handler)));
    }

    pub fn clear(&self) {
        self.handler.store(None);
    }

    pub fn get(&self) -> Option<Arc<F>> {
        self.handler.load_full()
    }

    pub fn is_set(&self) -> bool {
        self.handler.load().is_some()
    }
}

impl<F> fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_set() { "Slot(set)" } else { "Slot(empty)" })
    }
}

/// An inbound event after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Stop,
    /// Arguments forwarded by a launch of an already running instance
    Exec(Vec<String>),
    Rotate,
    /// Another application exited
    Death { pid: u32 },
    FocusGained,
    FocusLost,
    /// Arguments sent to this instance by another application
    Message(Vec<String>),
}

/// Which slot an event kind is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Stop,
    Exec,
    Rotate,
    Death,
    FocusGained,
    FocusLost,
    Message,
}

/// The fixed set of callback slots of a session
#[derive(Debug, Default)]
pub struct CallbackSlots {
    pub stop: Slot<NotifyHandler>,
    pub exec: Slot<ArgsHandler>,
    pub rotate: Slot<NotifyHandler>,
    pub death: Slot<ExitHandler>,
    pub focus_gained: Slot<NotifyHandler>,
    pub focus_lost: Slot<NotifyHandler>,
    pub message: Slot<ArgsHandler>,
}

impl CallbackSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self, kind: SlotKind) -> bool {
        match kind {
            SlotKind::Stop => self.stop.is_set(),
            SlotKind::Exec => self.exec.is_set(),
            SlotKind::Rotate => self.rotate.is_set(),
            SlotKind::Death => self.death.is_set(),
            SlotKind::FocusGained => self.focus_gained.is_set(),
            SlotKind::FocusLost => self.focus_lost.is_set(),
            SlotKind::Message => self.message.is_set(),
        }
    }

    /// Invoke the handler registered for `event`, if any
    ///
    /// Returns whether a handler ran.
    pub fn deliver(&self, event: &AppEvent) -> bool {
        fn notify(slot: &Slot<NotifyHandler>) -> bool {
            slot.get().map(|handler| handler()).is_some()
        }

        match event {
            AppEvent::Stop => notify(&self.stop),
            AppEvent::Rotate => notify(&self.rotate),
            AppEvent::FocusGained => notify(&self.focus_gained),
            AppEvent::FocusLost => notify(&self.focus_lost),
            AppEvent::Exec(args) => self.exec.get().map(|handler| handler(args.as_slice())).is_some(),
            AppEvent::Message(args) => self.message.get().map(|handler| handler(args.as_slice())).is_some(),
            AppEvent::Death { pid } => self.death.get().map(|handler| handler(*pid)).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_empty_slots_deliver_nothing() {
        let slots = CallbackSlots::new();
        assert!(!slots.deliver(&AppEvent::Stop));
        assert!(!slots.deliver(&AppEvent::Exec(vec!["a".into()])));
        assert!(!slots.is_set(SlotKind::Message));
    }

    #[test]
    fn test_last_registration_wins() {
        let slots = CallbackSlots::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        slots.stop.set(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = Arc::clone(&second);
        slots.stop.set(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(slots.deliver(&AppEvent::Stop));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_args_and_pid_delivery() {
        let slots = CallbackSlots::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        slots.message.set(Box::new(move |args: &[String]| {
            sink.lock().unwrap().push(args.join(","));
        }));
        let sink = Arc::clone(&seen);
        slots.death.set(Box::new(move |pid: u32| {
            sink.lock().unwrap().push(format!("pid {pid}"));
        }));

        slots.deliver(&AppEvent::Message(vec!["ping".into(), "pong".into()]));
        slots.deliver(&AppEvent::Death { pid: 99 });

        assert_eq!(*seen.lock().unwrap(), vec!["ping,pong", "pid 99"]);
    }

    #[test]
    fn test_clear() {
        let slots = CallbackSlots::new();
        slots.rotate.set(Box::new(|| {}));
        assert!(slots.is_set(SlotKind::Rotate));
        slots.rotate.clear();
        assert!(!slots.is_set(SlotKind::Rotate));
    }
}
