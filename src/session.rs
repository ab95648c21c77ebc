//! Registration and the per-process session
//!
//! A [`Session`] is the result of registering with the application manager.
//! It owns the bus connection, the resolved identity of this instance and
//! the callback slots inbound signals are dispatched to. Launching, messaging
//! and lifecycle operations are methods on the session, so none of them can
//! run before registration has completed.

use std::sync::Arc;

use crate::bus::{BusConnection, BusMessage, HandlerResult, MatchRule, Transport};
use crate::config::ClientConfig;
use crate::daemon::{AppManagerProxy, WindowManagerProxy};
use crate::dispatch::{CallbackSlots, Dispatcher};
use crate::error::{Error, Result};
use crate::identity::{DerivedAddress, InstanceType, canonical_name, validate_name};
use crate::registry::{MemoryRegistry, Registry, RegistryError, RegistryValue};

/// Instance id used when the registry has none recorded
pub const FIRST_INSTANCE_ID: i32 = 1;

/// Handler run once right after an asynchronous registration
pub type PostInitHandler<C> = Box<dyn FnOnce(&Session<C>) + Send>;

/// Identity of this process as resolved during registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationContext {
    process_id: u32,
    application_name: String,
    application_id: i32,
    instance_id: i32,
    instance_type: InstanceType,
    priority: u32,
    address: DerivedAddress,
}

impl RegistrationContext {
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Canonical application name, without any exec-name qualifier
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// `app` for single-instance applications, `app:<id>` otherwise
    pub fn instance_name(&self) -> &str {
        self.address.instance_name()
    }

    pub fn application_id(&self) -> i32 {
        self.application_id
    }

    pub fn instance_id(&self) -> i32 {
        self.instance_id
    }

    pub fn instance_type(&self) -> InstanceType {
        self.instance_type
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn interface(&self) -> &str {
        self.address.interface()
    }

    pub fn object_path(&self) -> &str {
        self.address.object_path()
    }

    pub fn address(&self) -> &DerivedAddress {
        &self.address
    }
}

/// Builder for registering a session
pub struct SessionBuilder {
    name: String,
    priority: u32,
    instance_type: InstanceType,
    config: ClientConfig,
    registry: Option<Arc<dyn Registry>>,
    process_id: u32,
}

impl SessionBuilder {
    /// Start registering the application `name`
    ///
    /// `name` may carry an exec-name qualifier (`"browser.bin"`); everything
    /// from the first `.` on is ignored for addressing.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let session = SessionBuilder::new("calendar")
    ///     .priority(10)
    ///     .registry(registry)
    ///     .register(&bus)
    ///     .await?;
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            instance_type: InstanceType::default(),
            config: ClientConfig::default(),
            registry: None,
            process_id: std::process::id(),
        }
    }

    /// Scheduling priority; lower is more important
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Instance type used when the registry does not record one
    pub fn instance_type(mut self, instance_type: InstanceType) -> Self {
        self.instance_type = instance_type;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry holding application metadata
    ///
    /// Defaults to an empty in-memory registry.
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the process id recorded for this session
    pub fn process_id(mut self, process_id: u32) -> Self {
        self.process_id = process_id;
        self
    }

    /// Register with the application manager
    ///
    /// Either every step succeeds and a live session is returned, or an
    /// error is returned and no filter remains installed on the bus.
    pub async fn register<T: Transport>(self, transport: &T) -> Result<Session<T::Connection>> {
        validate_name(&self.name)?;
        let application_name = canonical_name(&self.name)?.to_string();

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        let layout = self.config.registry_layout();

        let app_id_key = layout.app_id_key(&application_name);
        let application_id = best_effort(registry.get_int(&app_id_key), &app_id_key).unwrap_or(0);

        let multi_key = layout.multi_instance_key(application_id);
        let instance_type = best_effort(registry.get_bool(&multi_key), &multi_key)
            .map_or(self.instance_type, InstanceType::from);

        let last_key = layout.last_instance_key(&application_name);
        let claimed_key = layout.claimed_instance_key(&application_name);
        let (instance_id, allocated) = next_instance_id(
            best_effort(registry.get_int(&last_key), &last_key),
            best_effort(registry.get_int(&claimed_key), &claimed_key),
        );

        let address = self.config.address_scheme().derive(
            &application_name,
            instance_type.is_multiple(),
            instance_id,
        )?;

        let connection = transport.connect().await.map_err(|e| {
            tracing::warn!(application = %application_name, error = %e, "failed to connect to bus");
            Error::TransportUnavailable(e.to_string())
        })?;

        if allocated {
            persist(registry.as_ref(), &last_key, instance_id.into());
        }
        persist(registry.as_ref(), &claimed_key, instance_id.into());
        persist_u32(registry.as_ref(), &layout.pid_key(&application_name), self.process_id);
        persist_u32(registry.as_ref(), &layout.priority_key(&application_name), self.priority);

        // Dropping the connection on failure withdraws any rule added so far
        for interface in [
            address.interface(),
            self.config.app_manager().interface(),
            self.config.window_manager().interface(),
        ] {
            connection
                .add_match(MatchRule::signal().interface(interface))
                .map_err(|e| Error::Registration(format!("failed to add match rule for {interface}: {e}")))?;
        }

        let context = RegistrationContext {
            process_id: self.process_id,
            application_name,
            application_id,
            instance_id,
            instance_type,
            priority: self.priority,
            address,
        };

        let dispatcher = Dispatcher::new(
            context.interface(),
            self.config.app_manager().interface(),
            self.config.window_manager().interface(),
            context.process_id,
            Arc::new(CallbackSlots::new()),
        );

        tracing::info!(
            instance = %context.instance_name(),
            interface = %context.interface(),
            object_path = %context.object_path(),
            application_id = context.application_id,
            pid = context.process_id,
            "registered with application manager"
        );

        Ok(Session {
            context: Arc::new(context),
            connection,
            registry,
            config: self.config,
            dispatcher,
        })
    }

    /// Register, then hand the session to `post_init`
    ///
    /// Without a handler the registration still takes place, including its
    /// registry writes, but the session is closed again and
    /// [`Error::NoPostInitHandler`] is returned.
    pub async fn register_async<T: Transport>(
        self,
        transport: &T,
        post_init: Option<PostInitHandler<T::Connection>>,
    ) -> Result<Session<T::Connection>> {
        let session = self.register(transport).await?;
        match post_init {
            Some(handler) => {
                handler(&session);
                Ok(session)
            }
            None => {
                tracing::warn!(
                    instance = %session.instance_name(),
                    "registered without a post-init handler"
                );
                Err(Error::NoPostInitHandler)
            }
        }
    }
}

/// Pick the instance id of a new registration
///
/// An id in `LastInstId` that no session has claimed yet was handed out by
/// the daemon and is taken as is. Otherwise a fresh id one past the highest
/// known id is allocated; the flag tells whether that happened.
fn next_instance_id(last: Option<i32>, claimed: Option<i32>) -> (i32, bool) {
    match last {
        Some(id) if claimed != Some(id) => (id, false),
        _ => {
            let id = last
                .max(claimed)
                .map_or(FIRST_INSTANCE_ID, |id| id.saturating_add(1));
            (id, true)
        }
    }
}

/// Log and swallow a failed registry read
fn best_effort<T>(result: std::result::Result<Option<T>, RegistryError>, key: &str) -> Option<T> {
    result.unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "registry read failed, using default");
        None
    })
}

/// Log and swallow a failed registry write
pub(crate) fn persist(registry: &dyn Registry, key: &str, value: RegistryValue) {
    if let Err(e) = registry.set(key, value) {
        tracing::warn!(key, error = %e, "registry write failed");
    }
}

/// Persist an unsigned value, skipping it when the registry cannot hold it
fn persist_u32(registry: &dyn Registry, key: &str, value: u32) {
    match i32::try_from(value) {
        Ok(value) => persist(registry, key, value.into()),
        Err(_) => tracing::warn!(key, value, "value out of registry range, not written"),
    }
}

/// A registered application instance
pub struct Session<C: BusConnection> {
    pub(crate) context: Arc<RegistrationContext>,
    pub(crate) connection: C,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) config: ClientConfig,
    pub(crate) dispatcher: Dispatcher,
}

impl<C: BusConnection> Session<C> {
    pub fn context(&self) -> &Arc<RegistrationContext> {
        &self.context
    }

    pub fn application_name(&self) -> &str {
        self.context.application_name()
    }

    pub fn instance_name(&self) -> &str {
        self.context.instance_name()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn slots(&self) -> &Arc<CallbackSlots> {
        self.dispatcher.slots()
    }

    /// Application id recorded in the registry for `application`, 0 if unknown
    pub(crate) fn lookup_application_id(&self, application: &str) -> i32 {
        let key = self.config.registry_layout().app_id_key(application);
        best_effort(self.registry.get_int(&key), &key).unwrap_or(0)
    }

    /// Client of the application-manager daemon over this session's connection
    pub fn daemon(&self) -> AppManagerProxy<'_, C> {
        AppManagerProxy::new(&self.connection, self.config.daemon())
    }

    pub fn window_manager(&self) -> WindowManagerProxy<'_, C> {
        WindowManagerProxy::new(&self.connection, self.config.window_manager())
    }

    /// Called when the application manager asks this instance to stop
    pub fn on_stop<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.slots().stop.set(Box::new(handler));
    }

    /// Called with the forwarded arguments when a launch finds this
    /// instance already running
    pub fn on_exec<F: Fn(&[String]) + Send + Sync + 'static>(&self, handler: F) {
        self.slots().exec.set(Box::new(handler));
    }

    /// Reserved; rotation signals are currently consumed without effect
    pub fn on_rotate<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.slots().rotate.set(Box::new(handler));
    }

    /// Called with the process id of any application that exits
    pub fn on_death<F: Fn(u32) + Send + Sync + 'static>(&self, handler: F) {
        self.slots().death.set(Box::new(handler));
    }

    pub fn on_focus_gained<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.slots().focus_gained.set(Box::new(handler));
    }

    pub fn on_focus_lost<F: Fn() + Send + Sync + 'static>(&self, handler: F) {
        self.slots().focus_lost.set(Box::new(handler));
    }

    /// Called with the arguments of messages sent to this instance
    pub fn on_message<F: Fn(&[String]) + Send + Sync + 'static>(&self, handler: F) {
        self.slots().message.set(Box::new(handler));
    }

    /// Dispatch one inbound message to the callback slots
    pub fn dispatch(&self, message: &BusMessage) -> HandlerResult {
        self.dispatcher.dispatch(message)
    }

    /// Wait for the next inbound message and dispatch it
    ///
    /// Returns `None` once the connection is closed.
    pub async fn process_next(&self) -> Option<HandlerResult> {
        let message = self.connection.recv().await?;
        Some(self.dispatch(&message))
    }

    /// Dispatch inbound messages until the connection closes
    ///
    /// Handlers run on this task, one message at a time; a handler that
    /// blocks delays every later signal.
    pub async fn run(&self) {
        while let Some(result) = self.process_next().await {
            if result == HandlerResult::Unhandled {
                tracing::trace!(instance = %self.instance_name(), "message left unhandled");
            }
        }
        tracing::debug!(instance = %self.instance_name(), "connection closed, leaving run loop");
    }
}

impl<C: BusConnection> Drop for Session<C> {
    fn drop(&mut self) {
        tracing::debug!(instance = %self.context.instance_name(), "session closed");
    }
}
