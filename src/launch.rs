//! Launch coordinator
//!
//! A launch asks the application-manager daemon to start the target. When
//! the daemon reports the target as already running, the arguments are
//! forwarded to the live instance as an `exec` signal instead:
//!
//! ```text
//! launch("calendar", ["2024-01-01"])
//!   -> app_launch_call(12, "2024-01-01", 0)
//!   <- (instance_id, code)
//!        code == already running  -> signal exec (2, ["calendar", "2024-01-01"])
//!        code == 0, instance > 0  -> started
//!        otherwise                -> LaunchFailed
//! ```

use crate::bus::{BusConnection, BusMessage, Value};
use crate::daemon::join_arguments;
use crate::dispatch::SIGNAL_EXEC;
use crate::error::{Error, Result};
use crate::identity::validate_name;
use crate::session::Session;

/// Model data slot of the launch call, unused by this library
const NO_MODEL_DATA: u32 = 0;

/// How a successful launch was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The daemon started a new instance
    Started { instance_id: i32 },
    /// The target was already running and received the arguments as a signal
    Forwarded,
}

impl<C: BusConnection> Session<C> {
    /// Launch `application`, or forward `args` to it if it is already running
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// match session.launch("calendar", &["2024-01-01"]).await? {
    ///     LaunchOutcome::Started { instance_id } => println!("started {instance_id}"),
    ///     LaunchOutcome::Forwarded => println!("calendar was already open"),
    /// }
    /// ```
    pub async fn launch<S: AsRef<str>>(&self, application: &str, args: &[S]) -> Result<LaunchOutcome> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        self.launch_with(application, &args).await
    }

    /// Launch with arguments collected from an iterator
    pub async fn launch_iter<I>(&self, application: &str, args: I) -> Result<LaunchOutcome>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let owned: Vec<String> = args.into_iter().map(Into::into).collect();
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.launch_with(application, &args).await
    }

    /// Launch with the first `argc` entries of `argv`
    pub async fn launch_argv<S: AsRef<str>>(
        &self,
        application: &str,
        argc: usize,
        argv: &[S],
    ) -> Result<LaunchOutcome> {
        let Some(argv) = argv.get(..argc) else {
            return Err(Error::InvalidArgument(format!(
                "argc is {argc} but argv holds {} entries",
                argv.len()
            )));
        };
        self.launch(application, argv).await
    }

    async fn launch_with(&self, application: &str, args: &[&str]) -> Result<LaunchOutcome> {
        validate_name(application)?;
        let application_id = self.lookup_application_id(application);

        if self.registry.get_bool(&self.config.registry_layout().shutdown_key)?.unwrap_or(false) {
            tracing::info!(application, "launch refused, system is shutting down");
            return Err(Error::SystemShuttingDown);
        }

        let reply = self
            .daemon()
            .launch(application_id, &join_arguments(args), NO_MODEL_DATA)
            .await?;
        tracing::debug!(
            application,
            application_id,
            instance_id = reply.instance_id,
            code = reply.code,
            "launch call returned"
        );

        if reply.code == self.config.already_running_code() {
            self.forward_exec(application, args)?;
            tracing::info!(application, args = args.len(), "forwarded arguments to running instance");
            return Ok(LaunchOutcome::Forwarded);
        }
        if reply.code == 0 && reply.instance_id > 0 {
            tracing::info!(application, instance_id = reply.instance_id, "launched");
            return Ok(LaunchOutcome::Started {
                instance_id: reply.instance_id,
            });
        }

        tracing::warn!(application, code = reply.code, instance_id = reply.instance_id, "launch failed");
        Err(Error::LaunchFailed {
            code: reply.code,
            instance_id: reply.instance_id,
        })
    }

    /// Send `exec (args + 1, [application, args...])` to the single-instance
    /// address of `application`
    fn forward_exec(&self, application: &str, args: &[&str]) -> Result<()> {
        let target = self.config.address_scheme().derive(application, false, 0)?;
        let count = u32::try_from(args.len() + 1)
            .map_err(|_| Error::InvalidArgument(format!("{} arguments", args.len())))?;

        let signal = BusMessage::signal(target.object_path(), target.interface(), SIGNAL_EXEC)
            .map_err(|e| Error::SignalConstruction(e.to_string()))?
            .arg(count)
            .arg(Value::string_array(
                std::iter::once(application).chain(args.iter().copied()),
            ));
        self.connection.send(signal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, MemoryBus, MemoryConnection};
    use crate::config::{ClientConfig, DEFAULT_ALREADY_RUNNING_CODE};
    use crate::daemon::METHOD_LAUNCH;
    use crate::dispatch::decode_forwarded_args;
    use crate::registry::{MemoryRegistry, Registry, RegistryError};
    use crate::session::SessionBuilder;
    use std::sync::Arc;

    fn registry() -> Arc<MemoryRegistry> {
        Arc::new(
            MemoryRegistry::new()
                .with("/appmgr/launcher/info/AppID", 1)
                .with("/appmgr/calendar/info/AppID", 12),
        )
    }

    async fn launcher(bus: &MemoryBus, registry: Arc<MemoryRegistry>) -> Session<MemoryConnection> {
        let session = SessionBuilder::new("launcher")
            .registry(registry)
            .register(bus)
            .await
            .unwrap();
        bus.clear_journal();
        session
    }

    fn daemon_replies(bus: &MemoryBus, instance_id: i32, code: i32) {
        bus.serve("am.dbus.interface", move |_| {
            Ok(vec![Value::Int32(instance_id), Value::Int32(code)])
        });
    }

    #[tokio::test]
    async fn test_already_running_forwards_exec() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 3, DEFAULT_ALREADY_RUNNING_CODE);
        let session = launcher(&bus, registry()).await;

        let outcome = session.launch("calendar", &["2024-01-01"]).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Forwarded);

        let journal = bus.journal();
        assert_eq!(journal[0].member(), Some(METHOD_LAUNCH));
        assert_eq!(
            journal[0].body(),
            &[Value::Int32(12), Value::Str("2024-01-01".into()), Value::UInt32(0)]
        );

        let signals = bus.sent_signals(SIGNAL_EXEC);
        assert_eq!(signals.len(), 1);
        let exec = &signals[0];
        assert_eq!(exec.interface(), Some("org.clp.appmanager.calendar"));
        assert_eq!(exec.path(), Some("/org/clp/appmanager/calendar"));

        let mut reader = exec.reader();
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_str_array().unwrap(), vec!["calendar", "2024-01-01"]);
    }

    #[tokio::test]
    async fn test_cold_launch_sends_no_signal() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 5, 0);
        let session = launcher(&bus, registry()).await;

        let outcome = session.launch("calendar", &["a", "b"]).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Started { instance_id: 5 });
        assert!(bus.sent_signals(SIGNAL_EXEC).is_empty());
        assert_eq!(bus.journal().len(), 1);
        assert_eq!(bus.journal()[0].body()[1], Value::Str("a\u{10}b".into()));
    }

    #[tokio::test]
    async fn test_shutdown_flag_blocks_launch() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 5, 0);
        let registry = registry();
        let session = launcher(&bus, Arc::clone(&registry)).await;
        registry.set("/appmgr/Shutdown", true.into()).unwrap();

        let result = session.launch::<&str>("calendar", &[]).await;
        assert!(matches!(result, Err(Error::SystemShuttingDown)));
        assert!(bus.journal().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_shutdown_flag_aborts() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 5, 0);
        let registry = registry();
        let session = launcher(&bus, Arc::clone(&registry)).await;
        registry.set("/appmgr/Shutdown", "soon".into()).unwrap();

        let result = session.launch::<&str>("calendar", &[]).await;
        assert!(matches!(
            result,
            Err(Error::Registry(RegistryError::TypeMismatch { .. }))
        ));
        assert!(bus.journal().is_empty());
    }

    #[tokio::test]
    async fn test_failure_codes() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 0, 0);
        let session = launcher(&bus, registry()).await;
        assert!(matches!(
            session.launch::<&str>("calendar", &[]).await,
            Err(Error::LaunchFailed { code: 0, instance_id: 0 })
        ));

        let bus = MemoryBus::new();
        daemon_replies(&bus, 7, -1);
        let session = launcher(&bus, registry()).await;
        assert!(matches!(
            session.launch::<&str>("calendar", &[]).await,
            Err(Error::LaunchFailed { code: -1, instance_id: 7 })
        ));
        assert!(bus.sent_signals(SIGNAL_EXEC).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_sends_nothing() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 5, 0);
        let session = launcher(&bus, registry()).await;

        let long = "x".repeat(257);
        assert!(matches!(
            session.launch::<&str>("", &[]).await,
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            session.launch::<&str>(&long, &[]).await,
            Err(Error::InvalidName(_))
        ));
        assert!(bus.journal().is_empty());
    }

    #[tokio::test]
    async fn test_target_name_used_as_given() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 3, DEFAULT_ALREADY_RUNNING_CODE);
        let registry = registry();
        registry.set("/appmgr/browser.bin/info/AppID", 33.into()).unwrap();
        let session = launcher(&bus, registry).await;

        session.launch("browser.bin", &["u"]).await.unwrap();
        let journal = bus.journal();
        assert_eq!(
            journal[0].body(),
            &[Value::Int32(33), Value::Str("u".into()), Value::UInt32(0)]
        );
        let signals = bus.sent_signals(SIGNAL_EXEC);
        assert_eq!(signals[0].interface(), Some("org.clp.appmanager.browser.bin"));
        let mut reader = signals[0].reader();
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_str_array().unwrap(), vec!["browser.bin", "u"]);

        // a leading dot is still a name, it only has no registry entry
        bus.clear_journal();
        session.launch::<&str>(".hidden", &[]).await.unwrap();
        assert_eq!(bus.journal()[0].body()[0], Value::Int32(0));
    }

    #[tokio::test]
    async fn test_daemon_unreachable() {
        let bus = MemoryBus::new();
        let session = launcher(&bus, registry()).await;
        assert!(matches!(
            session.launch::<&str>("calendar", &[]).await,
            Err(Error::Transport(BusError::NoService(_)))
        ));
    }

    #[tokio::test]
    async fn test_call_variants_agree() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 3, DEFAULT_ALREADY_RUNNING_CODE);
        let session = launcher(&bus, registry()).await;

        session.launch("calendar", &["x", "y"]).await.unwrap();
        session
            .launch_iter("calendar", vec!["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        session.launch_argv("calendar", 2, &["x", "y", "ignored"]).await.unwrap();

        let calls: Vec<_> = bus
            .journal()
            .into_iter()
            .filter(|m| m.member() == Some(METHOD_LAUNCH))
            .map(|m| m.body().to_vec())
            .collect();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|body| body == &calls[0]));

        let signals = bus.sent_signals(SIGNAL_EXEC);
        assert_eq!(signals.len(), 3);
        assert!(signals.iter().all(|s| s.body() == signals[0].body()));

        assert!(matches!(
            session.launch_argv("calendar", 4, &["x"]).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_already_running_code() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 3, -9);
        let session = SessionBuilder::new("launcher")
            .config(ClientConfig::builder().already_running_code(-9).build())
            .registry(registry())
            .register(&bus)
            .await
            .unwrap();

        let outcome = session.launch::<&str>("calendar", &[]).await.unwrap();
        assert_eq!(outcome, LaunchOutcome::Forwarded);
    }

    #[tokio::test]
    async fn test_forwarded_args_round_trip() {
        let bus = MemoryBus::new();
        daemon_replies(&bus, 3, DEFAULT_ALREADY_RUNNING_CODE);
        let session = launcher(&bus, registry()).await;

        let cases: [&[&str]; 3] = [&[], &["only"], &["a", "", "b c", "d\u{10}e"]];
        for args in cases {
            bus.clear_journal();
            session.launch("calendar", args).await.unwrap();
            let signals = bus.sent_signals(SIGNAL_EXEC);
            let decoded = decode_forwarded_args(&signals[0]).unwrap();
            assert_eq!(decoded, args);
        }
    }
}
