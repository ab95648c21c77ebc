//! Lifecycle control and queries about other applications

use async_io::Timer;

use crate::bus::{BusConnection, BusMessage};
use crate::daemon::InstanceInfo;
use crate::dispatch::SIGNAL_STOP;
use crate::error::{Error, Result};
use crate::identity::{INSTANCE_SEPARATOR, InstanceName, validate_name};
use crate::session::Session;

impl<C: BusConnection> Session<C> {
    /// Ask the daemon to terminate this instance
    pub async fn close(&self) -> Result<()> {
        let instance_id = self.context.instance_id();
        tracing::info!(instance = %self.instance_name(), instance_id, "closing");
        self.daemon().kill(instance_id).await
    }

    /// Stop `application`, then kill its last instance once the grace
    /// period has passed
    pub async fn close_by_name(&self, application: &str) -> Result<()> {
        validate_name(application)?;
        let target = self.config.address_scheme().derive(application, false, 0)?;
        let stop = BusMessage::signal(target.object_path(), target.interface(), SIGNAL_STOP)
            .map_err(|e| Error::SignalConstruction(e.to_string()))?;
        self.connection.send(stop)?;

        let grace = self.config.close_grace();
        tracing::debug!(application, grace_ms = grace.as_millis() as u64, "stop sent, waiting");
        Timer::after(grace).await;

        let key = self.config.registry_layout().last_instance_key(application);
        let instance_id = self
            .registry
            .get_int(&key)?
            .ok_or_else(|| Error::NotFound(format!("no instance recorded for {application}")))?;
        self.daemon().kill(instance_id).await
    }

    /// Bring instance `instance_id` to the front
    ///
    /// The focus request is sent without waiting for the window manager.
    pub async fn restore(&self, instance_id: i32) -> Result<()> {
        let info = self.daemon().instance_info(instance_id).await?;
        tracing::debug!(instance_id, pid = info.pid, "restoring");
        self.window_manager().raise_pid(info.pid)
    }

    /// Flag the system as shutting down and tell every application to stop
    ///
    /// Launches fail with [`Error::SystemShuttingDown`] from then on.
    pub fn request_shutdown(&self) -> Result<()> {
        let layout = self.config.registry_layout();
        self.registry.set(&layout.shutdown_key, true.into())?;

        let am = self.config.app_manager();
        let stop = BusMessage::signal(am.object_path(), am.interface(), SIGNAL_STOP)
            .map_err(|e| Error::SignalConstruction(e.to_string()))?;
        self.connection.send(stop)?;
        tracing::info!(requested_by = %self.instance_name(), "shutdown requested");
        Ok(())
    }

    /// Record whether this application is visible to the user
    pub fn set_visibility(&self, visible: bool) -> Result<()> {
        let key = self.config.registry_layout().visibility_key(self.application_name());
        self.registry.set(&key, visible.into())?;
        Ok(())
    }

    /// Priority recorded by the application running as `pid`
    pub fn priority_of(&self, pid: i32) -> Result<Option<i32>> {
        let root = &self.config.registry_layout().app_root;
        for dir in self.registry.dirs(root)? {
            if self.registry.get_int(&format!("{dir}/info/PID"))? == Some(pid) {
                return Ok(self.registry.get_int(&format!("{dir}/info/Priority"))?);
            }
        }
        Ok(None)
    }

    /// Number of applications with at least one running instance
    pub async fn active_app_count(&self) -> Result<usize> {
        Ok(self.daemon().running_apps().await?.len())
    }

    pub async fn is_app_active(&self, application: &str) -> Result<bool> {
        validate_name(application)?;
        let application_id = self.lookup_application_id(application);
        self.daemon().is_running(application_id).await
    }

    /// Names (`app:<id>`) of the running instances of `application`
    pub async fn active_instances(&self, application: &str) -> Result<Vec<String>> {
        validate_name(application)?;
        let application_id = self.lookup_application_id(application);
        let ids = self.daemon().running_instances(application_id).await?;
        Ok(ids
            .into_iter()
            .map(|id| format!("{application}{INSTANCE_SEPARATOR}{id}"))
            .collect())
    }

    /// Application id and pid of the instance called `instance_name`
    ///
    /// A name without an instance id refers to the first running instance.
    pub async fn instance_info(&self, instance_name: &str) -> Result<InstanceInfo> {
        let parsed = InstanceName::parse(instance_name)?;
        let instance_id = match parsed.instance_id() {
            Some(id) => id,
            None => {
                let application_id = self.lookup_application_id(parsed.application());
                self.daemon()
                    .running_instances(application_id)
                    .await?
                    .first()
                    .copied()
                    .ok_or_else(|| Error::NotFound(format!("{instance_name} is not running")))?
            }
        };
        self.daemon().instance_info(instance_id).await
    }

    /// Application id of the process `pid`, taken from its first instance
    pub async fn application_id_of(&self, pid: i32) -> Result<i32> {
        let instance_id = self
            .daemon()
            .running_instances_in_pid(pid)
            .await?
            .first()
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no instance runs in pid {pid}")))?;
        Ok(self.daemon().instance_info(instance_id).await?.application_id)
    }
}
