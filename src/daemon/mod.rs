//! Proxies for the daemons the library talks to
//!
//! [`AppManagerProxy`] wraps the application-manager service that starts,
//! kills and tracks instances; [`WindowManagerProxy`] wraps the window
//! manager. Both borrow the session's bus connection and turn typed replies
//! into crate errors.

mod window;

use crate::bus::{BusConnection, BusMessage, Value};
use crate::config::ServiceAddress;
use crate::error::{Error, Result};

pub use window::{WindowGeometry, WindowInfo, WindowManagerProxy};

pub const METHOD_LAUNCH: &str = "app_launch_call";
pub const METHOD_KILL: &str = "app_kill_call";
pub const METHOD_RUNNING_APPS: &str = "app_get_running_apps_call";
pub const METHOD_RUNNING_INSTANCES: &str = "app_get_running_instances_call";
pub const METHOD_INSTANCES_IN_PID: &str = "app_get_running_instances_in_pid_call";
pub const METHOD_INSTANCE_INFO: &str = "app_get_inst_info_call";
pub const METHOD_IS_RUNNING: &str = "app_is_running_call";

/// Separator placed between launch arguments in the daemon's argument string
pub const ARGUMENT_DELIMITER: char = '\u{10}';

/// Join launch arguments into the daemon's single argument string
///
/// No arguments produce an empty string.
pub fn join_arguments<S: AsRef<str>>(args: &[S]) -> String {
    let mut joined = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            joined.push(ARGUMENT_DELIMITER);
        }
        joined.push_str(arg.as_ref());
    }
    joined
}

/// Result of a launch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchReply {
    pub instance_id: i32,
    pub code: i32,
}

/// Application id and process id of a running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceInfo {
    pub application_id: i32,
    pub pid: i32,
}

pub(crate) fn method_call(address: &ServiceAddress, member: &str) -> Result<BusMessage> {
    BusMessage::method_call(
        address.service(),
        address.object_path(),
        address.interface(),
        member,
    )
    .map_err(|e| Error::SignalConstruction(e.to_string()))
}

pub(crate) async fn invoke<C: BusConnection>(connection: &C, call: BusMessage) -> Result<BusMessage> {
    let member = call.member().unwrap_or_default().to_string();
    let reply = connection.call(call).await?.into_result()?;
    tracing::debug!(method = %member, "daemon replied");
    Ok(reply)
}

fn check_code(operation: &'static str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::Daemon { operation, code })
    }
}

/// Client of the application-manager daemon
pub struct AppManagerProxy<'a, C: BusConnection> {
    connection: &'a C,
    address: &'a ServiceAddress,
}

impl<'a, C: BusConnection> AppManagerProxy<'a, C> {
    pub fn new(connection: &'a C, address: &'a ServiceAddress) -> Self {
        Self {
            connection,
            address,
        }
    }

    /// Ask the daemon to start application `application_id`
    ///
    /// The reply code is returned as is; interpreting it is up to the caller.
    pub async fn launch(&self, application_id: i32, arguments: &str, model_data: u32) -> Result<LaunchReply> {
        let call = method_call(self.address, METHOD_LAUNCH)?
            .arg(application_id)
            .arg(arguments)
            .arg(model_data);
        let reply = invoke(self.connection, call).await?;
        let mut reader = reply.reader();
        Ok(LaunchReply {
            instance_id: reader.read_i32()?,
            code: reader.read_i32()?,
        })
    }

    pub async fn kill(&self, instance_id: i32) -> Result<()> {
        let call = method_call(self.address, METHOD_KILL)?.arg(instance_id);
        let reply = invoke(self.connection, call).await?;
        check_code("kill", reply.reader().read_i32()?)
    }

    /// Application ids with at least one running instance
    pub async fn running_apps(&self) -> Result<Vec<i32>> {
        let call = method_call(self.address, METHOD_RUNNING_APPS)?;
        self.id_list("running apps", call).await
    }

    pub async fn running_instances(&self, application_id: i32) -> Result<Vec<i32>> {
        let call = method_call(self.address, METHOD_RUNNING_INSTANCES)?.arg(application_id);
        self.id_list("running instances", call).await
    }

    /// Instance ids owned by the process `pid`
    pub async fn running_instances_in_pid(&self, pid: i32) -> Result<Vec<i32>> {
        let call = method_call(self.address, METHOD_INSTANCES_IN_PID)?.arg(pid);
        self.id_list("instances in pid", call).await
    }

    pub async fn instance_info(&self, instance_id: i32) -> Result<InstanceInfo> {
        let call = method_call(self.address, METHOD_INSTANCE_INFO)?.arg(instance_id);
        let reply = invoke(self.connection, call).await?;
        let mut reader = reply.reader();
        let application_id = reader.read_i32()?;
        let pid = reader.read_i32()?;
        check_code("instance info", reader.read_i32()?)?;
        Ok(InstanceInfo { application_id, pid })
    }

    /// Whether any instance of `application_id` is running
    ///
    /// The daemon answers with a code: zero means running.
    pub async fn is_running(&self, application_id: i32) -> Result<bool> {
        let call = method_call(self.address, METHOD_IS_RUNNING)?.arg(application_id);
        let reply = invoke(self.connection, call).await?;
        Ok(reply.reader().read_i32()? == 0)
    }

    async fn id_list(&self, operation: &'static str, call: BusMessage) -> Result<Vec<i32>> {
        let reply = invoke(self.connection, call).await?;
        let mut reader = reply.reader();
        let ids = reader.read_i32_array()?;
        check_code(operation, reader.read_i32()?)?;
        Ok(ids)
    }
}

/// Reply body of an id-list query
#[cfg(test)]
pub(crate) fn id_list_reply(ids: &[i32], code: i32) -> Vec<Value> {
    vec![
        Value::Array(ids.iter().copied().map(Value::Int32).collect()),
        Value::Int32(code),
    ]
}
