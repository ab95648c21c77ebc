use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::identity::{AddressScheme, DEFAULT_INTERFACE_PREFIX, DEFAULT_OBJECT_PREFIX};
use crate::registry::RegistryLayout;

/// Launch result code the daemon uses for "instance already running"
pub const DEFAULT_ALREADY_RUNNING_CODE: i32 = -4;

/// Default delay between the stop signal and the kill call of a close
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Bus service name, object path and interface of a well-known peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    service: String,
    object_path: String,
    interface: String,
}

impl ServiceAddress {
    pub fn new(
        service: impl Into<String>,
        object_path: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            object_path: object_path.into(),
            interface: interface.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

/// Configuration shared by every component of a session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    address_scheme: AddressScheme,
    app_manager: ServiceAddress,
    window_manager: ServiceAddress,
    daemon: ServiceAddress,
    registry_layout: RegistryLayout,
    already_running_code: i32,
    close_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address_scheme: AddressScheme::default(),
            app_manager: ServiceAddress::new(
                DEFAULT_INTERFACE_PREFIX,
                DEFAULT_OBJECT_PREFIX,
                DEFAULT_INTERFACE_PREFIX,
            ),
            window_manager: ServiceAddress::new(
                "org.clp.matchboxwm",
                "/org/clp/matchboxwm",
                "org.clp.matchboxwm",
            ),
            daemon: ServiceAddress::new("am.dbus.interface", "/app_manager", "am.dbus.interface"),
            registry_layout: RegistryLayout::default(),
            already_running_code: DEFAULT_ALREADY_RUNNING_CODE,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for ClientConfig
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parse a TOML document; missing sections and keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(file.into_builder().build())
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded client configuration");
        Ok(config)
    }

    pub fn address_scheme(&self) -> &AddressScheme {
        &self.address_scheme
    }

    /// Broadcast interface and object of the application manager
    pub fn app_manager(&self) -> &ServiceAddress {
        &self.app_manager
    }

    pub fn window_manager(&self) -> &ServiceAddress {
        &self.window_manager
    }

    /// Service answering launch, kill and query calls
    pub fn daemon(&self) -> &ServiceAddress {
        &self.daemon
    }

    pub fn registry_layout(&self) -> &RegistryLayout {
        &self.registry_layout
    }

    pub fn already_running_code(&self) -> i32 {
        self.already_running_code
    }

    pub fn close_grace(&self) -> Duration {
        self.close_grace
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    inner: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn address_scheme(mut self, scheme: AddressScheme) -> Self {
        self.inner.address_scheme = scheme;
        self
    }

    pub fn app_manager(mut self, address: ServiceAddress) -> Self {
        self.inner.app_manager = address;
        self
    }

    pub fn window_manager(mut self, address: ServiceAddress) -> Self {
        self.inner.window_manager = address;
        self
    }

    pub fn daemon(mut self, address: ServiceAddress) -> Self {
        self.inner.daemon = address;
        self
    }

    pub fn registry_layout(mut self, layout: RegistryLayout) -> Self {
        self.inner.registry_layout = layout;
        self
    }

    pub fn already_running_code(mut self, code: i32) -> Self {
        self.inner.already_running_code = code;
        self
    }

    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.inner.close_grace = grace;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.inner
    }
}

/// On-disk configuration, every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    address: AddressSection,
    app_manager: ServiceSection,
    window_manager: ServiceSection,
    daemon: DaemonSection,
    registry: RegistrySection,
    lifecycle: LifecycleSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddressSection {
    interface_prefix: Option<String>,
    object_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceSection {
    service: Option<String>,
    object_path: Option<String>,
    interface: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonSection {
    service: Option<String>,
    object_path: Option<String>,
    interface: Option<String>,
    already_running_code: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistrySection {
    app_root: Option<String>,
    app_info_root: Option<String>,
    shutdown_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LifecycleSection {
    close_grace_ms: Option<u64>,
}

fn merge_service(section: ServiceSection, base: &ServiceAddress) -> ServiceAddress {
    ServiceAddress::new(
        section.service.unwrap_or_else(|| base.service.clone()),
        section.object_path.unwrap_or_else(|| base.object_path.clone()),
        section.interface.unwrap_or_else(|| base.interface.clone()),
    )
}

impl FileConfig {
    fn into_builder(self) -> ClientConfigBuilder {
        let defaults = ClientConfig::default();

        let scheme = AddressScheme::new(
            self.address
                .interface_prefix
                .unwrap_or_else(|| defaults.address_scheme.interface_prefix().to_string()),
            self.address
                .object_prefix
                .unwrap_or_else(|| defaults.address_scheme.object_prefix().to_string()),
        );

        let daemon = merge_service(
            ServiceSection {
                service: self.daemon.service,
                object_path: self.daemon.object_path,
                interface: self.daemon.interface,
            },
            &defaults.daemon,
        );

        let base_layout = RegistryLayout::default();
        let layout = RegistryLayout {
            app_root: self.registry.app_root.unwrap_or(base_layout.app_root),
            app_info_root: self.registry.app_info_root.unwrap_or(base_layout.app_info_root),
            shutdown_key: self.registry.shutdown_key.unwrap_or(base_layout.shutdown_key),
        };

        let close_grace = self
            .lifecycle
            .close_grace_ms
            .map_or(defaults.close_grace, Duration::from_millis);

        ClientConfig::builder()
            .address_scheme(scheme)
            .app_manager(merge_service(self.app_manager, &defaults.app_manager))
            .window_manager(merge_service(self.window_manager, &defaults.window_manager))
            .daemon(daemon)
            .registry_layout(layout)
            .already_running_code(
                self.daemon
                    .already_running_code
                    .unwrap_or(defaults.already_running_code),
            )
            .close_grace(close_grace)
    }
}
