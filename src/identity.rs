//! Instance identity and bus address derivation
//!
//! Every running application listens on an interface and object path derived
//! from its name and, for multi-instance applications, its instance id:
//!
//! ```text
//! calendar       -> org.clp.appmanager.calendar    /org/clp/appmanager/calendar
//! calendar:3     -> org.clp.appmanager.calendar3   /org/clp/appmanager/calendar3
//! ```
//!
//! Launchers, message senders and the receiving instance all derive the same
//! strings independently, so the formatting here must stay byte-stable.

use std::fmt;

use crate::error::{Error, Result};

/// Maximum length of an application or instance name, in bytes
pub const MAX_NAME_LEN: usize = 256;

/// Separator between application name and instance id in an instance name
pub const INSTANCE_SEPARATOR: char = ':';

/// Separator between the canonical name and an exec-name qualifier
pub const QUALIFIER_SEPARATOR: char = '.';

/// Default interface prefix shared by all application instances
pub const DEFAULT_INTERFACE_PREFIX: &str = "org.clp.appmanager";

/// Default object path prefix shared by all application instances
pub const DEFAULT_OBJECT_PREFIX: &str = "/org/clp/appmanager";

/// Whether an application may run more than once at the same time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstanceType {
    /// Exactly one instance, addressed by the bare application name
    #[default]
    Single,
    /// Many instances, each addressed by name plus instance id
    Multiple,
}

impl InstanceType {
    pub fn is_multiple(self) -> bool {
        matches!(self, InstanceType::Multiple)
    }
}

impl From<bool> for InstanceType {
    fn from(multiple: bool) -> Self {
        if multiple {
            InstanceType::Multiple
        } else {
            InstanceType::Single
        }
    }
}

/// The interface, object path and instance name of one application instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    interface: String,
    object_path: String,
    instance_name: String,
}

impl DerivedAddress {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }
}

/// Prefixes used to build derived addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    interface_prefix: String,
    object_prefix: String,
}

impl Default for AddressScheme {
    fn default() -> Self {
        Self::new(DEFAULT_INTERFACE_PREFIX, DEFAULT_OBJECT_PREFIX)
    }
}

impl AddressScheme {
    pub fn new(interface_prefix: impl Into<String>, object_prefix: impl Into<String>) -> Self {
        Self {
            interface_prefix: interface_prefix.into(),
            object_prefix: object_prefix.into(),
        }
    }

    pub fn interface_prefix(&self) -> &str {
        &self.interface_prefix
    }

    pub fn object_prefix(&self) -> &str {
        &self.object_prefix
    }

    /// Derive the address of an application instance
    ///
    /// The instance id only takes part in the address of multi-instance
    /// applications; single-instance applications ignore it.
    pub fn derive(
        &self,
        application_name: &str,
        multi_instance: bool,
        instance_id: i32,
    ) -> Result<DerivedAddress> {
        validate_name(application_name)?;

        let (suffix, instance_name) = if multi_instance {
            (
                instance_id.to_string(),
                format!("{application_name}{INSTANCE_SEPARATOR}{instance_id}"),
            )
        } else {
            (String::new(), application_name.to_string())
        };

        Ok(DerivedAddress {
            interface: format!("{}.{application_name}{suffix}", self.interface_prefix),
            object_path: format!("{}/{application_name}{suffix}", self.object_prefix),
            instance_name,
        })
    }

    /// Derive the address of the instance named by `instance_name`
    ///
    /// `"app"` resolves to the single-instance address, `"app:3"` to the
    /// address of instance 3.
    pub fn derive_for_instance(&self, instance_name: &str) -> Result<DerivedAddress> {
        let parsed = InstanceName::parse(instance_name)?;
        match parsed.instance_id() {
            Some(id) => self.derive(parsed.application(), true, id),
            None => self.derive(parsed.application(), false, 0),
        }
    }
}

/// Derive an address using the default prefixes
pub fn derive_address(
    application_name: &str,
    multi_instance: bool,
    instance_id: i32,
) -> Result<DerivedAddress> {
    AddressScheme::default().derive(application_name, multi_instance, instance_id)
}

/// Check that a name is non-empty and within [`MAX_NAME_LEN`] bytes
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("name is empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "name is {} bytes, maximum is {MAX_NAME_LEN}",
            name.len()
        )));
    }
    Ok(())
}

/// Strip an exec-name qualifier: `"browser.bin"` becomes `"browser"`
pub fn canonical_name(exec_name: &str) -> Result<&str> {
    validate_name(exec_name)?;
    let canonical = exec_name
        .split_once(QUALIFIER_SEPARATOR)
        .map_or(exec_name, |(head, _)| head);
    if canonical.is_empty() {
        return Err(Error::InvalidName(format!(
            "no application name before qualifier in {exec_name:?}"
        )));
    }
    Ok(canonical)
}

/// An instance name split into application name and optional instance id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceName<'a> {
    application: &'a str,
    instance_id: Option<i32>,
}

impl<'a> InstanceName<'a> {
    /// Split `"app"` or `"app:<id>"`
    ///
    /// An empty id (`"app:"`) is treated as no id at all.
    pub fn parse(instance_name: &'a str) -> Result<Self> {
        validate_name(instance_name)?;
        let (application, id) = match instance_name.split_once(INSTANCE_SEPARATOR) {
            Some((application, id)) => (application, id),
            None => (instance_name, ""),
        };
        if application.is_empty() {
            return Err(Error::InvalidName(format!(
                "no application name in {instance_name:?}"
            )));
        }

        let instance_id = if id.is_empty() {
            None
        } else {
            Some(id.parse::<i32>().map_err(|_| {
                Error::InvalidName(format!("instance id {id:?} is not an integer"))
            })?)
        };

        Ok(Self {
            application,
            instance_id,
        })
    }

    pub fn application(&self) -> &'a str {
        self.application
    }

    pub fn instance_id(&self) -> Option<i32> {
        self.instance_id
    }
}

impl fmt::Display for InstanceName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance_id {
            Some(id) => write!(f, "{}{INSTANCE_SEPARATOR}{id}", self.application),
            None => f.write_str(self.application),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_instance_address() {
        let address = derive_address("calendar", false, 7).unwrap();
        assert_eq!(address.interface(), "org.clp.appmanager.calendar");
        assert_eq!(address.object_path(), "/org/clp/appmanager/calendar");
        assert_eq!(address.instance_name(), "calendar");
    }

    #[test]
    fn test_multi_instance_address() {
        let address = derive_address("notes", true, 3).unwrap();
        assert_eq!(address.interface(), "org.clp.appmanager.notes3");
        assert_eq!(address.object_path(), "/org/clp/appmanager/notes3");
        assert_eq!(address.instance_name(), "notes:3");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        for (name, multi, id) in [("a", false, 0), ("viewer", true, 12), ("x-y_z", true, -1)] {
            assert_eq!(
                derive_address(name, multi, id).unwrap(),
                derive_address(name, multi, id).unwrap()
            );
        }
    }

    #[test]
    fn test_custom_scheme() {
        let scheme = AddressScheme::new("com.example.apps", "/com/example/apps");
        let address = scheme.derive("mail", true, 2).unwrap();
        assert_eq!(address.interface(), "com.example.apps.mail2");
        assert_eq!(address.object_path(), "/com/example/apps/mail2");
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(derive_address("", false, 0), Err(Error::InvalidName(_))));

        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            derive_address(&too_long, false, 0),
            Err(Error::InvalidName(_))
        ));

        let longest = "a".repeat(MAX_NAME_LEN);
        assert!(derive_address(&longest, false, 0).is_ok());
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("browser").unwrap(), "browser");
        assert_eq!(canonical_name("browser.bin").unwrap(), "browser");
        assert_eq!(canonical_name("browser.bin.old").unwrap(), "browser");
        assert!(canonical_name(".hidden").is_err());
        assert!(canonical_name("").is_err());
    }

    #[test]
    fn test_instance_name_parse() {
        let parsed = InstanceName::parse("appY:3").unwrap();
        assert_eq!(parsed.application(), "appY");
        assert_eq!(parsed.instance_id(), Some(3));
        assert_eq!(parsed.to_string(), "appY:3");

        let parsed = InstanceName::parse("appY").unwrap();
        assert_eq!(parsed.instance_id(), None);

        let parsed = InstanceName::parse("appY:").unwrap();
        assert_eq!(parsed.instance_id(), None);

        assert!(InstanceName::parse(":3").is_err());
        assert!(InstanceName::parse("appY:three").is_err());
    }

    #[test]
    fn test_instance_address_matches_derivation() {
        let scheme = AddressScheme::default();
        assert_eq!(
            scheme.derive_for_instance("appY:3").unwrap(),
            scheme.derive("appY", true, 3).unwrap()
        );
        assert_eq!(
            scheme.derive_for_instance("appY").unwrap(),
            scheme.derive("appY", false, 0).unwrap()
        );
    }
}
