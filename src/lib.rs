//! appmgr - client library for the Application-Manager bus service
//!
//! Applications on a device register with a central application manager,
//! launch one another and exchange lifecycle signals and free-form messages
//! over an inter-process bus. This crate implements the client side of that
//! protocol:
//!
//! - every running instance gets a derived bus address (`org.clp.appmanager.<app>[<id>]`)
//! - a launch either starts the target or forwards the arguments to the
//!   instance that is already running
//! - inbound signals (stop, exec, focus changes, application exits and
//!   messages) are dispatched to the callbacks registered on the [`Session`]
//!
//! # Example
//!
//! ```rust,ignore
//! use appmgr::{LaunchOutcome, SessionBuilder};
//!
//! async fn run(bus: &impl appmgr::bus::Transport) -> appmgr::Result<()> {
//!     let session = SessionBuilder::new("calendar").priority(10).register(bus).await?;
//!
//!     session.on_exec(|args| println!("opened again with {args:?}"));
//!     session.on_stop(|| println!("asked to stop"));
//!
//!     if let LaunchOutcome::Forwarded = session.launch("notes", &["todo.txt"]).await? {
//!         println!("notes was already running");
//!     }
//!     session.send_message("notes", &["refresh"])?;
//!
//!     session.run().await;
//!     Ok(())
//! }
//! ```
//!
//! # Collaborators
//!
//! The bus and the configuration registry are reached through the
//! [`bus::Transport`] and [`registry::Registry`] traits. [`bus::MemoryBus`]
//! and [`registry::MemoryRegistry`] are in-process implementations;
//! [`registry::FileRegistry`] keeps the registry in a TOML file.

pub mod bus;
mod config;
mod control;
pub mod daemon;
pub mod dispatch;
mod error;
pub mod identity;
mod launch;
mod messaging;
pub mod registry;
mod session;

pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_ALREADY_RUNNING_CODE, DEFAULT_CLOSE_GRACE,
    ServiceAddress,
};
pub use daemon::{AppManagerProxy, InstanceInfo, WindowGeometry, WindowInfo, WindowManagerProxy};
pub use dispatch::AppEvent;
pub use error::{Error, Result};
pub use identity::{AddressScheme, DerivedAddress, InstanceName, InstanceType, derive_address};
pub use launch::LaunchOutcome;
pub use session::{FIRST_INSTANCE_ID, PostInitHandler, RegistrationContext, Session, SessionBuilder};
