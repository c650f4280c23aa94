//! Skein Runtime
//!
//! A native runtime and host for the Skein engine:
//! - **Script runtime**: code units link catalog libraries of Rust functions
//!   into each isolate (`script`, `catalog`, `unit` modules)
//! - **Ports**: `serde_json` messages sent to receive ports from any thread,
//!   plus a service port for resume and debugger requests (`ports` module)
//! - **Host**: TOML configuration and a facade that owns the VM and its
//!   runner thread (`config`, `host` modules)
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_runtime::{Host, HostConfig, Library, LibraryCatalog};
//! use skein_engine::{CodeUnit, RunRequest, Snapshot};
//!
//! let catalog = LibraryCatalog::new().with_library(
//!     Library::new("app").with_function("main", |ctx, _args| {
//!         let inbox = ctx.open_port(|ctx, message| {
//!             tracing::info!(%message, "received");
//!             ctx.close_current_port();
//!             Ok(())
//!         });
//!         ctx.publish("app.inbox", &inbox);
//!         Ok(())
//!     }),
//! );
//!
//! let host = Host::new(HostConfig::default(), catalog)?;
//! host.launch(
//!     Snapshot::from_data(snapshot_bytes),
//!     &[CodeUnit::from_text("main", "library app")],
//!     &RunRequest::default(),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod ports;
pub mod script;
pub mod unit;

pub use catalog::{Library, LibraryCatalog, ScriptFn, ServiceHandler};
pub use config::{HostConfig, IsolateConfig, LimitsConfig, RunnerConfig};
pub use context::ScriptContext;
pub use error::{ConfigError, HostError, ScriptError, SendError};
pub use host::Host;
pub use ports::{PortDirectory, PortId, SendPort, ServiceMessage, ServicePort};
pub use script::ScriptRuntime;
pub use unit::UnitManifest;
