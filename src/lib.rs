//! # devstate-sync
//!
//! A long-running daemon that mirrors telephony extension state into
//! `Custom:` device state across one or more Asterisk servers, over the AMI
//! HTTP (`rawman`) interface.
//!
//! Each configured server gets a worker that logs in, seeds a baseline from
//! the server's device-state listing, and long-polls for extension changes.
//! Observed changes are merged into a process-wide registry and forwarded
//! back to every server as `SetVar DEVICE_STATE(...)` writes, so a BLF lamp
//! change seen on one PBX lights up on all of them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use devstate_sync::config::Config;
//! use devstate_sync::supervisor;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("devstate-sync.toml")?;
//!     let root = CancellationToken::new();
//!
//!     let shutdown = root.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     });
//!
//!     supervisor::run(config, root).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod mapping;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod worker;

pub use client::{AmiClient, StateWriter};
pub use config::{Config, ServerConfig};
pub use error::{Error, Result};
pub use forwarder::Forwarder;
pub use registry::StateRegistry;
pub use state::{DeviceState, DeviceStates, ExtensionState};
