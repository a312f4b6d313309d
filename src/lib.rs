//! Nudge: reminder delivery subsystem.
//!
//! Gets a time-scheduled reminder in front of its owner on every device they
//! registered, even when the app is closed.
//!
//! # Architecture
//!
//! - **Registry**: per-user push endpoints, deduplicated ([`registry`])
//! - **Trigger**: server-side sweep that claims due reminders, fans out pushes
//!   and marks them sent ([`trigger`], [`server`])
//! - **Transport**: outbound push delivery through a gateway ([`transport`])
//! - **Fallback cache**: foreground snapshot of upcoming reminders ([`cache`])
//! - **Dispatcher**: background renderer fed by pushes and the fallback timer
//!   ([`dispatcher`]), talking to the foreground over [`sync`]

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod nudge_dirs;
pub mod registry;
pub mod server;
pub mod store;
pub mod sync;
pub mod transport;
pub mod trigger;

pub use config::NudgeConfig;
pub use error::{DeliveryError, NudgeError, Result};
pub use model::{DeviceSubscription, LocalSnapshot, NewReminder, PushKeys, Reminder};
pub use store::Store;
