//! buslink - D-Bus connection lifecycle and per-user session bus discovery
//!
//! A library for holding long-lived message bus connections inside a host
//! process, and for a privileged service to reach the private session bus of
//! a logged-in user.
//!
//! # Connections
//!
//! A [`Connection`](dbus::Connection) owns one transport handle and reads it
//! in one of two ways, fixed when it is built:
//!
//! - **Threaded** (default): a dedicated thread named after the connection
//! - **Integrated**: callbacks registered with the host's
//!   [`EventLoop`](dbus::EventLoop)
//!
//! Connections come from an injected [`Registry`](dbus::Registry), which also
//! hands out the shared system and session bus connections.
//!
//! # Session discovery
//!
//! [`Locator`](session::Locator) scans the process table for a process owned
//! by the target user that advertises a session bus address, and connects to
//! it with the effective uid switched for that one attempt.

pub mod cli;
pub mod commands;
pub mod config;
pub mod dbus;
pub mod error;
pub mod output;
pub mod session;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{BusError, Result};
