//! D-Bus connection lifecycle.
//!
//! This module provides:
//! - [`Registry`]: the injected owner of the shared system/session connections
//! - The connection factory (`open_bus`, `open_address`, `open_user`, `wrap`)
//! - [`Connection`]: one live handle with its listeners and delivery strategy
//! - The [`Transport`] seam, with [`ZbusTransport`] as the production binding

pub mod connection;
pub mod delivery;
pub mod event_loop;
pub mod factory;
pub mod listener;
pub mod registry;
pub mod transport;
pub mod zbus_transport;

pub use connection::Connection;
pub use delivery::{Delivery, DeliveryMode, IntegratedDelivery, ThreadedDelivery};
pub use event_loop::{EventLoop, FdCallback, SourceId, TimerCallback};
pub use factory::login_name;
pub use listener::{Handler, Listener, MatchRule};
pub use registry::Registry;
pub use transport::{
    BusHandle, BusKind, FilterId, FilterResult, Interest, MessageFilter, Timeout, TimeoutHooks,
    Transport, Watch, WatchHooks,
};
pub use zbus_transport::ZbusTransport;
