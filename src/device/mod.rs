//! The device service and its periodic activities

pub mod lifecycle;
pub mod publisher;
pub mod subscriber;
pub mod ticker;

pub use lifecycle::{DeviceService, ServiceState, TerminationReason};
pub use publisher::{HeartbeatPublisher, TelemetryPublisher};
pub use subscriber::{log_command_handler, CommandSubscriber};
pub use ticker::{IntervalTicker, Ticker};
