//! Wire-level formats for the device agent
//!
//! SenML telemetry encoding and topic construction for device channels.

pub mod senml;
pub mod topics;

pub use senml::{EncodingError, Pack, Record};
pub use topics::{DeviceTopics, TopicBuilder};
