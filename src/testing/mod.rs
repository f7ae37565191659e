//! Testing utilities and mock implementations
//!
//! Lets the device activities and orchestrator be exercised without a broker
//! or wall-clock timers.

pub mod mocks;

pub use mocks::*;
