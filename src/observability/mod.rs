//! Observability for the device agent
//!
//! Structured logging via tracing; the span macros are exported at the crate
//! root by `#[macro_export]`.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LoggingOptions};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span, telemetry_span};
