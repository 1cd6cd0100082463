//! Statistics for a running multiplexer

pub mod metrics;

pub use metrics::{MuxMetrics, MuxStats};
