//! Probe-log parsing and per-second time-series reconstruction

pub mod parser;
pub mod timeseries;

pub use parser::MetricsParser;
pub use timeseries::{PingReply, TimeSeriesReconstructor};
