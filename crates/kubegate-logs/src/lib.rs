//! Log aggregation for kubegate
//!
//! This crate opens one log stream per pod, parses timestamped lines, filters
//! them by time window and regex, and either collects a batch or feeds a sink.

mod aggregator;
mod filter;
mod parser;
mod sink;

pub use aggregator::{LogAggregator, default_time_range};
pub use filter::LineFilter;
pub use parser::LogParser;
pub use sink::{LogSink, SinkError};
