//! HTTP admin surface of the OSEO order pipeline.

pub mod api;
pub mod metrics;
pub mod state;
