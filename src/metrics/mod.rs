//! Metrics for link and message activity

mod prometheus;

pub use self::prometheus::*;
