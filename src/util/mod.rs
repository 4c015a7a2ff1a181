//! Utility modules for sqlbeat.

mod duration;

pub use duration::{DurationParseError, deserialize_duration, format_duration, parse_duration};
