//! Internal utilities.

pub mod initials;
pub mod time;

pub use initials::initials;
pub use time::{TimeFormatter, WireTimestamp};
