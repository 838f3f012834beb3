//! Low-level utilities shared across Warden crates.
//!
//! Provides atomic state-file writes, unix time helpers, and the duration
//! text parsing/rendering used by chat commands and announcements.

pub mod atomic_io;
pub mod duration_text;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use duration_text::{humanize_duration, parse_duration_text, render_time_ago};
pub use time_utils::{current_unix_timestamp, unix_to_datetime};
