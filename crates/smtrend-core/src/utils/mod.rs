//! Utility functions for string formatting.

pub mod format;

pub use format::{format_remaining, format_remaining_short, truncate};
