//! Shared utilities.

pub mod units;

pub use units::{size_unit, time_unit};
