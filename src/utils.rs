//! Utility functions and helpers.

pub mod atomic;
pub mod lock;
pub mod shutdown;
