//! Shared helpers

pub mod concurrency;

pub use concurrency::{concurrent, concurrent_try_map};
