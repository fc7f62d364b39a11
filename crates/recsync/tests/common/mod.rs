//! Shared test utilities for recsync integration tests.

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
