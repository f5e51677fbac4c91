//! Testing utilities
//!
//! A scriptable in-memory transport for exercising agents without a broker.

pub mod mocks;

pub use mocks::*;
