//! Testing utilities and mock implementations
//!
//! Mocks for pipeline steps, aggregate stores and the transport, so the
//! workflow can be exercised without a broker.

pub mod mocks;

pub use mocks::*;
