//! Station analysis library
//!
//! Infers work stations from position traces, segments each entity's trace
//! into station visits and derives dwell, transition and production times.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod error;
pub mod infra;
pub mod io;
pub mod services;
