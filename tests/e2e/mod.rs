//! End-to-end tests for the serial transport.
//!
//! These tests drive the public API against the recording mock backend, so
//! no hardware is required. They cover the complete workflow from discovery
//! through communication, control-line sequences and teardown.

pub mod discovery_tests;
pub mod read_loop_tests;
pub mod session_tests;
