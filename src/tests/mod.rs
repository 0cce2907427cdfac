//! Scenario tests for the auth client
//!
//! These drive the gateway and session manager together against a scripted
//! in-memory backend.

pub mod support;
