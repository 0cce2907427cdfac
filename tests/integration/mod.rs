//! Integration tests for authgate
//! These run the assembled client over real HTTP against a mock backend

pub mod test_harness;

pub mod config_test;
