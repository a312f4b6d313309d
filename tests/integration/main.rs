//! Integration test binary: all end-to-end scenarios in one binary.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod delivery_flow;
mod fallback_flow;
mod registration;
