//! # Relog Testkit
//!
//! Test utilities for Relog: temp-directory log fixtures, crash and
//! corruption injection, and the full-stack integration suite.
//!
//! The integration tests live here rather than in `relog_core` so they can
//! exercise the crate exactly the way an embedding service does - through
//! the public API only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;

#[cfg(test)]
mod integration;
