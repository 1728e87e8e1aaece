//! Test harnesses for lambda-offline.
//!
//! `TestGateway` boots the `lambda-offline` binary against a service file
//! and offers request helpers for end-to-end tests.

#[cfg(test)]
pub mod cli;
pub mod gateway;

pub use gateway::{TestError, TestGateway};
