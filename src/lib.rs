//! PIGGYBANK: recurring buy-or-withdraw agent for Kraken accounts.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod exchange;
pub mod storage;
pub mod notify;
pub mod engine;
