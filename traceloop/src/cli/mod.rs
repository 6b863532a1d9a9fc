//! Command-line interface for traceloop
//!
//! This module contains CLI argument parsing

pub mod args;

pub use args::Args;
