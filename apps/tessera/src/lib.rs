//! # tessera
//!
//! Library half of the `tessera` binary: argument parsing, settings files and
//! the command implementations, exposed so they can be tested directly.

pub mod cli;
pub mod settings;
