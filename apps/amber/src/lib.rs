//! # Amber
//!
//! Command-line maintenance for Amber namespaces stored in a redb file.
//! The binary in `main.rs` parses arguments and delegates to [`cli`].

pub mod cli;
