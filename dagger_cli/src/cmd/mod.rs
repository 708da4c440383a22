//! Subcommand implementations, one module per `dagger` subcommand — mirrors
//! `falconeri/src/cmd/mod.rs`'s layout.

pub mod diamond;
pub mod linear_chain;
