//! Command implementations for the mnemo CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod cycle;
pub mod drift;
pub mod memory;
pub mod search;
pub mod serve;
pub mod status;
