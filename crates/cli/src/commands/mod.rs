//! Subcommand implementations

pub mod breakers;
pub mod incidents;
pub mod recovery;
pub mod status;
