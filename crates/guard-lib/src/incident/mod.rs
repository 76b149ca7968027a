//! Incident tracking
//!
//! Incidents come from health alerts, tripped breakers or outside callers.
//! Each carries an append-only response timeline and a status that only
//! moves forward.

mod manager;
mod record;

#[cfg(test)]
mod tests;

pub use manager::{IncidentManager, IncidentManagerBuilder};
pub use record::StatusChange;
