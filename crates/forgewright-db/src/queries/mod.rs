//! Query modules, one per aggregate table.

pub mod artifacts;
pub mod projects;
pub mod sessions;
pub mod ticket_events;
pub mod tickets;
