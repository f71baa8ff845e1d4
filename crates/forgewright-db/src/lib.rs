//! Database schema, row models, and query functions for the ticket
//! orchestration engine.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
