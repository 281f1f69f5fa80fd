//! Domain Layer
//!
//! Entities and ports shared by the replication layer and its adapters.

pub mod entities;
pub mod ports;
