//! Infrastructure Layer
//!
//! Cross-cutting concerns shared by the replication components and the binary.

pub mod shutdown;

pub use shutdown::{shutdown_signal, ShutdownController};
