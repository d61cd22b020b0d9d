//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **memory**: process-local lock, cache and sheet store for single-node
//!   deployments and tests
//! - **redis**: shared cache tier and distributed named locks over `bb8-redis`
//! - **sheets**: HTTP sheet store and credential providers over `reqwest`
//!
//! Adapters are thin translators between domain types and infrastructure
//! representations. They contain no business logic.

pub mod memory;
pub mod redis;
pub mod sheets;
