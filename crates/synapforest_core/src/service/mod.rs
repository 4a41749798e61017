//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and file placement into library
//!   operations.
//! - Keep hosting layers decoupled from storage details.

pub mod identity_lock;
pub mod ingest_service;
pub mod node_service;
