//! Reconciliation use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into resolution, aggregation, merge and
//!   adjudication APIs.
//! - Keep the CLI decoupled from storage details.

pub mod adjudication;
pub mod aggregator;
pub mod conflicts;
pub mod merge;
pub mod resolver;
