//! Builders to construct scheduler components from configuration.

pub mod engine_builder;

pub use engine_builder::{build_engine, build_engine_with_audit, build_ledger, build_scheduler};
