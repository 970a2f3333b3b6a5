//! # Prometheus Session Scheduler
//!
//! A resource-aware, fair-share scheduler and request dispatch layer that
//! multiplexes many concurrent compute sessions over a shared pool of
//! heterogeneous devices (CPU/GPU).
//!
//! ## Core Problem Solved
//!
//! Many tenants submit fine-grained operations against the same devices:
//!
//! - **Capacity**: aggregate memory and compute use on a device must never
//!   exceed what it has, even with tasks completing concurrently.
//! - **Fairness**: one heavy session must not starve the others.
//! - **Asynchronous replies**: requests finish out of order, yet every
//!   request gets exactly one reply carrying its sequence number.
//!
//! ## Key Features
//!
//! - **Resource ledger**: all-or-nothing per-device reservations over
//!   arbitrary resource dimensions, released exactly once.
//! - **Fair-share policy**: sessions ranked by aggregate normalized usage,
//!   FIFO within a session, no skipping ahead on denial.
//! - **Task lifecycle**: prepare, run, bounded retry of transient failures.
//! - **Drain-before-destroy**: a closing session leaves the live set only
//!   after its queue and grants reach zero.
//! - **Dispatch pipeline**: ROUTER-style framing over ZeroMQ or an
//!   in-memory transport, handler registry, bounded reply queue.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_session_scheduler::builders::build_engine;
//! use prometheus_session_scheduler::config::ServerConfig;
//! use prometheus_session_scheduler::infra::ZmqTransport;
//! use prometheus_session_scheduler::runtime::{HandlerRegistry, RequestPipeline, TokioSpawner};
//!
//! let cfg = ServerConfig::from_env()?;
//! let engine = build_engine(&cfg.engine, TokioSpawner::current())?;
//! tokio::spawn({
//!     let engine = engine.clone();
//!     async move { engine.run().await }
//! });
//!
//! let registry = HandlerRegistry::with_builtins(Arc::new(my_task_factory));
//! let pipeline = RequestPipeline::new(engine, registry, cfg.pipeline.clone());
//! let transport = ZmqTransport::bind(&cfg.pipeline.bind_address).await?;
//! let stats = pipeline.serve(transport).await;
//! ```
//!
//! For complete examples, see:
//! - `tests/engine_test.rs` - Engine lifecycle and retry behavior
//! - `tests/pipeline_test.rs` - End-to-end request handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and capacity accounting.
pub mod core;
/// Configuration models for the engine, device pool, and pipeline.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for the request transport.
pub mod infra;
/// Request pipeline, handlers, and runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
