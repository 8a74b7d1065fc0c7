//! # Prometheus Resource Groups
//!
//! Hierarchical admission control for a query coordinator.
//!
//! Queries are routed by ordered selection rules to a leaf of a tree of
//! *resource groups*. Every group carries a hard concurrency limit, a queue
//! limit, an optional soft memory limit and a scheduling policy that decides
//! which child receives the next free slot. A query starts only when every
//! group from its leaf to the root has room; otherwise it waits in its leaf
//! until a scheduling pass promotes it, or is rejected outright when a queue
//! on its path is full.
//!
//! ## Core Problem Solved
//!
//! A shared coordinator serves many tenants with very different workloads:
//!
//! - **Isolation**: one user's batch of heavy queries must not starve dashboards
//! - **Fair sharing**: sibling groups split capacity by configured weight
//! - **Bounded queues**: overload is refused early instead of piling up
//! - **Live reconfiguration**: limits change without restarting or losing work
//!
//! ## Key Features
//!
//! - **Templates**: groups are declared as templates (`${USER}` patterns
//!   included) and materialized lazily on first use
//! - **Policies**: `fifo`, `weighted`, `weighted_fair` and `query_priority`
//! - **Non-blocking admission**: submit returns immediately; started-callbacks
//!   run on the caller-supplied executor after internal locks are released
//! - **Hot reload**: configuration managers (`file`, `static`) refreshed on a timer
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prometheus_resource_groups::builders::ManagerBuilder;
//! use prometheus_resource_groups::config::ManagerSettings;
//! use prometheus_resource_groups::core::{QueryHandle, Selection, SelectionCriteria};
//! use prometheus_resource_groups::runtime::TokioSpawner;
//!
//! let manager = ManagerBuilder::new(ManagerSettings::from_env()?).build_and_load()?;
//! let state = manager.submit(
//!     QueryHandle::new("20240101_000001_00001", Arc::new(my_query)),
//!     Selection::Criteria(SelectionCriteria::new("alice").with_source("cli")),
//!     Arc::new(TokioSpawner::current()),
//! )?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and capacity accounting.
pub mod core;
/// Configuration models for resource groups, selectors and manager settings.
pub mod config;
/// Builders to construct managers from settings.
pub mod builders;
/// Infrastructure adapters for configuration sources.
pub mod infra;
/// Runtime adapters for executors and background refresh.
pub mod runtime;
/// Shared utilities.
pub mod util;
