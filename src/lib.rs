//! confine: a per-task mandatory access control engine
//! Profiles confine individual tasks by name; every mediated operation is
//! decided against the task's bound profile and audited.
//!
//! # Architecture
//!
//! This crate is organized by confinement concern:
//!
//! ## Policy ([`policy`])
//! - [`policy::perms`]: File permission bitmasks and the exec qualifier
//! - [`policy::profile`]: Profiles, hats, capability/network/rlimit rules
//! - [`policy::namespace`]: Policy namespaces and their null profiles
//! - [`policy::store`]: The global profile store and its load lock
//! - [`policy::load`]: Profile document parsing and validation
//!
//! ## Matching ([`matcher`])
//! - [`matcher`]: The opaque path matcher capability and exec specs
//! - [`matcher::glob`]: Ordered glob rule tables
//!
//! ## Decisions ([`engine`])
//! - [`engine::file`]: File access and link subset checks
//! - [`engine::capability`]: Capability checks with per-task audit caching
//! - [`engine::net`]: Socket family/type mediation
//! - [`engine::rlimit`]: Resource limit cap enforcement
//!
//! ## Tasks ([`task`])
//! - [`task`]: Per-task confinement contexts and the task table
//! - [`task::hats`]: The hat state machine and cookie protocol
//!
//! ## Transitions & Lifecycle
//! - [`transition`]: Exec-time profile transition resolution
//! - [`lifecycle`]: Profile load, replacement, and live task migration
//!
//! ## Surface ([`hooks`])
//! - [`hooks`]: The mediation hook surface and control-plane operations
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit records and the file sink
//!
//! # Design Principles
//!
//! 1. **Decide, then audit** - Every denial and forced audit is recorded
//! 2. **Allocate outside locks** - Contexts are built before publication
//! 3. **Stale is monotone** - A replaced profile never accepts new bindings
//! 4. **Violations kill** - Protocol violations terminate, never just deny

// Policy model
pub mod policy;

// Path matching
pub mod matcher;

// Decision engine
pub mod engine;

// Task contexts and hats
pub mod task;

// Exec transitions
pub mod transition;

// Load, replace, remove, migrate
pub mod lifecycle;

// Mediation hook surface
pub mod hooks;

// Observability
pub mod observability;

// Error taxonomy
pub mod errors;

// CLI entrypoint wiring for the confine binary.
pub mod cli;

// Re-export the types most callers touch.
pub use engine::Decision;
pub use errors::{ConfineError, Result};
pub use hooks::{Caller, Confinement, PathOp};
pub use policy::perms::Perms;
