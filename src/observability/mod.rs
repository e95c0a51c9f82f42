//! Observability: structured audit records for every mediated decision.

pub mod audit;
