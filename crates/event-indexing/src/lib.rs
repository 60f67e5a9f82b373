//! The normalization layer: matches raw logs against protocol event
//! descriptors, dispatches them to per-protocol handlers, persists the
//! resulting canonical events atomically and keeps the local view
//! consistent with the canonical chain.

pub mod accumulator;
pub mod consistency;
pub mod context;
pub mod handlers;
pub mod indexer;
pub mod maintenance;
pub mod matcher;
pub mod store;

mod metrics;
