//! Shared types for the boop relay.
//!
//! This crate defines the core data model used across the relay: the Boop
//! itself, the relayed EVM transaction wrapping it, on-chain outcome and
//! submitter error taxonomies, receipts, and the events published on the
//! internal event bus.

pub mod boop;
pub mod chain;
pub mod events;
pub mod receipt;
pub mod simulation;
pub mod transaction;

pub use boop::*;
pub use chain::*;
pub use events::*;
pub use receipt::*;
pub use simulation::*;
pub use transaction::*;
