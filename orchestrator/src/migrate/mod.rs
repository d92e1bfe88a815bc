//! Schema migrations

pub mod chain;
pub mod runner;

pub use chain::{MigrationChain, Revision};
pub use runner::{ChainEvent, ChainState, LiveApplyError, MigrationRunner};
